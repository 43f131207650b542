//! The `file` connector and the operators built on connectors.
//!
//! `load file <path> [--chunk-size N] [--timeout D]` reads a file through the
//! filesystem actor and streams it as byte chunks. `save file <path>` writes
//! everything it receives to `<path>` via a temporary file and a rename.
//! `from` and `to` combine a connector with a format and are expanded by the
//! optimizer into `load | read` and `write | save`.
//!
//! Both loader and saver use the wait protocol: the request runs as a spawned
//! future that fills a shared slot and pings the stage notifier, while the
//! generator returns [`Resume::Wait`] until the slot is filled.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;

use crate::format::{Read, Write, DEFAULT_FORMAT};
use crate::parser::{parse_arg, parse_duration, ParserInterface};
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{ConnectorPlugin, FormatPlugin, OperatorPlugin, Registry};
use crate::traits::{
    decode_state, encode_state, ControlPlane, Generator, Input, InstantiateContext, Location,
    OpError, OpResult, Operator, Pull, Resume,
};

/// Bytes per chunk emitted by `load file` unless `--chunk-size` says otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Suffix of the temporary file `save file` writes before renaming.
const TMP_SUFFIX: &str = ".sluice-tmp";

/// Response slot shared between a generator and its in-flight request.
type Slot<T> = Arc<Mutex<Option<OpResult<T>>>>;

fn take_slot<T>(slot: &Slot<T>) -> Option<OpResult<T>> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

fn fill_slot<T>(slot: &Slot<T>, value: OpResult<T>) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
}

fn require_fs(ctrl: &dyn ControlPlane, op: &str) -> OpResult<sluice_io::FsHandle> {
    ctrl.fs()
        .ok_or_else(|| OpError::Exec(format!("'{op}' requires the filesystem actor")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "connector", rename = "file")]
pub struct LoadFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl LoadFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            chunk_size: None,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

impl Operator for LoadFile {
    fn name(&self) -> &'static str {
        "load"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        match input {
            ElementType::Void => Ok(ElementType::Bytes),
            other => Err(OpError::Type(format!(
                "'load' is a source and cannot consume {other}"
            ))),
        }
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        if self.chunk_size == Some(0) {
            return Err(OpError::Plan("chunk size must be positive".into()));
        }
        Ok(Box::new(FileLoader {
            path: self.path.clone(),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            timeout_ms: self.timeout_ms,
            emitted: 0,
            state: LoadState::Idle,
        }))
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        OperatorSpec::of(self.name(), self)
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn location(&self) -> Location {
        Location::Local
    }
}

enum LoadState {
    Idle,
    Reading(Slot<Bytes>),
    Streaming(Bytes),
    Finished,
}

struct FileLoader {
    path: String,
    chunk_size: usize,
    timeout_ms: Option<u64>,
    /// Bytes yielded so far; restored runs skip this prefix.
    emitted: usize,
    state: LoadState,
}

impl FileLoader {
    fn start(&mut self, ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        let fs = require_fs(ctrl, "load")?;
        let slot: Slot<Bytes> = Arc::new(Mutex::new(None));
        let notify = ctrl.notifier();
        let path = self.path.clone();
        let timeout_ms = self.timeout_ms.or(ctrl.config().load_timeout_ms);
        let filled = Arc::clone(&slot);
        debug!(path = %path, ?timeout_ms, "load: requesting file");

        ctrl.spawn(
            async move {
                let read = fs.read(path.clone());
                let result = match timeout_ms {
                    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), read).await {
                        Ok(r) => r.map_err(OpError::from),
                        Err(_) => Err(OpError::Timeout(format!(
                            "reading '{path}' took longer than {ms}ms"
                        ))),
                    },
                    None => read.await.map_err(OpError::from),
                };
                fill_slot(&filled, result);
                notify.notify_one();
            }
            .boxed(),
        );
        ctrl.set_waiting(true);
        self.state = LoadState::Reading(slot);
        Ok(Resume::Wait)
    }
}

impl Generator for FileLoader {
    fn resume(&mut self, _input: &mut dyn Input, ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        loop {
            match &mut self.state {
                LoadState::Idle => return self.start(ctrl),
                LoadState::Reading(slot) => match take_slot(slot) {
                    None => return Ok(Resume::Wait),
                    Some(Ok(data)) => {
                        ctrl.set_waiting(false);
                        let skip = self.emitted.min(data.len());
                        self.state = LoadState::Streaming(data.slice(skip..));
                    }
                    Some(Err(e)) => {
                        ctrl.set_waiting(false);
                        self.state = LoadState::Finished;
                        if let OpError::Timeout(msg) = &e {
                            ctrl.emit(Diagnostic::error(format!("load timed out: {msg}")));
                        }
                        return Err(e);
                    }
                },
                LoadState::Streaming(rest) => {
                    if rest.is_empty() {
                        self.state = LoadState::Finished;
                        continue;
                    }
                    let chunk = rest.split_to(self.chunk_size.min(rest.len()));
                    self.emitted += chunk.len();
                    return Ok(Resume::Yield(Element::Bytes(chunk)));
                }
                LoadState::Finished => return Ok(Resume::Done),
            }
        }
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.emitted).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.emitted = decode_state(state)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "connector", rename = "file")]
pub struct SaveFile {
    pub path: String,
}

impl SaveFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Operator for SaveFile {
    fn name(&self) -> &'static str {
        "save"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        match input {
            ElementType::Bytes => Ok(ElementType::Void),
            other => Err(OpError::Type(format!("'save' expects bytes, got {other}"))),
        }
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Box::new(FileSaver {
            path: self.path.clone(),
            buffer: BytesMut::new(),
            state: SaveState::Buffering,
        }))
    }

    fn optimize(&self, filter: &Expr, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::transparent(filter, EventOrder::Ordered)
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        OperatorSpec::of(self.name(), self)
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn location(&self) -> Location {
        Location::Local
    }
}

enum SaveState {
    Buffering,
    Writing(Slot<()>),
    Finished,
}

struct FileSaver {
    path: String,
    buffer: BytesMut,
    state: SaveState,
}

impl FileSaver {
    fn flush(&mut self, ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        let fs = require_fs(ctrl, "save")?;
        let slot: Slot<()> = Arc::new(Mutex::new(None));
        let filled = Arc::clone(&slot);
        let notify = ctrl.notifier();
        let path = self.path.clone();
        let tmp = format!("{path}{TMP_SUFFIX}");
        let bytes = std::mem::take(&mut self.buffer).freeze();
        debug!(path = %path, bytes = bytes.len(), "save: writing file");

        ctrl.spawn(
            async move {
                let result = async {
                    fs.write(tmp.clone(), bytes).await?;
                    fs.move_path(tmp, path).await?;
                    Ok::<(), OpError>(())
                }
                .await;
                fill_slot(&filled, result);
                notify.notify_one();
            }
            .boxed(),
        );
        ctrl.set_waiting(true);
        self.state = SaveState::Writing(slot);
        Ok(Resume::Wait)
    }
}

impl Generator for FileSaver {
    fn resume(&mut self, input: &mut dyn Input, ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        loop {
            match &self.state {
                SaveState::Buffering => match input.try_next() {
                    Pull::Item(Element::Bytes(b)) => self.buffer.extend_from_slice(&b),
                    Pull::Item(Element::Events(_)) => {
                        return Err(OpError::Type("'save' received events".into()))
                    }
                    Pull::Empty => return Ok(Resume::NeedInput),
                    Pull::Closed => return self.flush(ctrl),
                },
                SaveState::Writing(slot) => match take_slot(slot) {
                    None => return Ok(Resume::Wait),
                    Some(result) => {
                        ctrl.set_waiting(false);
                        self.state = SaveState::Finished;
                        result?;
                    }
                },
                SaveState::Finished => return Ok(Resume::Done),
            }
        }
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.buffer.as_ref()).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        let buffered: Vec<u8> = decode_state(state)?;
        self.buffer = BytesMut::from(buffered.as_slice());
        Ok(())
    }
}

/// Local files.
pub struct FileConnector;

fn parse_path(parser: &mut dyn ParserInterface) -> Result<String, Diagnostic> {
    match parser.accept_word() {
        Some(path) => Ok(path.inner),
        None => Err(parser.error_here("expected a file path")),
    }
}

impl ConnectorPlugin for FileConnector {
    fn name(&self) -> &'static str {
        "file"
    }

    fn parse_loader(
        &self,
        parser: &mut dyn ParserInterface,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let mut load = LoadFile::new(parse_path(parser)?);
        loop {
            if let Some(v) = parser.accept_flag_value("--chunk-size")? {
                let n: usize = parse_arg(&v, "chunk size")?;
                if n == 0 {
                    return Err(Diagnostic::error("chunk size must be positive").with_location(v.span));
                }
                load.chunk_size = Some(n);
            } else if let Some(v) = parser.accept_flag_value("--timeout")? {
                let timeout = parse_duration(&v.inner).ok_or_else(|| {
                    Diagnostic::error(format!("invalid duration '{}'", v.inner))
                        .with_location(v.span)
                        .with_note("use a number with one of ms, s, m, h")
                })?;
                load = load.with_timeout(timeout);
            } else {
                break;
            }
        }
        Ok(Box::new(load))
    }

    fn parse_saver(
        &self,
        parser: &mut dyn ParserInterface,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(SaveFile::new(parse_path(parser)?)))
    }

    fn loader_from_spec(&self, args: &serde_json::Value) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new("load", args.clone());
        Ok(Box::new(spec.parse_args::<LoadFile>()?))
    }

    fn saver_from_spec(&self, args: &serde_json::Value) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new("save", args.clone());
        Ok(Box::new(spec.parse_args::<SaveFile>()?))
    }
}

fn connector_of(args: &serde_json::Value, registry: &Registry) -> OpResult<Arc<dyn ConnectorPlugin>> {
    let name = args
        .get("connector")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| OpError::Plan("missing 'connector' argument".into()))?;
    registry
        .connector(name)
        .ok_or_else(|| OpError::Plan(format!("unknown connector '{name}'")))
}

pub struct LoadPlugin;

impl OperatorPlugin for LoadPlugin {
    fn name(&self) -> &'static str {
        "load"
    }

    fn signature(&self) -> Signature {
        Signature::SOURCE
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let Some(name) = parser.accept_word() else {
            return Err(parser.error_here("'load' expects a connector"));
        };
        registry.connector_or_diagnostic(&name)?.parse_loader(parser)
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        connector_of(args, registry)?.loader_from_spec(args)
    }
}

pub struct SavePlugin;

impl OperatorPlugin for SavePlugin {
    fn name(&self) -> &'static str {
        "save"
    }

    fn signature(&self) -> Signature {
        Signature::SINK
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let Some(name) = parser.accept_word() else {
            return Err(parser.error_here("'save' expects a connector"));
        };
        registry.connector_or_diagnostic(&name)?.parse_saver(parser)
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        connector_of(args, registry)?.saver_from_spec(args)
    }
}

#[derive(Serialize, Deserialize)]
struct PairSpec {
    first: OperatorSpec,
    second: OperatorSpec,
}

fn pair_spec(first: &dyn Operator, second: &dyn Operator) -> OpResult<serde_json::Value> {
    serde_json::to_value(PairSpec {
        first: first.to_spec()?,
        second: second.to_spec()?,
    })
    .map_err(|e| OpError::Plan(e.to_string()))
}

fn pair_from_spec(
    args: &serde_json::Value,
    registry: &Registry,
) -> OpResult<(Box<dyn Operator>, Box<dyn Operator>)> {
    let pair: PairSpec = serde_json::from_value(args.clone())
        .map_err(|e| OpError::Plan(format!("invalid arguments: {e}")))?;
    Ok((registry.from_spec(&pair.first)?, registry.from_spec(&pair.second)?))
}

fn not_expanded(op: &str) -> OpError {
    OpError::Exec(format!(
        "'{op}' must be expanded by the optimizer before it can run"
    ))
}

/// `from <connector> <args> [read <format>]`: sugar for `load | read`.
#[derive(Debug, Clone)]
pub struct FromSource {
    loader: Box<dyn Operator>,
    reader: Box<dyn Operator>,
}

impl FromSource {
    pub fn new(loader: Box<dyn Operator>, reader: Box<dyn Operator>) -> Self {
        Self { loader, reader }
    }
}

impl Operator for FromSource {
    fn name(&self) -> &'static str {
        "from"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        let bytes = self.loader.infer_type(input)?;
        self.reader.infer_type(bytes)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Err(not_expanded(self.name()))
    }

    fn optimize(&self, _filter: &Expr, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::barrier().with_replacement(Replacement::Replace(vec![
            self.loader.clone(),
            self.reader.clone(),
        ]))
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        Ok(OperatorSpec::new(
            self.name(),
            pair_spec(self.loader.as_ref(), self.reader.as_ref())?,
        ))
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn location(&self) -> Location {
        self.loader.location()
    }
}

/// `to <connector> <args> [write <format>]`: sugar for `write | save`.
#[derive(Debug, Clone)]
pub struct ToSink {
    writer: Box<dyn Operator>,
    saver: Box<dyn Operator>,
}

impl ToSink {
    pub fn new(writer: Box<dyn Operator>, saver: Box<dyn Operator>) -> Self {
        Self { writer, saver }
    }
}

impl Operator for ToSink {
    fn name(&self) -> &'static str {
        "to"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        let bytes = self.writer.infer_type(input)?;
        self.saver.infer_type(bytes)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Err(not_expanded(self.name()))
    }

    fn optimize(&self, _filter: &Expr, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::barrier().with_replacement(Replacement::Replace(vec![
            self.writer.clone(),
            self.saver.clone(),
        ]))
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        Ok(OperatorSpec::new(
            self.name(),
            pair_spec(self.writer.as_ref(), self.saver.as_ref())?,
        ))
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn location(&self) -> Location {
        self.saver.location()
    }
}

fn format_clause(
    parser: &mut dyn ParserInterface,
    registry: &Registry,
    keyword: &str,
) -> Result<Arc<dyn FormatPlugin>, Diagnostic> {
    if parser.accept_keyword(keyword) {
        let Some(name) = parser.accept_word() else {
            return Err(parser.error_here("expected a format name"));
        };
        return registry.format_or_diagnostic(&name);
    }
    registry
        .format(DEFAULT_FORMAT)
        .ok_or_else(|| parser.error_here("expected a format name"))
}

pub struct FromPlugin;

impl OperatorPlugin for FromPlugin {
    fn name(&self) -> &'static str {
        "from"
    }

    fn signature(&self) -> Signature {
        Signature::SOURCE
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let loader = LoadPlugin.parse_operator(parser, registry)?;
        let format = format_clause(parser, registry, "read")?;
        Ok(Box::new(FromSource::new(loader, Box::new(Read::new(format)))))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let (loader, reader) = pair_from_spec(args, registry)?;
        Ok(Box::new(FromSource::new(loader, reader)))
    }
}

pub struct ToPlugin;

impl OperatorPlugin for ToPlugin {
    fn name(&self) -> &'static str {
        "to"
    }

    fn signature(&self) -> Signature {
        Signature::SINK
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let saver = SavePlugin.parse_operator(parser, registry)?;
        let format = format_clause(parser, registry, "write")?;
        Ok(Box::new(ToSink::new(Box::new(Write::new(format)), saver)))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let (writer, saver) = pair_from_spec(args, registry)?;
        Ok(Box::new(ToSink::new(writer, saver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ArgParser;
    use crate::testing::{drive, drive_async, TestControl};
    use crate::traits::NoInput;
    use serde_json::json;
    use sluice_core::config::EngineConfig;
    use sluice_io::{FilesystemActor, MemoryStorage};

    fn ctx(config: &EngineConfig, input_type: ElementType) -> InstantiateContext<'_> {
        InstantiateContext { input_type, config }
    }

    fn joined(out: &[Element]) -> Vec<u8> {
        out.iter()
            .flat_map(|e| e.clone().into_bytes().unwrap().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn load_streams_chunks_and_resumes() {
        let storage = MemoryStorage::default();
        storage.insert("in.jsonl", b"0123456789".to_vec());
        let (fs, _actor) = FilesystemActor::spawn(Box::new(storage));
        let config = EngineConfig::default();
        let load = LoadFile::new("in.jsonl").with_chunk_size(4);

        let mut ctrl = TestControl::with_fs(fs.clone());
        let mut gen = load.instantiate(&ctx(&config, ElementType::Void)).unwrap();
        let out = drive_async(gen.as_mut(), vec![], &mut ctrl).await.unwrap();
        let sizes: Vec<usize> = out.iter().map(Element::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(joined(&out), b"0123456789");
        assert!(!ctrl.waiting);

        // A restored loader skips what was already emitted.
        let mut restored = load.instantiate(&ctx(&config, ElementType::Void)).unwrap();
        restored.restore(&encode_state(&4usize).unwrap()).unwrap();
        let out = drive_async(restored.as_mut(), vec![], &mut ctrl).await.unwrap();
        assert_eq!(joined(&out), b"456789");
    }

    #[tokio::test]
    async fn load_reports_missing_files() {
        let (fs, _actor) = FilesystemActor::spawn(Box::new(MemoryStorage::default()));
        let config = EngineConfig::default();
        let mut ctrl = TestControl::with_fs(fs);
        let mut gen = LoadFile::new("nope")
            .instantiate(&ctx(&config, ElementType::Void))
            .unwrap();
        let err = drive_async(gen.as_mut(), vec![], &mut ctrl).await.unwrap_err();
        assert!(matches!(err, OpError::Io(_)));
    }

    #[test]
    fn load_requires_fs() {
        let config = EngineConfig::default();
        let mut ctrl = TestControl::new();
        let mut gen = LoadFile::new("x")
            .instantiate(&ctx(&config, ElementType::Void))
            .unwrap();
        let err = gen.resume(&mut NoInput, &mut ctrl).unwrap_err();
        assert!(matches!(err, OpError::Exec(_)));
    }

    #[tokio::test]
    async fn save_writes_through_temp_file() {
        let storage = MemoryStorage::default();
        let (fs, _actor) = FilesystemActor::spawn(Box::new(storage.clone()));
        let config = EngineConfig::default();
        let mut ctrl = TestControl::with_fs(fs);
        let mut gen = SaveFile::new("out/result.jsonl")
            .instantiate(&ctx(&config, ElementType::Bytes))
            .unwrap();
        let chunks = vec![
            Element::Bytes(Bytes::from_static(b"ab")),
            Element::Bytes(Bytes::from_static(b"cd")),
        ];
        let out = drive_async(gen.as_mut(), chunks, &mut ctrl).await.unwrap();
        assert!(out.is_empty());
        assert!(storage.contains("out/result.jsonl"));
        assert!(!storage.contains("out/result.jsonl.sluice-tmp"));
    }

    #[test]
    fn save_rejects_events_and_snapshots_buffer() {
        let config = EngineConfig::default();
        let mut ctrl = TestControl::new();
        let mut gen = SaveFile::new("x")
            .instantiate(&ctx(&config, ElementType::Bytes))
            .unwrap();
        let err = drive(
            gen.as_mut(),
            vec![crate::testing::events(json!([{"a": 1}]))],
            &mut ctrl,
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Type(_)));

        let state = encode_state(&b"xy".to_vec()).unwrap();
        let mut other = SaveFile::new("x")
            .instantiate(&ctx(&config, ElementType::Bytes))
            .unwrap();
        other.restore(&state).unwrap();
        assert_eq!(other.snapshot().unwrap().unwrap(), state);
    }

    #[test]
    fn parse_load_flags() {
        let r = Registry::builtin();
        let mut p = ArgParser::new("file data.jsonl --timeout 2s --chunk-size 10");
        let op = LoadPlugin.parse_operator(&mut p, &r).unwrap();
        assert_eq!(
            op.to_spec().unwrap().args,
            json!({"connector": "file", "path": "data.jsonl", "chunk_size": 10, "timeout_ms": 2000})
        );
        assert_eq!(op.location(), Location::Local);

        let mut p = ArgParser::new("file x --timeout soon");
        let diag = LoadPlugin.parse_operator(&mut p, &r).unwrap_err();
        assert!(diag.message.contains("invalid duration"));

        let mut p = ArgParser::new("s3 bucket");
        let diag = LoadPlugin.parse_operator(&mut p, &r).unwrap_err();
        assert!(diag.notes[0].contains("file"));
    }

    #[test]
    fn from_and_to_expand() {
        let r = Registry::builtin();
        let mut p = ArgParser::new("file in.jsonl read json");
        let from = FromPlugin.parse_operator(&mut p, &r).unwrap();
        assert_eq!(from.infer_type(ElementType::Void).unwrap(), ElementType::Events);
        let Replacement::Replace(ops) = from.optimize(&Expr::trivially_true(), EventOrder::Ordered).replacement
        else {
            panic!("from must expand");
        };
        let names: Vec<&str> = ops.iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["load", "read"]);

        let mut p = ArgParser::new("file out.jsonl");
        let to = ToPlugin.parse_operator(&mut p, &r).unwrap();
        assert_eq!(to.infer_type(ElementType::Events).unwrap(), ElementType::Void);
        let spec = to.to_spec().unwrap();
        let back = r.from_spec(&spec).unwrap();
        assert_eq!(back.to_spec().unwrap(), spec);

        let config = EngineConfig::default();
        assert!(matches!(
            to.instantiate(&ctx(&config, ElementType::Events)),
            Err(OpError::Exec(_))
        ));
    }
}
