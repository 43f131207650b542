//! Durable checkpoint records.
//!
//! Layout under the checkpoint root:
//!
//! ```text
//! {root}/{run_id}/{seq:020}/stage-{index:04}.blob   framed stage state
//! {root}/{run_id}/{seq:020}/manifest.json           commit marker
//! ```
//!
//! Blobs are written first, then the manifest is written to a temporary name
//! and moved into place. A sequence directory without `manifest.json` was
//! never committed and is ignored by [`CheckpointStore::latest`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sluice_core::config::Codec;
use sluice_core::hash::Hash256;
use sluice_core::id::{CheckpointSeq, PipelineRunId};

use crate::actor::FsHandle;
use crate::blob::{decode_blob, encode_blob};
use crate::error::{Error, Result};

const MANIFEST: &str = "manifest.json";

/// A consistent snapshot of every stage of one run. `blobs[i]` is the state of
/// stage `i`, or `None` for stateless stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub run_id: PipelineRunId,
    pub seq: CheckpointSeq,
    pub pipeline_hash: Hash256,
    pub created_ms: u64,
    pub blobs: Vec<Option<Vec<u8>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointManifest {
    run_id: PipelineRunId,
    seq: CheckpointSeq,
    pipeline_hash: Hash256,
    created_ms: u64,
    codec: Codec,
    /// One flag per stage: whether a blob file exists.
    stages: Vec<bool>,
}

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    fs: FsHandle,
    root: String,
    codec: Codec,
}

impl CheckpointStore {
    pub fn new(fs: FsHandle, root: impl Into<String>, codec: Codec) -> Self {
        let root = root.into().trim_end_matches('/').to_string();
        Self { fs, root, codec }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn run_dir(&self, run_id: PipelineRunId) -> String {
        format!("{}/{}", self.root, run_id)
    }

    fn seq_dir(&self, run_id: PipelineRunId, seq: CheckpointSeq) -> String {
        format!("{}/{:020}", self.run_dir(run_id), seq.get())
    }

    /// Persist a checkpoint. Returns once the manifest is in place; older
    /// checkpoints of the same run are pruned afterwards.
    pub async fn commit(&self, cp: &Checkpoint) -> Result<()> {
        let dir = self.seq_dir(cp.run_id, cp.seq);

        for (i, blob) in cp.blobs.iter().enumerate() {
            if let Some(raw) = blob {
                let framed = encode_blob(self.codec, raw)?;
                self.fs
                    .write(format!("{dir}/stage-{i:04}.blob"), framed)
                    .await?;
            }
        }

        let manifest = CheckpointManifest {
            run_id: cp.run_id,
            seq: cp.seq,
            pipeline_hash: cp.pipeline_hash,
            created_ms: cp.created_ms,
            codec: self.codec,
            stages: cp.blobs.iter().map(Option::is_some).collect(),
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        let tmp = format!("{dir}/{MANIFEST}.tmp");
        self.fs.write(tmp.clone(), json).await?;
        self.fs.move_path(tmp, format!("{dir}/{MANIFEST}")).await?;

        info!(
            run_id = %cp.run_id,
            seq = cp.seq.get(),
            stages = cp.blobs.len(),
            "checkpoint committed"
        );

        if let Err(e) = self.prune_before(cp.run_id, cp.seq).await {
            warn!(run_id = %cp.run_id, error = %e, "failed to prune old checkpoints");
        }
        Ok(())
    }

    /// Committed sequence numbers of a run, ascending.
    pub async fn committed(&self, run_id: PipelineRunId) -> Result<Vec<CheckpointSeq>> {
        let run_dir = self.run_dir(run_id);
        let paths = self.fs.list(format!("{run_dir}/")).await?;
        let mut seqs: Vec<CheckpointSeq> = paths
            .iter()
            .filter_map(|p| {
                let rest = p.strip_prefix(&run_dir)?.trim_start_matches('/');
                let (seq, file) = rest.split_once('/')?;
                (file == MANIFEST).then(|| seq.parse::<u64>().ok())?
            })
            .map(CheckpointSeq::new)
            .collect();
        seqs.sort();
        seqs.dedup();
        Ok(seqs)
    }

    /// The most recent committed checkpoint of a run, if any.
    pub async fn latest(&self, run_id: PipelineRunId) -> Result<Option<Checkpoint>> {
        let Some(seq) = self.committed(run_id).await?.pop() else {
            debug!(%run_id, "no committed checkpoint");
            return Ok(None);
        };
        self.load(run_id, seq).await.map(Some)
    }

    pub async fn load(&self, run_id: PipelineRunId, seq: CheckpointSeq) -> Result<Checkpoint> {
        let dir = self.seq_dir(run_id, seq);
        let raw = self.fs.read(format!("{dir}/{MANIFEST}")).await?;
        let manifest: CheckpointManifest = serde_json::from_slice(&raw)?;
        if manifest.run_id != run_id || manifest.seq != seq {
            return Err(Error::Corrupt(format!(
                "{dir}/{MANIFEST} describes {} {}",
                manifest.run_id, manifest.seq
            )));
        }

        let mut blobs = Vec::with_capacity(manifest.stages.len());
        for (i, present) in manifest.stages.iter().enumerate() {
            if *present {
                let label = format!("{dir}/stage-{i:04}.blob");
                let framed = self.fs.read(label.clone()).await?;
                blobs.push(Some(decode_blob(&label, &framed)?));
            } else {
                blobs.push(None);
            }
        }

        debug!(%run_id, seq = seq.get(), "checkpoint loaded");
        Ok(Checkpoint {
            run_id,
            seq,
            pipeline_hash: manifest.pipeline_hash,
            created_ms: manifest.created_ms,
            blobs,
        })
    }

    async fn prune_before(&self, run_id: PipelineRunId, keep: CheckpointSeq) -> Result<()> {
        let run_dir = self.run_dir(run_id);
        let paths = self.fs.list(format!("{run_dir}/")).await?;
        let mut stale: Vec<u64> = paths
            .iter()
            .filter_map(|p| {
                let rest = p.strip_prefix(&run_dir)?.trim_start_matches('/');
                rest.split_once('/')?.0.parse::<u64>().ok()
            })
            .filter(|s| *s < keep.get())
            .collect();
        stale.sort_unstable();
        stale.dedup();
        for seq in stale {
            self.fs
                .erase(self.seq_dir(run_id, CheckpointSeq::new(seq)))
                .await?;
        }
        Ok(())
    }

    /// Drop every checkpoint of a run.
    pub async fn erase_run(&self, run_id: PipelineRunId) -> Result<()> {
        self.fs.erase(self.run_dir(run_id)).await?;
        debug!(%run_id, "checkpoints erased");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::FilesystemActor;
    use crate::storage::{FsStorage, MemoryStorage, Storage};
    use sluice_core::hash::hash_str;

    fn checkpoint(run_id: PipelineRunId, seq: u64) -> Checkpoint {
        Checkpoint {
            run_id,
            seq: CheckpointSeq::new(seq),
            pipeline_hash: hash_str("rows | discard"),
            created_ms: 1_000 + seq,
            blobs: vec![Some(seq.to_le_bytes().to_vec()), None, Some(vec![])],
        }
    }

    #[tokio::test]
    async fn latest_returns_newest_commit_and_prunes_older() {
        let store_backend = MemoryStorage::new();
        let (fs, _join) = FilesystemActor::spawn(Box::new(store_backend.clone()));
        let store = CheckpointStore::new(fs, "memory://cp/", Codec::None);
        let run = PipelineRunId::new();

        assert!(store.latest(run).await.unwrap().is_none());

        store.commit(&checkpoint(run, 1)).await.unwrap();
        store.commit(&checkpoint(run, 2)).await.unwrap();

        let latest = store.latest(run).await.unwrap().unwrap();
        assert_eq!(latest, checkpoint(run, 2));
        assert_eq!(store.committed(run).await.unwrap(), vec![CheckpointSeq::new(2)]);
    }

    #[tokio::test]
    async fn uncommitted_sequence_is_ignored() {
        let backend = MemoryStorage::new();
        let (fs, _join) = FilesystemActor::spawn(Box::new(backend.clone()));
        let store = CheckpointStore::new(fs, "memory://cp", Codec::None);
        let run = PipelineRunId::new();

        store.commit(&checkpoint(run, 1)).await.unwrap();
        // Blob written for seq 2, but the process died before the manifest.
        backend.insert(
            format!("memory://cp/{run}/{:020}/stage-0000.blob", 2),
            vec![1, 2, 3],
        );

        let latest = store.latest(run).await.unwrap().unwrap();
        assert_eq!(latest.seq, CheckpointSeq::new(1));
    }

    #[tokio::test]
    async fn corrupted_blob_fails_load() {
        let backend = MemoryStorage::new();
        let (fs, _join) = FilesystemActor::spawn(Box::new(backend.clone()));
        let store = CheckpointStore::new(fs, "memory://cp", Codec::None);
        let run = PipelineRunId::new();
        store.commit(&checkpoint(run, 3)).await.unwrap();

        let path = format!("memory://cp/{run}/{:020}/stage-0000.blob", 3);
        let mut framed = backend.read(&path).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        backend.insert(path, framed);

        assert!(matches!(
            store.latest(run).await,
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[tokio::test]
    async fn filesystem_round_trip_and_erase() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let (fs, _join) = FilesystemActor::spawn(Box::new(FsStorage::new()));
        let store = CheckpointStore::new(fs, root.clone(), Codec::None);
        let run = PipelineRunId::new();

        store.commit(&checkpoint(run, 7)).await.unwrap();
        assert_eq!(store.latest(run).await.unwrap().unwrap(), checkpoint(run, 7));

        store.erase_run(run).await.unwrap();
        assert!(store.latest(run).await.unwrap().is_none());
    }
}
