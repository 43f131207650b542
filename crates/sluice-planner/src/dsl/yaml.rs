//! YAML pipeline documents.
//!
//! A document carries either pipeline text or an explicit step list, plus an
//! optional engine config block:
//! ```yaml
//! config:
//!   channel_capacity: 8
//! steps:
//!   - op: rows
//!     data: [{a: 1}, {a: 2}]
//!   - op: where
//!     expr: "a > 1"
//!   - op: head
//!     args: 5
//! ```
//! or
//! ```yaml
//! pipeline: "rows [{\"a\": 1}] | where a > 0"
//! ```
//! Step keys other than `op` are the operator's spec arguments. A lone
//! `args` key stands for the whole argument value. Keys of the `config`
//! block override a base configuration one by one; absent keys keep the
//! base value.

use serde::{Deserialize, Serialize};

use sluice_core::config::EngineConfig;
use sluice_operators::{OperatorSpec, Registry};

use crate::error::{PlanError, Result};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub op: String,
    #[serde(flatten)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl Step {
    fn to_spec(&self) -> OperatorSpec {
        let args = match self.args.len() {
            0 => serde_json::Value::Null,
            1 if self.args.contains_key("args") => self.args["args"].clone(),
            _ => serde_json::Value::Object(self.args.clone()),
        };
        OperatorSpec::new(self.op.clone(), args)
    }

    fn from_spec(spec: OperatorSpec) -> Self {
        let args = match spec.args {
            serde_json::Value::Null => serde_json::Map::new(),
            serde_json::Value::Object(map)
                if !map.is_empty()
                    && !map.contains_key("op")
                    && !(map.len() == 1 && map.contains_key("args")) =>
            {
                map
            }
            other => {
                let mut map = serde_json::Map::new();
                map.insert("args".to_string(), other);
                map
            }
        };
        Self { op: spec.name, args }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub pipeline: Pipeline,
    /// The document's `config` block, as written.
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ParsedPipeline {
    /// `base` with the document's config keys laid over it.
    pub fn engine_config(&self, base: &EngineConfig) -> Result<EngineConfig> {
        let Some(overrides) = &self.config else {
            return Ok(base.clone());
        };
        let mut merged = match serde_json::to_value(base) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        let config: EngineConfig = serde_json::from_value(serde_json::Value::Object(merged))
            .map_err(|e| PlanError::Document(format!("invalid config block: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

pub fn parse_yaml_pipeline(src: &str, registry: &Registry) -> Result<ParsedPipeline> {
    let doc: PipelineDocument = serde_yaml::from_str(src)?;
    let pipeline = match (&doc.pipeline, doc.steps.is_empty()) {
        (Some(text), true) => Pipeline::parse(text, registry)?,
        (None, false) => {
            let specs: Vec<OperatorSpec> = doc.steps.iter().map(Step::to_spec).collect();
            Pipeline::from_specs(&specs, registry)?
        }
        (Some(_), false) => {
            return Err(PlanError::Document(
                "give either `pipeline` or `steps`, not both".into(),
            ))
        }
        (None, true) => {
            return Err(PlanError::Document(
                "document has neither `pipeline` nor `steps`".into(),
            ))
        }
    };
    let parsed = ParsedPipeline {
        pipeline,
        config: doc.config,
    };
    parsed.engine_config(&EngineConfig::default())?;
    Ok(parsed)
}

/// Render `pipeline` as a step-list document.
pub fn to_yaml(pipeline: &Pipeline, config: Option<&EngineConfig>) -> Result<String> {
    let config = match config.map(serde_json::to_value).transpose() {
        Ok(Some(serde_json::Value::Object(map))) => Some(map),
        Ok(_) => None,
        Err(e) => return Err(PlanError::Document(format!("config not serializable: {e}"))),
    };
    let doc = PipelineDocument {
        config,
        pipeline: None,
        steps: pipeline.specs()?.into_iter().map(Step::from_spec).collect(),
    };
    Ok(serde_yaml::to_string(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_list() {
        let registry = Registry::builtin();
        let src = r#"
config:
  channel_capacity: 8
steps:
  - op: rows
    data: [{a: 1}, {a: 2}, {a: 3}]
  - op: where
    expr: "a > 1"
  - op: head
    args: 2
  - op: discard
"#;
        let parsed = parse_yaml_pipeline(src, &registry).unwrap();
        let names: Vec<_> = parsed.pipeline.operators().iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["rows", "where", "slice", "discard"]);
        let base = EngineConfig {
            optimizer_max_iterations: 3,
            ..EngineConfig::default()
        };
        let config = parsed.engine_config(&base).unwrap();
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.optimizer_max_iterations, 3);
    }

    #[test]
    fn parses_pipeline_text() {
        let registry = Registry::builtin();
        let src = "pipeline: 'rows [{\"a\": 1}] | select a'\n";
        let parsed = parse_yaml_pipeline(src, &registry).unwrap();
        assert_eq!(parsed.pipeline.len(), 2);
        assert!(parsed.config.is_none());
    }

    #[test]
    fn rejects_ambiguous_documents() {
        let registry = Registry::builtin();
        let both = "pipeline: pass\nsteps:\n  - op: pass\n";
        assert!(matches!(
            parse_yaml_pipeline(both, &registry),
            Err(PlanError::Document(_))
        ));
        assert!(matches!(
            parse_yaml_pipeline("config: {}\n", &registry),
            Err(PlanError::Document(_))
        ));
        assert!(parse_yaml_pipeline("steps: [", &registry).is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let registry = Registry::builtin();
        let original = Pipeline::parse(
            r#"rows [{"a": 1, "b": "x"}] | where a >= 1 | select a, b | head 3 | sort a --desc"#,
            &registry,
        )
        .unwrap();
        let config = EngineConfig {
            channel_capacity: 2,
            ..EngineConfig::default()
        };
        let text = to_yaml(&original, Some(&config)).unwrap();
        let parsed = parse_yaml_pipeline(&text, &registry).unwrap();
        assert_eq!(parsed.pipeline, original);
        assert_eq!(
            parsed.engine_config(&EngineConfig::default()).unwrap(),
            config
        );
    }

    #[test]
    fn rejects_an_invalid_config_block() {
        let registry = Registry::builtin();
        let src = "config:\n  channel_capacity: 0\npipeline: pass\n";
        assert!(parse_yaml_pipeline(src, &registry).is_err());
        let src = "config:\n  checkpoint_codec: brotli\npipeline: pass\n";
        assert!(matches!(
            parse_yaml_pipeline(src, &registry),
            Err(PlanError::Document(_))
        ));
    }
}
