//! On-disk pipeline configuration. Loaded once at startup with
//! `serde_yaml`, the way the daemon's own config loader works, then turned
//! into `PipelineDef`s through the `FilterRegistry`.

use crate::error::{PipelineError, PipelineResult};
use crate::filter::Filter;
use crate::filters::FilterRegistry;
use crate::pipeline::PipelineDef;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// One filter entry in a pipeline definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub filter_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One named pipeline: an ordered list of filters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub name: String,
    pub filters: Vec<FilterConfig>,
}

/// Top-level configuration file: every pipeline the proxy wires up at
/// startup, keyed by name so filters can reference each other as
/// sub-pipelines.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

impl SystemConfig {
    pub fn from_yaml(contents: &str) -> PipelineResult<SystemConfig> {
        serde_yaml::from_str(contents).map_err(PipelineError::from)
    }

    pub fn load_file(path: &std::path::Path) -> PipelineResult<SystemConfig> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Builds every `PipelineDef` named in this config against `registry`.
    /// Sub-pipeline name resolution happens later, at `instantiate()` time,
    /// against a `StaticNamespace` built from the returned defs.
    pub fn build_defs(&self, registry: &FilterRegistry) -> PipelineResult<Vec<Rc<PipelineDef>>> {
        let mut defs = Vec::with_capacity(self.pipelines.len());
        for pipeline_cfg in &self.pipelines {
            let mut filters: Vec<Box<dyn Filter>> = Vec::with_capacity(pipeline_cfg.filters.len());
            for filter_cfg in &pipeline_cfg.filters {
                filters.push(registry.create(&filter_cfg.filter_type, &filter_cfg.params)?);
            }
            defs.push(PipelineDef::new(pipeline_cfg.name.clone(), filters));
        }
        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_config() {
        let yaml = r#"
pipelines:
  - name: echo
    filters:
      - type: pass-through
"#;
        let config = SystemConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(config.pipelines[0].name, "echo");
        assert_eq!(config.pipelines[0].filters[0].filter_type, "pass-through");
    }
}
