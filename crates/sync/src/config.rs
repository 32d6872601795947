//! Syncer configuration, loaded from YAML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vsync_core::PatchRule;

use crate::selector::LabelSelector;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Instance suffix appended to every physical name.
    pub suffix: String,
    /// Namespace physical objects are created in.
    pub target_namespace: String,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub from_virtual_cluster: FromVirtualCluster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromVirtualCluster {
    pub kind: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorConfig>,
    /// Forward rules (virtual→physical).
    #[serde(default)]
    pub patches: Vec<PatchRule>,
    /// Reverse rules (physical→virtual).
    #[serde(default)]
    pub reverse_patches: Vec<PatchRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    #[serde(default)]
    pub label_selector: BTreeMap<String, String>,
}

impl FromVirtualCluster {
    pub fn new(kind: &str, api_version: &str) -> Self {
        Self {
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            selector: None,
            patches: Vec::new(),
            reverse_patches: Vec::new(),
        }
    }

    /// `None` when no selector (or an empty one) is configured: everything matches.
    pub fn label_selector(&self) -> Option<LabelSelector> {
        self.selector
            .as_ref()
            .filter(|s| !s.label_selector.is_empty())
            .map(|s| LabelSelector::new(s.label_selector.clone()))
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.suffix.trim().is_empty() {
            return Err(ConfigError::Invalid("suffix must not be empty".into()));
        }
        if self.target_namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("targetNamespace must not be empty".into()));
        }
        for (i, m) in self.mappings.iter().enumerate() {
            let fv = &m.from_virtual_cluster;
            if fv.kind.is_empty() {
                return Err(ConfigError::Invalid(format!("mappings[{i}]: kind must not be empty")));
            }
            if fv.api_version.is_empty() {
                return Err(ConfigError::Invalid(format!("mappings[{i}] ({}): apiVersion must not be empty", fv.kind)));
            }
        }
        Ok(())
    }

    /// First mapping for `kind` (and `api_version`, when given).
    pub fn mapping_for(&self, kind: &str, api_version: Option<&str>) -> Option<&FromVirtualCluster> {
        self.mappings
            .iter()
            .map(|m| &m.from_virtual_cluster)
            .find(|fv| fv.kind == kind && api_version.map_or(true, |av| fv.api_version == av))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
suffix: vc
targetNamespace: host
mappings:
  - fromVirtualCluster:
      kind: Widget
      apiVersion: example.com/v1
      selector:
        labelSelector:
          env: prod
      patches:
        - op: copyFromObject
          fromPath: spec
          path: spec
      reversePatches:
        - op: copyFromObject
          fromPath: status
          path: status
  - fromVirtualCluster:
      kind: Gadget
      apiVersion: example.com/v1
"#;

    #[test]
    fn parses_sample() {
        let cfg = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(cfg.suffix, "vc");
        assert_eq!(cfg.mappings.len(), 2);
        let w = cfg.mapping_for("Widget", None).unwrap();
        assert_eq!(w.patches.len(), 1);
        assert_eq!(w.reverse_patches.len(), 1);
        assert_eq!(w.label_selector().unwrap().to_string(), "env=prod");
        let g = cfg.mapping_for("Gadget", Some("example.com/v1")).unwrap();
        assert!(g.label_selector().is_none());
        assert!(g.patches.is_empty());
        assert!(cfg.mapping_for("Gadget", Some("example.com/v2")).is_none());
    }

    #[test]
    fn rejects_missing_suffix() {
        let e = Config::from_yaml("suffix: ''\ntargetNamespace: host\n").unwrap_err();
        assert!(matches!(e, ConfigError::Invalid(_)), "{e}");
        let e = Config::from_yaml("targetNamespace: host\n").unwrap_err();
        assert!(matches!(e, ConfigError::Parse(_)), "{e}");
    }

    #[test]
    fn rejects_empty_kind() {
        let yaml = "suffix: vc\ntargetNamespace: host\nmappings:\n  - fromVirtualCluster:\n      kind: ''\n      apiVersion: v1\n";
        let e = Config::from_yaml(yaml).unwrap_err();
        assert!(e.to_string().contains("kind must not be empty"), "{e}");
    }

    #[test]
    fn empty_selector_means_everything() {
        let mut fv = FromVirtualCluster::new("Widget", "example.com/v1");
        fv.selector = Some(SelectorConfig::default());
        assert!(fv.label_selector().is_none());
    }
}
