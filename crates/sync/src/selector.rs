//! Equality-based label selector.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use vsync_core::Selector;

/// Matches when every `key=value` pair is present on the object. An empty
/// selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new(match_labels: BTreeMap<String, String>) -> Self { Self { match_labels } }

    pub fn is_empty(&self) -> bool { self.match_labels.is_empty() }
}

impl Selector for LabelSelector {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.match_labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(","))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for LabelSelector {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self::new(pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}
