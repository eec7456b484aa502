use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Labels = BTreeMap<String, String>;

/// Equality-based label selector.
///
/// A set of labels matches when every selector pair is present with the
/// same value. Extra labels on the target are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(Labels);

impl Selector {
    pub fn new(labels: Labels) -> Self {
        Self(labels)
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &Labels {
        &self.0
    }
}

impl From<Labels> for Selector {
    fn from(labels: Labels) -> Self {
        Self(labels)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Selector {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(labels(pairs))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", pairs.join(","))
    }
}

/// Build a label map from string pairs.
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
