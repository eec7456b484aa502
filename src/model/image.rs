use crate::{Result, TinykubeError};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TAG: &str = "latest";

/// Immutable container image reference: `name[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            digest: None,
        }
    }

    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| TinykubeError::InvalidImageRef {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => {
                let (algorithm, hex) = digest
                    .split_once(':')
                    .ok_or_else(|| invalid("digest must be <algorithm>:<hex>"))?;
                if algorithm.is_empty()
                    || hex.is_empty()
                    || !hex.chars().all(|c| c.is_ascii_hexdigit())
                {
                    return Err(invalid("digest must be <algorithm>:<hex>"));
                }
                (rest, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon before the last slash belongs to a registry host:port.
        let name_start = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&rest[..split], &rest[split + 1..])
            }
            None => (rest, DEFAULT_TAG),
        };

        if name.is_empty() {
            return Err(invalid("missing image name"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if name.chars().any(char::is_whitespace) || tag.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace in reference"));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = TinykubeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}
