//! Cloud / environment identity of a detection target.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ModelError;

/// Names become history path segments, so they must be a single
/// non-hidden component: no separators, no leading `.` (covers `.` and `..`).
fn is_plain_segment(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

/// Cloud provider a change document was planned against.
///
/// Unknown provider names are kept as `Other` so new clouds can be wired in
/// by registering a normalizer, without touching this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cloud {
    Aws,
    Gcp,
    Other(String),
}

impl Cloud {
    pub fn as_str(&self) -> &str {
        match self {
            Cloud::Aws => "aws",
            Cloud::Gcp => "gcp",
            Cloud::Other(name) => name,
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cloud {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if !is_plain_segment(&name) {
            return Err(ModelError::Invalid {
                kind: "cloud",
                value: s.to_string(),
            });
        }
        Ok(match name.as_str() {
            "aws" => Cloud::Aws,
            "gcp" | "google" => Cloud::Gcp,
            _ => Cloud::Other(name),
        })
    }
}

impl Serialize for Cloud {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Cloud {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Deployment environment name (e.g. `prod`).
///
/// Only emptiness, path separators and a leading `.` are rejected here; membership in the
/// configured environment set is checked by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if !is_plain_segment(trimmed) {
            return Err(ModelError::Invalid {
                kind: "environment",
                value: name,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Environment {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Environment::new(s)
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Environment::new(raw).map_err(serde::de::Error::custom)
    }
}

/// The (cloud, environment) pair every run, baseline and history entry is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub cloud: Cloud,
    pub environment: Environment,
}

impl TargetKey {
    pub fn new(cloud: Cloud, environment: Environment) -> Self {
        Self { cloud, environment }
    }

    /// Parse `cloud` and `environment` strings into a key.
    pub fn parse(cloud: &str, environment: &str) -> crate::Result<Self> {
        Ok(Self {
            cloud: cloud.parse()?,
            environment: environment.parse()?,
        })
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cloud, self.environment)
    }
}
