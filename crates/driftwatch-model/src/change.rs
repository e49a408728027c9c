//! Normalized change-document model.
//!
//! A [`ChangeDocument`] is the provider-independent form of one planning pass
//! for one target. Both types validate their invariants at construction and
//! on deserialization, so every value in circulation is well-formed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::digest_of;
use crate::error::{ModelError, Result};
use crate::target::{Cloud, Environment, TargetKey};

/// Planned action for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoOp,
    Create,
    Update,
    Delete,
    Replace,
    /// An action string the ingestor did not recognize.
    Unknown,
}

impl Action {
    /// Fixed severity ordering: `delete = replace > update > unknown > create > no_op`.
    pub fn rank(self) -> u8 {
        match self {
            Action::Delete | Action::Replace => 4,
            Action::Update => 3,
            Action::Unknown => 2,
            Action::Create => 1,
            Action::NoOp => 0,
        }
    }

    /// Whether this action counts as drift.
    pub fn is_drift(self) -> bool {
        self != Action::NoOp
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::NoOp => "no_op",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Replace => "replace",
            Action::Unknown => "unknown",
        }
    }

    /// Plan-style marker used in rendered reports.
    pub fn symbol(self) -> &'static str {
        match self {
            Action::NoOp => " ",
            Action::Create => "+",
            Action::Update => "~",
            Action::Delete => "-",
            Action::Replace => "-/+",
            Action::Unknown => "?",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "no_op" => Ok(Action::NoOp),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "replace" => Ok(Action::Replace),
            "unknown" => Ok(Action::Unknown),
            other => Err(ModelError::Invalid {
                kind: "action",
                value: other.to_string(),
            }),
        }
    }
}

/// One attribute-level difference inside a resource change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDiff {
    /// Attribute path, e.g. `ingress[0].cidr_blocks`. Empty for the whole resource.
    pub path: String,
    pub old_value: Value,
    pub new_value: Value,
    /// The attribute cannot be updated in place.
    #[serde(default)]
    pub forces_replacement: bool,
}

impl AttributeDiff {
    pub fn new(path: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            path: path.into(),
            old_value,
            new_value,
            forces_replacement: false,
        }
    }

    pub fn forcing_replacement(mut self) -> Self {
        self.forces_replacement = true;
        self
    }
}

/// A planned modification to a single infrastructure resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResourceChangeRepr")]
pub struct ResourceChange {
    address: String,
    resource_type: String,
    action: Action,
    attribute_diffs: Vec<AttributeDiff>,
}

#[derive(Deserialize)]
struct ResourceChangeRepr {
    address: String,
    resource_type: String,
    action: Action,
    #[serde(default)]
    attribute_diffs: Vec<AttributeDiff>,
}

impl TryFrom<ResourceChangeRepr> for ResourceChange {
    type Error = ModelError;

    fn try_from(repr: ResourceChangeRepr) -> Result<Self> {
        ResourceChange::new(
            repr.address,
            repr.resource_type,
            repr.action,
            repr.attribute_diffs,
        )
    }
}

impl ResourceChange {
    /// Build a change, enforcing:
    /// - `no_op` carries no attribute diffs
    /// - `replace` has at least one diff marking a non-updatable field
    pub fn new(
        address: impl Into<String>,
        resource_type: impl Into<String>,
        action: Action,
        attribute_diffs: Vec<AttributeDiff>,
    ) -> Result<Self> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(ModelError::InvariantViolation {
                address,
                reason: "resource address must not be empty".to_string(),
            });
        }
        if action == Action::NoOp && !attribute_diffs.is_empty() {
            return Err(ModelError::InvariantViolation {
                address,
                reason: "no_op change carries attribute diffs".to_string(),
            });
        }
        if action == Action::Replace && !attribute_diffs.iter().any(|d| d.forces_replacement) {
            return Err(ModelError::InvariantViolation {
                address,
                reason: "replace change has no attribute forcing replacement".to_string(),
            });
        }
        Ok(Self {
            address,
            resource_type: resource_type.into(),
            action,
            attribute_diffs,
        })
    }

    /// Shorthand for an unchanged resource.
    pub fn no_op(address: impl Into<String>, resource_type: impl Into<String>) -> Result<Self> {
        Self::new(address, resource_type, Action::NoOp, Vec::new())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn attribute_diffs(&self) -> &[AttributeDiff] {
        &self.attribute_diffs
    }

    /// Content fingerprint over type, action and diffs (address excluded).
    ///
    /// Two changes to the same address are "equivalent" exactly when their
    /// fingerprints match.
    pub fn fingerprint(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Content<'a> {
            resource_type: &'a str,
            action: Action,
            attribute_diffs: &'a [AttributeDiff],
        }
        digest_of(&Content {
            resource_type: &self.resource_type,
            action: self.action,
            attribute_diffs: &self.attribute_diffs,
        })
    }
}

/// The full output of one planning pass for one (cloud, environment).
///
/// Immutable once constructed: fields are private and changes are held in
/// address order, unique by address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChangeDocumentRepr", into = "ChangeDocumentRepr")]
pub struct ChangeDocument {
    cloud: Cloud,
    environment: Environment,
    generated_at: DateTime<Utc>,
    changes: BTreeMap<String, ResourceChange>,
}

#[derive(Serialize, Deserialize)]
struct ChangeDocumentRepr {
    cloud: Cloud,
    environment: Environment,
    generated_at: DateTime<Utc>,
    #[serde(default)]
    changes: Vec<ResourceChange>,
}

impl TryFrom<ChangeDocumentRepr> for ChangeDocument {
    type Error = ModelError;

    fn try_from(repr: ChangeDocumentRepr) -> Result<Self> {
        ChangeDocument::new(repr.cloud, repr.environment, repr.generated_at, repr.changes)
    }
}

impl From<ChangeDocument> for ChangeDocumentRepr {
    fn from(doc: ChangeDocument) -> Self {
        Self {
            cloud: doc.cloud,
            environment: doc.environment,
            generated_at: doc.generated_at,
            changes: doc.changes.into_values().collect(),
        }
    }
}

impl ChangeDocument {
    /// Build a document; fails with `DuplicateResource` on a repeated address.
    pub fn new(
        cloud: Cloud,
        environment: Environment,
        generated_at: DateTime<Utc>,
        changes: Vec<ResourceChange>,
    ) -> Result<Self> {
        let mut by_address = BTreeMap::new();
        for change in changes {
            let address = change.address.clone();
            if by_address.insert(address.clone(), change).is_some() {
                return Err(ModelError::DuplicateResource { address });
            }
        }
        Ok(Self {
            cloud,
            environment,
            generated_at,
            changes: by_address,
        })
    }

    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn target(&self) -> TargetKey {
        TargetKey::new(self.cloud.clone(), self.environment.clone())
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Changes in address order.
    pub fn changes(&self) -> impl Iterator<Item = &ResourceChange> {
        self.changes.values()
    }

    pub fn get(&self, address: &str) -> Option<&ResourceChange> {
        self.changes.get(address)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changes whose action is anything other than `no_op`.
    pub fn drifted(&self) -> impl Iterator<Item = &ResourceChange> {
        self.changes.values().filter(|c| c.action.is_drift())
    }

    /// Content hash of the whole document, stored in history when the
    /// document itself is not retained.
    pub fn digest(&self) -> Result<String> {
        digest_of(self)
    }
}
