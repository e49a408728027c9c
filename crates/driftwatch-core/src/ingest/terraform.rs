//! Terraform JSON plan normalizer (`terraform show -json <planfile>`).

use driftwatch_model::{Action, AttributeDiff, ResourceChange};
use serde_json::{Map, Value};

use super::PlanNormalizer;
use crate::error::{DriftError, Result};

const KNOWN_AFTER_APPLY: &str = "(known after apply)";
const SENSITIVE: &str = "(sensitive)";

/// Normalizer for the Terraform JSON plan format.
///
/// Provider flavours differ only in which provider-computed attributes are
/// dropped before diffing, since those mirror user-set attributes and would
/// report every tag or label change twice.
#[derive(Debug, Clone)]
pub struct TerraformNormalizer {
    name: &'static str,
    computed_mirrors: &'static [&'static str],
}

impl TerraformNormalizer {
    pub fn generic() -> Self {
        Self {
            name: "terraform",
            computed_mirrors: &[],
        }
    }

    /// AWS: `tags_all` mirrors `tags`.
    pub fn aws() -> Self {
        Self {
            name: "terraform-aws",
            computed_mirrors: &["tags_all"],
        }
    }

    /// GCP: `effective_labels` and `terraform_labels` mirror `labels`.
    pub fn gcp() -> Self {
        Self {
            name: "terraform-gcp",
            computed_mirrors: &["effective_labels", "terraform_labels"],
        }
    }

    fn is_mirrored(&self, path: &str) -> bool {
        self.computed_mirrors
            .iter()
            .any(|attr| path_within(path, attr))
    }

    fn normalize_entry(&self, index: usize, entry: &Value) -> Result<ResourceChange> {
        let entry = entry.as_object().ok_or_else(|| {
            DriftError::malformed(format!("resource_changes[{index}] is not an object"))
        })?;
        let address = entry
            .get("address")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                DriftError::malformed(format!("resource_changes[{index}] has no address"))
            })?;
        let resource_type = entry
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| type_from_address(address));

        let empty = Map::new();
        let change = entry
            .get("change")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let action = map_actions(change.get("actions"));
        if action == Action::NoOp {
            return Ok(ResourceChange::no_op(address, resource_type)?);
        }

        let null = Value::Null;
        let masks = Masks {
            unknown: change.get("after_unknown").unwrap_or(&null),
            before_sensitive: change.get("before_sensitive").unwrap_or(&null),
            after_sensitive: change.get("after_sensitive").unwrap_or(&null),
        };
        let before = change.get("before").unwrap_or(&null);
        let after = change.get("after").unwrap_or(&null);

        let mut diffs = Vec::new();
        diff_values("", before, after, &masks, &mut diffs);
        diffs.retain(|d| !self.is_mirrored(&d.path));

        let replace_paths = replace_paths(change.get("replace_paths"));
        for diff in &mut diffs {
            if replace_paths.iter().any(|rp| path_within(&diff.path, rp)) {
                diff.forces_replacement = true;
            }
        }

        if action == Action::Replace && !diffs.iter().any(|d| d.forces_replacement) {
            if diffs.is_empty() {
                diffs.push(
                    AttributeDiff::new(
                        "",
                        redact(before, masks.before_sensitive),
                        redact(after, masks.after_sensitive),
                    )
                    .forcing_replacement(),
                );
            } else {
                for diff in &mut diffs {
                    diff.forces_replacement = true;
                }
            }
        }

        Ok(ResourceChange::new(address, resource_type, action, diffs)?)
    }
}

impl PlanNormalizer for TerraformNormalizer {
    fn name(&self) -> &str {
        self.name
    }

    fn normalize(&self, plan: &Value) -> Result<Vec<ResourceChange>> {
        let plan = plan
            .as_object()
            .ok_or_else(|| DriftError::malformed("plan is not a JSON object"))?;
        let entries = match plan.get("resource_changes") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(DriftError::malformed("resource_changes is not an array")),
        };
        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| self.normalize_entry(i, entry))
            .collect()
    }
}

/// Map a Terraform `actions` list onto a single action.
fn map_actions(actions: Option<&Value>) -> Action {
    let Some(list) = actions.and_then(Value::as_array) else {
        return Action::Unknown;
    };
    let names: Vec<&str> = list.iter().filter_map(Value::as_str).collect();
    if names.len() != list.len() {
        return Action::Unknown;
    }
    match names.as_slice() {
        ["no-op"] | ["read"] => Action::NoOp,
        ["create"] => Action::Create,
        ["update"] => Action::Update,
        ["delete"] => Action::Delete,
        ["delete", "create"] | ["create", "delete"] => Action::Replace,
        _ => Action::Unknown,
    }
}

/// Sensitivity and unknown-value masks, shaped like the values they cover.
struct Masks<'a> {
    unknown: &'a Value,
    before_sensitive: &'a Value,
    after_sensitive: &'a Value,
}

impl<'a> Masks<'a> {
    fn key(&self, key: &str) -> Masks<'a> {
        Masks {
            unknown: sub_key(self.unknown, key),
            before_sensitive: sub_key(self.before_sensitive, key),
            after_sensitive: sub_key(self.after_sensitive, key),
        }
    }

    fn index(&self, i: usize) -> Masks<'a> {
        Masks {
            unknown: sub_index(self.unknown, i),
            before_sensitive: sub_index(self.before_sensitive, i),
            after_sensitive: sub_index(self.after_sensitive, i),
        }
    }
}

static NULL: Value = Value::Null;
static TRUE: Value = Value::Bool(true);

/// A `true` mask covers everything beneath it.
fn sub_key<'a>(mask: &'a Value, key: &str) -> &'a Value {
    match mask {
        Value::Bool(true) => &TRUE,
        Value::Object(map) => map.get(key).unwrap_or(&NULL),
        _ => &NULL,
    }
}

fn sub_index(mask: &Value, i: usize) -> &Value {
    match mask {
        Value::Bool(true) => &TRUE,
        Value::Array(items) => items.get(i).unwrap_or(&NULL),
        _ => &NULL,
    }
}

/// Copy `value` with every part its sensitivity mask covers replaced by
/// `(sensitive)`. Masks nest like the value, so whole objects and arrays
/// emitted as a single diff are redacted all the way down.
fn redact(value: &Value, sensitive: &Value) -> Value {
    match (value, sensitive) {
        (_, Value::Bool(true)) => Value::String(SENSITIVE.to_string()),
        (Value::Object(map), Value::Object(_)) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), redact(v, sub_key(sensitive, key))))
                .collect(),
        ),
        (Value::Array(items), Value::Array(_)) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| redact(v, sub_index(sensitive, i)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn child_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Recursive before/after diff in deterministic order: object keys sorted,
/// array elements by index.
fn diff_values(
    path: &str,
    before: &Value,
    after: &Value,
    masks: &Masks,
    out: &mut Vec<AttributeDiff>,
) {
    if masks.unknown == &TRUE {
        out.push(AttributeDiff::new(
            path,
            redact(before, masks.before_sensitive),
            Value::String(KNOWN_AFTER_APPLY.to_string()),
        ));
        return;
    }

    let empty = Map::new();
    if before.is_object() || after.is_object() {
        if let (Some(b), Some(a)) = (
            object_or_empty(before, &empty),
            object_or_empty(after, &empty),
        ) {
            let mut keys: Vec<&String> = b.keys().chain(a.keys()).collect();
            if let Value::Object(unknown) = masks.unknown {
                keys.extend(unknown.keys());
            }
            keys.sort();
            keys.dedup();
            for key in keys {
                diff_values(
                    &child_key(path, key),
                    b.get(key).unwrap_or(&NULL),
                    a.get(key).unwrap_or(&NULL),
                    &masks.key(key),
                    out,
                );
            }
            return;
        }
    }

    match (before, after) {
        (Value::Array(b), Value::Array(a)) => {
            let mut len = b.len().max(a.len());
            if let Value::Array(unknown) = masks.unknown {
                len = len.max(unknown.len());
            }
            for i in 0..len {
                diff_values(
                    &format!("{path}[{i}]"),
                    b.get(i).unwrap_or(&NULL),
                    a.get(i).unwrap_or(&NULL),
                    &masks.index(i),
                    out,
                );
            }
        }
        _ if before != after => out.push(AttributeDiff::new(
            path,
            redact(before, masks.before_sensitive),
            redact(after, masks.after_sensitive),
        )),
        _ => {}
    }
}

/// Objects diff against a missing (null) counterpart key by key.
fn object_or_empty<'a>(
    value: &'a Value,
    empty: &'a Map<String, Value>,
) -> Option<&'a Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => Some(empty),
        _ => None,
    }
}

/// Render `replace_paths` entries (`[["network", 0, "ip"]]`) as diff paths.
fn replace_paths(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(paths)) = value else {
        return Vec::new();
    };
    paths
        .iter()
        .filter_map(Value::as_array)
        .map(|steps| {
            let mut rendered = String::new();
            for step in steps {
                match step {
                    Value::Number(n) => rendered.push_str(&format!("[{n}]")),
                    Value::String(s) => rendered = child_key(&rendered, s),
                    _ => {}
                }
            }
            rendered
        })
        .collect()
}

/// `path` equals `prefix` or lies beneath it. An empty prefix covers everything.
fn path_within(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || path == prefix {
        return true;
    }
    path.strip_prefix(prefix)
        .map(|rest| rest.starts_with('.') || rest.starts_with('['))
        .unwrap_or(false)
}

/// `module.net.aws_subnet.private["a"]` -> `aws_subnet`.
pub(super) fn type_from_address(address: &str) -> String {
    let base = address.split('[').next().unwrap_or(address);
    let segments: Vec<&str> = base.split('.').collect();
    if segments.len() >= 2 {
        segments[segments.len() - 2].to_string()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize_one(normalizer: &TerraformNormalizer, entry: Value) -> ResourceChange {
        let mut changes = normalizer
            .normalize(&json!({ "resource_changes": [entry] }))
            .unwrap();
        assert_eq!(changes.len(), 1);
        changes.remove(0)
    }

    #[test]
    fn action_mapping() {
        assert_eq!(map_actions(Some(&json!(["no-op"]))), Action::NoOp);
        assert_eq!(map_actions(Some(&json!(["read"]))), Action::NoOp);
        assert_eq!(map_actions(Some(&json!(["create"]))), Action::Create);
        assert_eq!(map_actions(Some(&json!(["update"]))), Action::Update);
        assert_eq!(map_actions(Some(&json!(["delete"]))), Action::Delete);
        assert_eq!(map_actions(Some(&json!(["delete", "create"]))), Action::Replace);
        assert_eq!(map_actions(Some(&json!(["create", "delete"]))), Action::Replace);
        assert_eq!(map_actions(Some(&json!(["forget"]))), Action::Unknown);
        assert_eq!(map_actions(None), Action::Unknown);
    }

    #[test]
    fn update_produces_sorted_nested_diffs() {
        let change = normalize_one(
            &TerraformNormalizer::generic(),
            json!({
                "address": "aws_instance.web",
                "type": "aws_instance",
                "change": {
                    "actions": ["update"],
                    "before": {
                        "tags": {"team": "a", "env": "prod"},
                        "ami": "ami-1",
                        "ports": [80]
                    },
                    "after": {
                        "tags": {"team": "b", "env": "prod"},
                        "ami": "ami-1",
                        "ports": [80, 443]
                    }
                }
            }),
        );
        let paths: Vec<&str> = change.attribute_diffs().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["ports[1]", "tags.team"]);
        assert_eq!(change.attribute_diffs()[0].new_value, json!(443));
    }

    #[test]
    fn unknown_and_sensitive_values_are_masked() {
        let change = normalize_one(
            &TerraformNormalizer::generic(),
            json!({
                "address": "aws_db_instance.main",
                "type": "aws_db_instance",
                "change": {
                    "actions": ["update"],
                    "before": {"password": "old", "endpoint": "db.internal"},
                    "after": {"password": "new"},
                    "after_unknown": {"endpoint": true},
                    "before_sensitive": {"password": true},
                    "after_sensitive": {"password": true}
                }
            }),
        );
        let diffs = change.attribute_diffs();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "endpoint");
        assert_eq!(diffs[0].new_value, json!(KNOWN_AFTER_APPLY));
        assert_eq!(diffs[1].path, "password");
        assert_eq!(diffs[1].old_value, json!(SENSITIVE));
        assert_eq!(diffs[1].new_value, json!(SENSITIVE));
    }

    #[test]
    fn root_diff_redacts_nested_sensitive_attributes() {
        let attrs = json!({"password": "hunter2", "username": "admin"});
        let change = normalize_one(
            &TerraformNormalizer::generic(),
            json!({
                "address": "aws_db_instance.main",
                "type": "aws_db_instance",
                "change": {
                    "actions": ["delete", "create"],
                    "before": attrs,
                    "after": attrs,
                    "before_sensitive": {"password": true},
                    "after_sensitive": {"password": true}
                }
            }),
        );
        let root = &change.attribute_diffs()[0];
        assert_eq!(root.path, "");
        let expected = json!({"password": SENSITIVE, "username": "admin"});
        assert_eq!(root.old_value, expected);
        assert_eq!(root.new_value, expected);
    }

    #[test]
    fn shape_change_redacts_sensitive_elements() {
        let change = normalize_one(
            &TerraformNormalizer::generic(),
            json!({
                "address": "aws_instance.web",
                "type": "aws_instance",
                "change": {
                    "actions": ["update"],
                    "before": {"user_data_secrets": null},
                    "after": {"user_data_secrets": ["s3cr3t-token", {"key": "k", "value": "v"}]},
                    "after_sensitive": {"user_data_secrets": [true, {"value": true}]}
                }
            }),
        );
        let diffs = change.attribute_diffs();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "user_data_secrets");
        assert_eq!(diffs[0].old_value, Value::Null);
        assert_eq!(
            diffs[0].new_value,
            json!([SENSITIVE, {"key": "k", "value": SENSITIVE}])
        );
        let rendered = serde_json::to_string(&change).unwrap();
        assert!(!rendered.contains("s3cr3t-token"));
    }

    #[test]
    fn replace_paths_mark_forcing_diffs() {
        let change = normalize_one(
            &TerraformNormalizer::generic(),
            json!({
                "address": "aws_instance.web",
                "type": "aws_instance",
                "change": {
                    "actions": ["delete", "create"],
                    "before": {"ami": "ami-1", "instance_type": "t3.micro"},
                    "after": {"ami": "ami-2", "instance_type": "t3.small"},
                    "replace_paths": [["ami"]]
                }
            }),
        );
        assert_eq!(change.action(), Action::Replace);
        let forcing: Vec<&str> = change
            .attribute_diffs()
            .iter()
            .filter(|d| d.forces_replacement)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(forcing, vec!["ami"]);
    }

    #[test]
    fn replace_without_diffs_gets_root_diff() {
        let change = normalize_one(
            &TerraformNormalizer::generic(),
            json!({
                "address": "null_resource.trigger",
                "change": { "actions": ["create", "delete"], "before": {}, "after": {} }
            }),
        );
        assert_eq!(change.resource_type(), "null_resource");
        assert_eq!(change.attribute_diffs().len(), 1);
        assert_eq!(change.attribute_diffs()[0].path, "");
        assert!(change.attribute_diffs()[0].forces_replacement);
    }

    #[test]
    fn aws_drops_tags_all_gcp_drops_label_mirrors() {
        let aws = normalize_one(
            &TerraformNormalizer::aws(),
            json!({
                "address": "aws_s3_bucket.logs",
                "type": "aws_s3_bucket",
                "change": {
                    "actions": ["update"],
                    "before": {"tags": {"a": "1"}, "tags_all": {"a": "1"}},
                    "after": {"tags": {"a": "2"}, "tags_all": {"a": "2"}}
                }
            }),
        );
        let paths: Vec<&str> = aws.attribute_diffs().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["tags.a"]);

        let gcp = normalize_one(
            &TerraformNormalizer::gcp(),
            json!({
                "address": "google_storage_bucket.logs",
                "type": "google_storage_bucket",
                "change": {
                    "actions": ["update"],
                    "before": {
                        "labels": {"a": "1"},
                        "effective_labels": {"a": "1"},
                        "terraform_labels": {"a": "1"}
                    },
                    "after": {
                        "labels": {"a": "2"},
                        "effective_labels": {"a": "2"},
                        "terraform_labels": {"a": "2"}
                    }
                }
            }),
        );
        let paths: Vec<&str> = gcp.attribute_diffs().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["labels.a"]);
    }

    #[test]
    fn missing_resource_changes_means_no_changes() {
        let changes = TerraformNormalizer::generic()
            .normalize(&json!({"format_version": "1.2"}))
            .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn entry_without_address_is_malformed() {
        let err = TerraformNormalizer::generic()
            .normalize(&json!({"resource_changes": [{"type": "aws_vpc"}]}))
            .unwrap_err();
        match err {
            DriftError::MalformedDocument { reason } => assert!(reason.contains("[0]")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_object_plan_is_malformed() {
        let err = TerraformNormalizer::generic()
            .normalize(&json!(["not", "a", "plan"]))
            .unwrap_err();
        assert!(matches!(err, DriftError::MalformedDocument { .. }));
    }

    #[test]
    fn missing_change_block_is_unknown_action() {
        let change = normalize_one(
            &TerraformNormalizer::generic(),
            json!({ "address": "aws_vpc.main", "type": "aws_vpc" }),
        );
        assert_eq!(change.action(), Action::Unknown);
        assert!(change.attribute_diffs().is_empty());
    }

    #[test]
    fn path_prefix_rules() {
        assert!(path_within("tags_all.a", "tags_all"));
        assert!(path_within("tags_all", "tags_all"));
        assert!(path_within("network[0].ip", "network"));
        assert!(!path_within("tags_allowed", "tags_all"));
        assert!(path_within("anything", ""));
    }

    #[test]
    fn type_is_derived_from_module_address() {
        assert_eq!(
            type_from_address(r#"module.net.aws_subnet.private["a"]"#),
            "aws_subnet"
        );
        assert_eq!(type_from_address("aws_vpc.main"), "aws_vpc");
        assert_eq!(type_from_address("orphan"), "unknown");
    }
}
