//! Change documents stay well-formed across the serialization boundary.

use driftwatch_model::{
    Action, AttributeDiff, ChangeDocument, Cloud, Environment, ModelError, ResourceChange,
    TargetKey,
};
use serde_json::json;

fn prod_doc(changes: serde_json::Value) -> serde_json::Value {
    json!({
        "cloud": "aws",
        "environment": "prod",
        "generated_at": "2026-01-01T00:00:00Z",
        "changes": changes,
    })
}

#[test]
fn stored_documents_reject_duplicate_addresses() {
    let raw = prod_doc(json!([
        {"address": "aws_vpc.main", "resource_type": "aws_vpc", "action": "update"},
        {"address": "aws_vpc.main", "resource_type": "aws_vpc", "action": "delete"},
    ]));
    let err = serde_json::from_value::<ChangeDocument>(raw).unwrap_err();
    assert!(err.to_string().contains("duplicate resource address"));
}

#[test]
fn stored_replace_without_forcing_diff_is_rejected() {
    let raw = prod_doc(json!([{
        "address": "aws_instance.web",
        "resource_type": "aws_instance",
        "action": "replace",
        "attribute_diffs": [{"path": "ami", "old_value": "a", "new_value": "b"}],
    }]));
    assert!(serde_json::from_value::<ChangeDocument>(raw).is_err());
}

#[test]
fn document_json_keeps_address_order_and_digest() {
    let web = ResourceChange::new(
        "aws_instance.web",
        "aws_instance",
        Action::Replace,
        vec![AttributeDiff::new("ami", json!("ami-1"), json!("ami-2")).forcing_replacement()],
    )
    .unwrap();
    let bucket = ResourceChange::no_op("aws_s3_bucket.logs", "aws_s3_bucket").unwrap();
    let doc = ChangeDocument::new(
        Cloud::Aws,
        Environment::new("prod").unwrap(),
        "2026-01-01T00:00:00Z".parse().unwrap(),
        vec![web, bucket],
    )
    .unwrap();

    let value = serde_json::to_value(&doc).unwrap();
    let addresses: Vec<_> = value["changes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["address"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(addresses, ["aws_instance.web", "aws_s3_bucket.logs"]);

    let back: ChangeDocument = serde_json::from_value(value).unwrap();
    assert_eq!(back.digest().unwrap(), doc.digest().unwrap());
    assert_eq!(back.drifted().count(), 1);
}

#[test]
fn target_keys_normalize_cloud_names() {
    let key = TargetKey::parse(" GCP ", "staging").unwrap();
    assert_eq!(key.to_string(), "gcp/staging");
    assert_eq!(
        TargetKey::parse("azure", "prod").unwrap().cloud,
        Cloud::Other("azure".to_string())
    );
    assert!(matches!(
        TargetKey::parse("aws", "team/prod"),
        Err(ModelError::Invalid { kind: "environment", .. })
    ));
}
