//! End-to-end drift scenarios: ingest -> classify -> alert, without I/O.

mod common;

use chrono::{TimeZone, Utc};
use driftwatch_core::{
    classify, ingest, should_alert, AlertReason, Classifier, RawPlan, SeverityPolicy,
    StillDriftedRule,
};
use driftwatch_model::{
    Action, AttributeDiff, ChangeDocument, Cloud, Environment, ResourceChange, RunId, Severity,
    VerdictStatus,
};
use serde_json::json;

use common::tf_plan;

fn prod() -> Environment {
    Environment::new("prod").unwrap()
}

fn vpc_doc() -> ChangeDocument {
    let change = ResourceChange::new(
        "vpc/main",
        "aws_vpc",
        Action::Update,
        vec![AttributeDiff::new(
            "cidr",
            json!("10.0.0.0/16"),
            json!("10.1.0.0/16"),
        )],
    )
    .unwrap();
    ChangeDocument::new(Cloud::Aws, prod(), Utc::now(), vec![change]).unwrap()
}

fn empty_doc() -> ChangeDocument {
    ChangeDocument::new(Cloud::Aws, prod(), Utc::now(), vec![]).unwrap()
}

#[test]
fn vpc_drift_is_reported_once_then_resolves() {
    // Run 1: first run, update on vpc/main.
    let report1 = classify(&vpc_doc(), None).unwrap();
    assert_eq!(report1.severity, Severity::Medium);
    assert_eq!(
        report1.resource_verdicts["vpc/main"].status,
        VerdictStatus::NewlyDrifted
    );
    assert!(report1.baseline_run_id.is_none());
    assert!(should_alert(&report1, None).notify);

    // Run 2: identical drift, already known.
    let report2 = classify(&vpc_doc(), Some(&report1)).unwrap();
    assert_eq!(report2.severity, Severity::Medium);
    assert_eq!(
        report2.resource_verdicts["vpc/main"].status,
        VerdictStatus::StillDrifted
    );
    assert_eq!(report2.baseline_run_id.as_ref(), Some(&report1.run_id));
    let decision = should_alert(&report2, Some(&report1));
    assert!(!decision.notify);
    assert_eq!(decision.reason, AlertReason::SuppressedKnownDrift);

    // Run 3: drift gone.
    let report3 = classify(&empty_doc(), Some(&report2)).unwrap();
    assert_eq!(report3.severity, Severity::None);
    assert_eq!(
        report3.resource_verdicts["vpc/main"].status,
        VerdictStatus::Resolved
    );
    assert!(!should_alert(&report3, Some(&report2)).notify);
}

#[test]
fn classification_is_deterministic() {
    let doc = ingest(
        &tf_plan(&[
            ("aws_instance.web", &["delete", "create"]),
            ("aws_s3_bucket.logs", &["update"]),
            ("aws_iam_role.ci", &["no-op"]),
        ]),
        Cloud::Aws,
        prod(),
    )
    .unwrap();
    let baseline = classify(&doc, None).unwrap();

    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let classifier = Classifier::default();
    let a = classifier
        .classify_as(&doc, Some(&baseline), RunId::generate(), at)
        .unwrap();
    let b = classifier
        .classify_as(&doc, Some(&baseline), RunId::generate(), Utc::now())
        .unwrap();

    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.resource_verdicts, b.resource_verdicts);
    assert_eq!(a.severity, b.severity);
    assert_eq!(a.content_digest().unwrap(), b.content_digest().unwrap());
    assert_eq!(
        serde_json::to_string(&a.resource_verdicts).unwrap(),
        serde_json::to_string(&b.resource_verdicts).unwrap()
    );
}

#[test]
fn first_run_marks_every_drifted_resource_new() {
    let doc = ingest(
        &tf_plan(&[
            ("aws_s3_bucket.a", &["create"]),
            ("aws_s3_bucket.b", &["update"]),
            ("aws_s3_bucket.c", &["no-op"]),
            ("aws_s3_bucket.d", &["read"]),
        ]),
        Cloud::Aws,
        prod(),
    )
    .unwrap();
    let report = classify(&doc, None).unwrap();

    let status = |addr: &str| report.resource_verdicts[addr].status;
    assert_eq!(status("aws_s3_bucket.a"), VerdictStatus::NewlyDrifted);
    assert_eq!(status("aws_s3_bucket.b"), VerdictStatus::NewlyDrifted);
    assert_eq!(status("aws_s3_bucket.c"), VerdictStatus::Unchanged);
    assert_eq!(status("aws_s3_bucket.d"), VerdictStatus::Unchanged);
    assert_ne!(report.severity, Severity::None);
}

#[test]
fn no_op_entry_resolves_previous_drift() {
    let first = classify(
        &ingest(&tf_plan(&[("aws_vpc.main", &["update"])]), Cloud::Aws, prod()).unwrap(),
        None,
    )
    .unwrap();
    let second = classify(
        &ingest(&tf_plan(&[("aws_vpc.main", &["no-op"])]), Cloud::Aws, prod()).unwrap(),
        Some(&first),
    )
    .unwrap();
    assert_eq!(
        second.resource_verdicts["aws_vpc.main"].status,
        VerdictStatus::Resolved
    );
    assert_eq!(second.severity, Severity::None);
}

#[test]
fn known_medium_drift_suppressed_but_new_delete_escalates() {
    let baseline = classify(
        &ingest(&tf_plan(&[("aws_vpc.a", &["update"])]), Cloud::Aws, prod()).unwrap(),
        None,
    )
    .unwrap();
    assert_eq!(baseline.severity, Severity::Medium);

    let same = classify(
        &ingest(&tf_plan(&[("aws_vpc.a", &["update"])]), Cloud::Aws, prod()).unwrap(),
        Some(&baseline),
    )
    .unwrap();
    assert!(!should_alert(&same, Some(&baseline)).notify);

    let escalated = classify(
        &ingest(
            &tf_plan(&[("aws_vpc.a", &["update"]), ("aws_vpc.b", &["delete"])]),
            Cloud::Aws,
            prod(),
        )
        .unwrap(),
        Some(&baseline),
    )
    .unwrap();
    let decision = should_alert(&escalated, Some(&baseline));
    assert!(decision.notify);
    assert_eq!(decision.severity, Severity::High);
    assert_eq!(decision.new_addresses, vec!["aws_vpc.b".to_string()]);
}

#[test]
fn fixed_still_drifted_rule_lowers_known_drift() {
    let policy = SeverityPolicy {
        still_drifted: StillDriftedRule::Fixed(Severity::Low),
        ..SeverityPolicy::default()
    };
    let classifier = Classifier::new(policy);
    let first = classifier.classify(&vpc_doc(), None).unwrap();
    let second = classifier.classify(&vpc_doc(), Some(&first)).unwrap();
    assert_eq!(first.severity, Severity::Medium);
    assert_eq!(second.severity, Severity::Low);
}

#[test]
fn changed_content_at_known_address_is_new_drift() {
    let first = classify(&vpc_doc(), None).unwrap();
    let changed = ChangeDocument::new(
        Cloud::Aws,
        prod(),
        Utc::now(),
        vec![ResourceChange::new(
            "vpc/main",
            "aws_vpc",
            Action::Update,
            vec![AttributeDiff::new(
                "cidr",
                json!("10.0.0.0/16"),
                json!("10.2.0.0/16"),
            )],
        )
        .unwrap()],
    )
    .unwrap();
    let second = classify(&changed, Some(&first)).unwrap();
    assert_eq!(
        second.resource_verdicts["vpc/main"].status,
        VerdictStatus::NewlyDrifted
    );
}

#[test]
fn text_and_json_plans_agree_on_actions() {
    let text = RawPlan::Text(
        "Terraform will perform the following actions:\n\n  \
         # aws_vpc.main will be updated in-place\n  \
         # aws_instance.web must be replaced\n\n\
         Plan: 1 to add, 1 to change, 1 to destroy.\n"
            .to_string(),
    );
    let from_text = ingest(&text, Cloud::Aws, prod()).unwrap();
    let from_json = ingest(
        &tf_plan(&[
            ("aws_vpc.main", &["update"]),
            ("aws_instance.web", &["delete", "create"]),
        ]),
        Cloud::Aws,
        prod(),
    )
    .unwrap();

    for address in ["aws_vpc.main", "aws_instance.web"] {
        assert_eq!(
            from_text.get(address).unwrap().action(),
            from_json.get(address).unwrap().action()
        );
    }
    assert_eq!(
        classify(&from_text, None).unwrap().severity,
        classify(&from_json, None).unwrap().severity
    );
}
