//! Engine operations against the in-memory store.

use reqmap_core::{
    Actor, Criticality, EngineError, InfrastructureCategory, MappingType, Organization,
    OrganizationAttributes, OrganizationId, Reason, Requirement, RequirementId, ResourceKind,
    RuleKind, ValidationError,
};
use reqmap_engine::{
    ApplicabilityEngine, AuditEventKind, AuditLog, MappingStore, MemoryStore, Origin, RuleDraft,
};
use reqmap_filter::RequirementFilter;
use serde_json::json;

fn actor() -> Actor {
    Actor::new("compliance-admin@example.org").unwrap()
}

fn reason(text: &str) -> Reason {
    Reason::new(text).unwrap()
}

fn requirement(code: &str, criticality: Criticality) -> Requirement {
    Requirement {
        id: RequirementId::new(),
        code: code.to_string(),
        title: format!("Control {code}"),
        framework: "ISO27001".to_string(),
        criticality,
        category: Some("access".to_string()),
    }
}

struct Fixture {
    engine: ApplicabilityEngine<MemoryStore>,
    org: OrganizationId,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let org = OrganizationId::new();
    store.insert_organization(Organization {
        id: org,
        name: "Acme Utilities".to_string(),
    });
    Fixture {
        engine: ApplicabilityEngine::new(store),
        org,
    }
}

impl Fixture {
    fn add_requirement(&self, code: &str, criticality: Criticality) -> RequirementId {
        let r = requirement(code, criticality);
        let id = r.id;
        self.engine.store().insert_requirement(r);
        id
    }

    async fn automatic_rule(&self, requirement_id: RequirementId, filter: serde_json::Value) {
        let draft = RuleDraft {
            kind: RuleKind::Automatic,
            filter: Some(filter),
        };
        self.engine
            .upsert_rule(requirement_id, &draft, actor())
            .await
            .unwrap();
    }

    async fn set_kii(&self, category: InfrastructureCategory) {
        let attrs = OrganizationAttributes {
            kii_category: Some(category),
            ..Default::default()
        };
        self.engine
            .update_attributes(self.org, attrs, actor())
            .await
            .unwrap();
    }
}

fn kii_at_least_2() -> serde_json::Value {
    json!({"field": "kii_category", "op": "at_least_as_severe_as", "value": 2})
}

#[tokio::test]
async fn attribute_update_writes_automatic_cache_rows() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::High);
    f.automatic_rule(r1, kii_at_least_2()).await;
    assert!(f.engine.mappings_for_organization(f.org).await.unwrap().is_empty());

    f.set_kii(InfrastructureCategory::Second).await;

    let rows = f.engine.mappings_for_organization(f.org).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mapping_type, MappingType::Automatic);
    assert_eq!(rows[0].updated_by, Actor::system());

    let resolution = f.engine.resolve_for_organization(f.org).await.unwrap();
    assert_eq!(resolution.find(r1).unwrap().origin, Origin::Automatic);
    assert_eq!(resolution.counts.stale_automatic_rows, 0);
}

#[tokio::test]
async fn attribute_downgrade_removes_stale_cache_row() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::High);
    f.automatic_rule(r1, kii_at_least_2()).await;
    f.set_kii(InfrastructureCategory::First).await;
    assert_eq!(f.engine.store().mapping_count(), 1);

    f.set_kii(InfrastructureCategory::Third).await;

    assert_eq!(f.engine.store().mapping_count(), 0);
    let resolution = f.engine.resolve_for_organization(f.org).await.unwrap();
    assert!(!resolution.includes(r1));
}

#[tokio::test]
async fn exclude_then_revert_restores_automatic_origin() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::High);
    f.automatic_rule(r1, kii_at_least_2()).await;
    f.set_kii(InfrastructureCategory::Second).await;

    f.engine
        .exclude(f.org, r1, reason("pilot programme exemption"), actor())
        .await
        .unwrap();
    let excluded = f.engine.resolve_for_organization(f.org).await.unwrap();
    assert!(!excluded.includes(r1));
    assert_eq!(excluded.counts.manual_exclude, 1);

    let outcome = f.engine.revert(f.org, r1, actor()).await.unwrap();
    assert!(outcome.removed);
    assert_eq!(
        outcome.mapping.unwrap().mapping_type,
        MappingType::ManualExclude
    );

    let restored = f.engine.resolve_for_organization(f.org).await.unwrap();
    assert_eq!(restored.find(r1).unwrap().origin, Origin::Automatic);
    // Revert refreshes the pair's cache row.
    let rows = f.engine.mappings_for_organization(f.org).await.unwrap();
    assert_eq!(rows[0].mapping_type, MappingType::Automatic);
}

#[tokio::test]
async fn revert_without_manual_row_is_noop() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::Low);
    let outcome = f.engine.revert(f.org, r1, actor()).await.unwrap();
    assert!(!outcome.removed);
    assert!(outcome.mapping.is_none());
    assert!(outcome.cache_refreshed);
}

#[tokio::test]
async fn include_requires_known_organization_and_requirement() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::Low);

    let err = f
        .engine
        .include(OrganizationId::new(), r1, reason("x"), actor())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref e) if e.kind == ResourceKind::Organization));

    let err = f
        .engine
        .include(f.org, RequirementId::new(), reason("x"), actor())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref e) if e.kind == ResourceKind::Requirement));
}

#[tokio::test]
async fn manual_rows_survive_rule_changes() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::High);
    f.engine
        .include(f.org, r1, reason("voluntary adoption"), actor())
        .await
        .unwrap();

    f.automatic_rule(r1, json!({"field": "is_financial", "op": "is_true"}))
        .await;
    f.engine.delete_rule(r1, actor()).await.unwrap();

    let rows = f.engine.mappings_for_requirement(r1).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mapping_type, MappingType::ManualInclude);
}

#[tokio::test]
async fn rule_upsert_reconciles_every_organization() {
    let f = fixture();
    let other = OrganizationId::new();
    f.engine.store().insert_organization(Organization {
        id: other,
        name: "Beta Bank".to_string(),
    });
    let r1 = f.add_requirement("R1", Criticality::Medium);

    f.automatic_rule(r1, json!({})).await;
    assert_eq!(f.engine.mappings_for_requirement(r1).await.unwrap().len(), 2);

    let manual = RuleDraft {
        kind: RuleKind::Manual,
        filter: None,
    };
    f.engine.upsert_rule(r1, &manual, actor()).await.unwrap();
    assert!(f.engine.mappings_for_requirement(r1).await.unwrap().is_empty());
}

#[tokio::test]
async fn rule_upsert_keeps_creation_stamp() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::Medium);
    f.automatic_rule(r1, json!({})).await;
    let first = f.engine.get_rule(r1).await.unwrap();

    let later = Actor::new("second-author").unwrap();
    let draft = RuleDraft {
        kind: RuleKind::Automatic,
        filter: Some(kii_at_least_2()),
    };
    let second = f
        .engine
        .upsert_rule(r1, &draft, later.clone())
        .await
        .unwrap()
        .rule;

    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.created_by, first.created_by);
    assert_eq!(second.updated_by, later);
}

#[tokio::test]
async fn malformed_rule_is_rejected_before_saving() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::Medium);
    let draft = RuleDraft {
        kind: RuleKind::Automatic,
        filter: Some(json!({"field": "kii_category", "op": "equals", "value": 7})),
    };
    let err = f.engine.upsert_rule(r1, &draft, actor()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidRank { .. })
    ));
    let err = f.engine.get_rule(r1).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref e) if e.kind == ResourceKind::Rule));
}

#[tokio::test]
async fn deleting_absent_rule_is_not_found() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::Medium);
    let err = f.engine.delete_rule(r1, actor()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn preview_matches_without_saving() {
    let f = fixture();
    f.set_kii(InfrastructureCategory::First).await;
    let other = OrganizationId::new();
    f.engine.store().insert_organization(Organization {
        id: other,
        name: "No attributes yet".to_string(),
    });

    let preview = f.engine.preview_rule(&kii_at_least_2()).await.unwrap();
    assert_eq!(preview.evaluated, 2);
    assert_eq!(preview.matched, vec![f.org]);

    let everyone = f.engine.preview_rule(&serde_json::Value::Null).await.unwrap();
    assert_eq!(everyone.matched.len(), 2);
    assert_eq!(f.engine.store().mapping_count(), 0);
}

#[tokio::test]
async fn bulk_include_shares_reason_batch_and_timestamp() {
    let f = fixture();
    let mut critical = Vec::new();
    for i in 0..10 {
        let criticality = if i % 3 == 0 {
            Criticality::Critical
        } else {
            Criticality::Low
        };
        let id = f.add_requirement(&format!("R{i}"), criticality);
        if criticality == Criticality::Critical {
            critical.push(id);
        }
    }

    let filter = RequirementFilter {
        criticality: Some(Criticality::Critical),
        ..Default::default()
    };
    let outcome = f
        .engine
        .add_by_filter(f.org, &filter, reason("annual critical-controls review"), actor())
        .await
        .unwrap();

    assert_eq!(outcome.matched, critical.len());
    assert_eq!(outcome.committed(), critical.len());
    assert_eq!(outcome.created, critical.len());

    let rows = f.engine.mappings_for_organization(f.org).await.unwrap();
    assert_eq!(rows.len(), critical.len());
    for row in &rows {
        assert!(critical.contains(&row.requirement_id));
        assert_eq!(row.batch_id, Some(outcome.batch_id));
        assert_eq!(row.updated_at, outcome.decided_at);
        assert_eq!(
            row.reason.as_ref().map(Reason::as_str),
            Some("annual critical-controls review")
        );
    }

    let again = f
        .engine
        .add_by_filter(f.org, &filter, reason("re-run"), actor())
        .await
        .unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.updated, critical.len());
}

#[tokio::test]
async fn bulk_include_rejects_empty_filter_and_handles_no_match() {
    let f = fixture();
    f.add_requirement("R1", Criticality::Low);

    let err = f
        .engine
        .add_by_filter(f.org, &RequirementFilter::default(), reason("all"), actor())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::EmptyRequirementFilter)
    ));

    let none = RequirementFilter {
        framework: Some("SOC2".to_string()),
        ..Default::default()
    };
    let outcome = f
        .engine
        .add_by_filter(f.org, &none, reason("nothing"), actor())
        .await
        .unwrap();
    assert_eq!(outcome.committed(), 0);
    assert_eq!(f.engine.store().mapping_count(), 0);
}

#[tokio::test]
async fn history_lists_pair_transitions_in_order() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::High);
    f.engine
        .include(f.org, r1, reason("first"), actor())
        .await
        .unwrap();
    f.engine
        .exclude(f.org, r1, reason("second"), actor())
        .await
        .unwrap();
    f.engine.revert(f.org, r1, actor()).await.unwrap();

    let kinds: Vec<AuditEventKind> = f
        .engine
        .history(f.org, r1)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventKind::ManualInclude,
            AuditEventKind::ManualExclude,
            AuditEventKind::Revert,
        ]
    );
    assert!(f.engine.verify_audit_chain().await.unwrap().chain_valid);
}

#[tokio::test]
async fn requirement_removed_from_catalog_is_ignored_and_cleaned() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::High);
    f.automatic_rule(r1, json!({})).await;
    f.engine
        .reconcile_organization(f.org)
        .await
        .unwrap();
    assert_eq!(f.engine.store().mapping_count(), 1);

    f.engine.store().remove_requirement(r1);
    let resolution = f.engine.resolve_for_organization(f.org).await.unwrap();
    assert_eq!(resolution.counts.total_requirements, 0);
    assert!(resolution.requirements.is_empty());

    let report = f.engine.reconcile_organization(f.org).await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(f
        .engine
        .store()
        .mappings_for_organization(f.org)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let f = fixture();
    let r1 = f.add_requirement("R1", Criticality::High);
    f.automatic_rule(r1, json!({})).await;

    let second = f.engine.reconcile_requirement(r1).await.unwrap();
    assert_eq!(second.written, 0);
    assert_eq!(second.removed, 0);

    let cache_events = f
        .engine
        .store()
        .audit_events()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == AuditEventKind::CacheWritten)
        .count();
    assert_eq!(cache_events, 1);
}
