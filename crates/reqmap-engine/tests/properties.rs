//! Resolver properties over generated attributes and manual decisions.

use proptest::prelude::*;
use reqmap_core::{
    Actor, Criticality, DataProtectionLevel, InfrastructureCategory, Organization,
    OrganizationAttributes, OrganizationId, Reason, Requirement, RequirementId, RuleKind,
};
use reqmap_engine::{ApplicabilityEngine, MemoryStore, Origin, RuleDraft};
use serde_json::json;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn attributes() -> impl Strategy<Value = OrganizationAttributes> {
    (
        prop::option::of(prop_oneof![
            Just(InfrastructureCategory::First),
            Just(InfrastructureCategory::Second),
            Just(InfrastructureCategory::Third),
        ]),
        prop::option::of(prop_oneof![
            Just(DataProtectionLevel::First),
            Just(DataProtectionLevel::Second),
            Just(DataProtectionLevel::Third),
            Just(DataProtectionLevel::Fourth),
        ]),
        any::<bool>(),
        prop::option::of(0u32..5_000),
    )
        .prop_map(|(kii, pdn, financial, employees)| OrganizationAttributes {
            kii_category: kii,
            pdn_level: pdn,
            is_financial: financial,
            employee_count: employees,
            ..Default::default()
        })
}

/// A small catalog with one rule shape per requirement.
fn filters() -> Vec<serde_json::Value> {
    vec![
        json!({"field": "kii_category", "op": "at_least_as_severe_as", "value": 2}),
        json!({"field": "is_financial", "op": "is_true"}),
        json!({"field": "employee_count", "op": "greater_than", "value": 250}),
        json!({"any_of": [
            {"field": "pdn_level", "op": "equals", "value": 1},
            {"field": "kii_category", "op": "equals", "value": 3}
        ]}),
        json!({}),
    ]
}

async fn seeded(
    attrs: OrganizationAttributes,
) -> (ApplicabilityEngine<MemoryStore>, OrganizationId, Vec<RequirementId>) {
    let store = MemoryStore::new();
    let org = OrganizationId::new();
    store.insert_organization(Organization {
        id: org,
        name: "Generated".to_string(),
    });
    let engine = ApplicabilityEngine::new(store);
    let actor = Actor::new("prop").unwrap();

    let mut ids = Vec::new();
    for (i, filter) in filters().into_iter().enumerate() {
        let requirement = Requirement {
            id: RequirementId::new(),
            code: format!("P-{i}"),
            title: "Generated".to_string(),
            framework: "GEN".to_string(),
            criticality: Criticality::Medium,
            category: None,
        };
        let id = requirement.id;
        engine.store().insert_requirement(requirement);
        let draft = RuleDraft {
            kind: RuleKind::Automatic,
            filter: Some(filter),
        };
        engine.upsert_rule(id, &draft, actor.clone()).await.unwrap();
        ids.push(id);
    }
    engine.update_attributes(org, attrs, actor).await.unwrap();
    (engine, org, ids)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn resolve_is_idempotent(attrs in attributes()) {
        runtime().block_on(async {
            let (engine, org, _) = seeded(attrs).await;
            let first = engine.resolve_for_organization(org).await.unwrap();
            let second = engine.resolve_for_organization(org).await.unwrap();
            prop_assert_eq!(&first, &second);
            let ids: Vec<_> = first.requirements.iter().map(|r| r.requirement.id).collect();
            let mut sorted = ids.clone();
            sorted.sort();
            prop_assert_eq!(ids, sorted);
            Ok(())
        })?;
    }

    #[test]
    fn overrides_then_revert_restore_automatic_status(
        attrs in attributes(),
        pick in 0usize..5,
        exclude in any::<bool>(),
    ) {
        runtime().block_on(async {
            let (engine, org, ids) = seeded(attrs).await;
            let target = ids[pick];
            let actor = Actor::new("prop").unwrap();
            let before = engine.resolve_for_organization(org).await.unwrap();
            let auto_match = before.find(target).map(|r| r.auto_match).unwrap_or(false);

            let reason = Reason::new("generated override").unwrap();
            if exclude {
                engine.exclude(org, target, reason, actor.clone()).await.unwrap();
                let during = engine.resolve_for_organization(org).await.unwrap();
                prop_assert!(!during.includes(target));
            } else {
                engine.include(org, target, reason, actor.clone()).await.unwrap();
                let during = engine.resolve_for_organization(org).await.unwrap();
                prop_assert_eq!(during.find(target).map(|r| r.origin), Some(Origin::ManualInclude));
            }

            engine.revert(org, target, actor).await.unwrap();
            let after = engine.resolve_for_organization(org).await.unwrap();
            prop_assert_eq!(after.includes(target), auto_match);
            prop_assert_eq!(&after, &before);
            Ok(())
        })?;
    }

    #[test]
    fn cache_agrees_with_fresh_evaluation_after_updates(
        first in attributes(),
        second in attributes(),
    ) {
        runtime().block_on(async {
            let (engine, org, _) = seeded(first).await;
            engine
                .update_attributes(org, second, Actor::new("prop").unwrap())
                .await
                .unwrap();
            let resolution = engine.resolve_for_organization(org).await.unwrap();
            prop_assert_eq!(resolution.counts.stale_automatic_rows, 0);
            let rows = engine.mappings_for_organization(org).await.unwrap();
            prop_assert_eq!(rows.len(), resolution.counts.automatic);
            Ok(())
        })?;
    }
}
