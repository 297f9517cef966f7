//! # In-Memory Store
//!
//! Thread-safe, cloneable store used in development and tests. Every trait
//! method takes the lock once and never holds it across an `.await`, so a
//! write and the audit events it appends are atomic with respect to every
//! other call. `parking_lot::RwLock` is non-poisonable: a panicking writer
//! does not permanently corrupt the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use reqmap_core::{
    Actor, AttributesRecord, MappingType, Organization, OrganizationId, OrganizationMapping,
    Requirement, RequirementId,
};

use crate::audit::{AuditDraft, AuditEvent, AuditEventKind};
use crate::reconcile::CacheChanges;
use crate::rule::ApplicabilityRule;
use crate::store::{
    AuditLog, BatchWrite, CacheApplied, MappingStore, OrganizationStore, RequirementCatalog,
    RuleStore, StoreResult,
};

#[derive(Debug, Default)]
struct Inner {
    organizations: BTreeMap<OrganizationId, Organization>,
    attributes: HashMap<OrganizationId, AttributesRecord>,
    requirements: BTreeMap<RequirementId, Requirement>,
    rules: HashMap<RequirementId, ApplicabilityRule>,
    mappings: HashMap<(RequirementId, OrganizationId), OrganizationMapping>,
    audit: Vec<AuditEvent>,
}

impl Inner {
    fn append(&mut self, draft: AuditDraft) {
        let event = AuditEvent::seal(draft, self.audit.last());
        self.audit.push(event);
    }

    /// Insert or replace one mapping row; returns the stored row and whether
    /// the pair was new.
    fn upsert(&mut self, mapping: OrganizationMapping) -> (OrganizationMapping, bool) {
        let key = mapping.key();
        let (stored, created) = match self.mappings.get(&key) {
            Some(existing) => (mapping.replacing(existing), false),
            None => (mapping, true),
        };
        self.append(AuditDraft::for_mapping(&stored));
        self.mappings.insert(key, stored.clone());
        (stored, created)
    }
}

/// Store holding every record in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an organization. Replaces the name of a known one.
    pub fn insert_organization(&self, organization: Organization) {
        self.inner
            .write()
            .organizations
            .insert(organization.id, organization);
    }

    /// Add or replace a catalog requirement.
    pub fn insert_requirement(&self, requirement: Requirement) {
        self.inner
            .write()
            .requirements
            .insert(requirement.id, requirement);
    }

    /// Drop a requirement from the catalog together with its rule.
    ///
    /// Mapping rows are left in place; the resolver ignores them and
    /// reconciliation removes the automatic ones.
    pub fn remove_requirement(&self, id: RequirementId) -> Option<Requirement> {
        let mut inner = self.inner.write();
        inner.rules.remove(&id);
        inner.requirements.remove(&id)
    }

    /// Number of stored mapping rows.
    pub fn mapping_count(&self) -> usize {
        self.inner.read().mappings.len()
    }
}

impl OrganizationStore for MemoryStore {
    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        Ok(self.inner.read().organizations.get(&id).cloned())
    }

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        Ok(self.inner.read().organizations.values().cloned().collect())
    }

    async fn get_attributes(&self, id: OrganizationId) -> StoreResult<Option<AttributesRecord>> {
        Ok(self.inner.read().attributes.get(&id).cloned())
    }

    async fn list_attributes(&self) -> StoreResult<Vec<AttributesRecord>> {
        Ok(self.inner.read().attributes.values().cloned().collect())
    }

    async fn put_attributes(&self, record: AttributesRecord) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.append(AuditDraft::for_attributes(&record));
        inner.attributes.insert(record.organization_id, record);
        Ok(())
    }
}

impl RequirementCatalog for MemoryStore {
    async fn get_requirement(&self, id: RequirementId) -> StoreResult<Option<Requirement>> {
        Ok(self.inner.read().requirements.get(&id).cloned())
    }

    async fn list_requirements(&self) -> StoreResult<Vec<Requirement>> {
        Ok(self.inner.read().requirements.values().cloned().collect())
    }
}

impl RuleStore for MemoryStore {
    async fn get_rule(&self, requirement_id: RequirementId) -> StoreResult<Option<ApplicabilityRule>> {
        Ok(self.inner.read().rules.get(&requirement_id).cloned())
    }

    async fn list_rules(&self) -> StoreResult<Vec<ApplicabilityRule>> {
        Ok(self.inner.read().rules.values().cloned().collect())
    }

    async fn upsert_rule(&self, rule: ApplicabilityRule) -> StoreResult<ApplicabilityRule> {
        let mut inner = self.inner.write();
        let stored = match inner.rules.get(&rule.requirement_id) {
            Some(existing) => rule.replacing(existing),
            None => rule,
        };
        inner.append(AuditDraft::for_rule(AuditEventKind::RuleUpserted, &stored));
        inner.rules.insert(stored.requirement_id, stored.clone());
        Ok(stored)
    }

    async fn delete_rule(
        &self,
        requirement_id: RequirementId,
        actor: Actor,
    ) -> StoreResult<Option<ApplicabilityRule>> {
        let mut inner = self.inner.write();
        let removed = inner.rules.remove(&requirement_id);
        if removed.is_some() {
            let draft = AuditDraft {
                requirement_id: Some(requirement_id),
                ..AuditDraft::new(AuditEventKind::RuleDeleted, actor, Utc::now())
            };
            inner.append(draft);
        }
        Ok(removed)
    }
}

impl MappingStore for MemoryStore {
    async fn mappings_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<OrganizationMapping>> {
        Ok(self
            .inner
            .read()
            .mappings
            .values()
            .filter(|m| m.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn mappings_for_requirement(
        &self,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<OrganizationMapping>> {
        Ok(self
            .inner
            .read()
            .mappings
            .values()
            .filter(|m| m.requirement_id == requirement_id)
            .cloned()
            .collect())
    }

    async fn upsert_mapping(&self, mapping: OrganizationMapping) -> StoreResult<OrganizationMapping> {
        let (stored, _) = self.inner.write().upsert(mapping);
        Ok(stored)
    }

    async fn upsert_mappings(&self, mappings: Vec<OrganizationMapping>) -> StoreResult<BatchWrite> {
        let mut inner = self.inner.write();
        let mut outcome = BatchWrite::default();
        for mapping in mappings {
            match inner.upsert(mapping) {
                (_, true) => outcome.created += 1,
                (_, false) => outcome.updated += 1,
            }
        }
        Ok(outcome)
    }

    async fn delete_manual_mapping(
        &self,
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        actor: Actor,
    ) -> StoreResult<Option<OrganizationMapping>> {
        let mut inner = self.inner.write();
        let key = (requirement_id, organization_id);
        if !inner.mappings.get(&key).is_some_and(OrganizationMapping::is_manual) {
            return Ok(None);
        }
        let removed = inner.mappings.remove(&key);
        inner.append(AuditDraft::for_removal(
            AuditEventKind::Revert,
            requirement_id,
            organization_id,
            actor,
            Utc::now(),
        ));
        Ok(removed)
    }

    async fn apply_cache_changes(&self, changes: CacheChanges) -> StoreResult<CacheApplied> {
        let mut inner = self.inner.write();
        let mut applied = CacheApplied::default();

        for (requirement_id, organization_id) in changes.remove {
            let key = (requirement_id, organization_id);
            let still_automatic = inner
                .mappings
                .get(&key)
                .is_some_and(|m| m.mapping_type == MappingType::Automatic);
            if still_automatic {
                inner.mappings.remove(&key);
                inner.append(AuditDraft::for_removal(
                    AuditEventKind::CacheRemoved,
                    requirement_id,
                    organization_id,
                    Actor::system(),
                    Utc::now(),
                ));
                applied.removed += 1;
            }
        }

        for row in changes.insert {
            let key = row.key();
            if inner.mappings.contains_key(&key) {
                continue;
            }
            inner.append(AuditDraft::for_mapping(&row));
            inner.mappings.insert(key, row);
            applied.written += 1;
        }

        Ok(applied)
    }
}

impl AuditLog for MemoryStore {
    async fn history(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<AuditEvent>> {
        Ok(self
            .inner
            .read()
            .audit
            .iter()
            .filter(|e| {
                e.organization_id == Some(organization_id) && e.requirement_id == Some(requirement_id)
            })
            .cloned()
            .collect())
    }

    async fn audit_events(&self) -> StoreResult<Vec<AuditEvent>> {
        Ok(self.inner.read().audit.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqmap_core::{Criticality, Reason};

    fn actor() -> Actor {
        Actor::new("admin@example.org").unwrap()
    }

    fn include(req: RequirementId, org: OrganizationId, reason: &str) -> OrganizationMapping {
        OrganizationMapping::manual(
            req,
            org,
            MappingType::ManualInclude,
            Reason::new(reason).unwrap(),
            actor(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_keeps_row_identity_and_creation_stamp() {
        let store = MemoryStore::new();
        let (req, org) = (RequirementId::new(), OrganizationId::new());
        let first = store.upsert_mapping(include(req, org, "first")).await.unwrap();
        let second = store.upsert_mapping(include(req, org, "second")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.reason.unwrap().as_str(), "second");
        assert_eq!(store.mapping_count(), 1);
    }

    #[tokio::test]
    async fn delete_manual_mapping_leaves_automatic_rows() {
        let store = MemoryStore::new();
        let (req, org) = (RequirementId::new(), OrganizationId::new());
        let changes = CacheChanges {
            insert: vec![OrganizationMapping::automatic(req, org, Utc::now())],
            remove: vec![],
        };
        store.apply_cache_changes(changes).await.unwrap();

        assert!(store.delete_manual_mapping(req, org, actor()).await.unwrap().is_none());
        assert_eq!(store.mapping_count(), 1);
    }

    #[tokio::test]
    async fn cache_changes_never_touch_manual_rows() {
        let store = MemoryStore::new();
        let (req, org) = (RequirementId::new(), OrganizationId::new());
        store.upsert_mapping(include(req, org, "kept")).await.unwrap();

        let changes = CacheChanges {
            insert: vec![OrganizationMapping::automatic(req, org, Utc::now())],
            remove: vec![(req, org)],
        };
        let applied = store.apply_cache_changes(changes).await.unwrap();

        assert_eq!(applied, CacheApplied::default());
        let rows = store.mappings_for_organization(org).await.unwrap();
        assert_eq!(rows[0].mapping_type, MappingType::ManualInclude);
    }

    #[tokio::test]
    async fn every_write_extends_a_valid_chain() {
        let store = MemoryStore::new();
        let (req, org) = (RequirementId::new(), OrganizationId::new());
        store.upsert_mapping(include(req, org, "a")).await.unwrap();
        store.delete_manual_mapping(req, org, actor()).await.unwrap();

        let events = store.audit_events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, AuditEventKind::Revert);
        assert!(crate::audit::verify_chain(&events).chain_valid);
        assert_eq!(store.history(org, req).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn removing_a_requirement_drops_its_rule() {
        let store = MemoryStore::new();
        let requirement = Requirement {
            id: RequirementId::new(),
            code: "R-1".into(),
            title: "Retention".into(),
            framework: "F".into(),
            criticality: Criticality::Low,
            category: None,
        };
        store.insert_requirement(requirement.clone());
        let draft = crate::rule::RuleDraft {
            kind: reqmap_core::RuleKind::Manual,
            filter: None,
        };
        let rule =
            ApplicabilityRule::from_draft(requirement.id, &draft, actor(), Utc::now()).unwrap();
        store.upsert_rule(rule).await.unwrap();

        store.remove_requirement(requirement.id);
        assert!(store.get_rule(requirement.id).await.unwrap().is_none());
        assert!(store.list_requirements().await.unwrap().is_empty());
    }
}
