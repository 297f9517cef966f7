//! Postgres implementation of the engine's store traits.
//!
//! Every write runs in one transaction together with the audit events it
//! appends. Appends take a transaction-scoped advisory lock so concurrent
//! writers extend the hash chain one at a time.

use chrono::Utc;
use reqmap_core::{
    Actor, AttributesRecord, Organization, OrganizationId, OrganizationMapping, Requirement,
    RequirementId,
};
use reqmap_engine::{
    ApplicabilityRule, AuditDraft, AuditEvent, AuditEventKind, AuditLog, BatchWrite, CacheApplied,
    CacheChanges, MappingStore, OrganizationStore, RequirementCatalog, RuleStore, StoreResult,
};
use reqmap_filter::FilterExpr;
use sqlx::{PgConnection, PgPool};

use super::rows::{
    AttributesRow, AuditEventRow, MappingRow, OrganizationRow, RequirementRow, RuleRow,
    UpsertedMappingRow,
};
use super::store_error;

/// Advisory lock key guarding the audit chain tail.
const AUDIT_CHAIN_LOCK: i64 = 0x7265_716d_6170;

const MAPPING_COLUMNS: &str = "id, requirement_id, organization_id, mapping_type, reason, \
     created_by, updated_by, batch_id, created_at, updated_at";

const AUDIT_COLUMNS: &str = "id, sequence, kind, organization_id, requirement_id, reason, \
     actor, batch_id, recorded_at, previous_hash, event_hash";

const RULE_COLUMNS: &str =
    "requirement_id, kind, filter, created_by, updated_by, created_at, updated_at";

const ATTRIBUTE_COLUMNS: &str = "organization_id, kii_category, pdn_level, is_financial, \
     is_healthcare, is_government, employee_count, cross_border_data, updated_by, updated_at";

/// Store backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an initialized pool. Migrations must already be applied.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, used by the readiness probe.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Seal and insert drafts after the current chain tail.
async fn append_audit(conn: &mut PgConnection, drafts: Vec<AuditDraft>) -> Result<(), sqlx::Error> {
    if drafts.is_empty() {
        return Ok(());
    }
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(AUDIT_CHAIN_LOCK)
        .execute(&mut *conn)
        .await?;

    let tail = sqlx::query_as::<_, AuditEventRow>(&format!(
        "SELECT {AUDIT_COLUMNS} FROM applicability_audit_events ORDER BY sequence DESC LIMIT 1"
    ))
    .fetch_optional(&mut *conn)
    .await?;
    let mut previous = tail.map(AuditEventRow::into_event).transpose()?;

    for draft in drafts {
        let event = AuditEvent::seal(draft, previous.as_ref());
        sqlx::query(&format!(
            "INSERT INTO applicability_audit_events ({AUDIT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(*event.id.as_uuid())
        .bind(event.sequence as i64)
        .bind(event.kind.as_str())
        .bind(event.organization_id.map(|id| *id.as_uuid()))
        .bind(event.requirement_id.map(|id| *id.as_uuid()))
        .bind(event.reason.as_ref().map(|r| r.as_str()))
        .bind(event.actor.as_str())
        .bind(event.batch_id.map(|id| *id.as_uuid()))
        .bind(event.recorded_at)
        .bind(&event.previous_hash)
        .bind(&event.event_hash)
        .execute(&mut *conn)
        .await?;
        previous = Some(event);
    }
    Ok(())
}

/// Insert or replace the decision for one pair. Keeps the row id and
/// creation stamp of an existing row.
async fn upsert_mapping_row(
    conn: &mut PgConnection,
    mapping: &OrganizationMapping,
) -> Result<(OrganizationMapping, bool), sqlx::Error> {
    let row = sqlx::query_as::<_, UpsertedMappingRow>(&format!(
        "INSERT INTO organization_mappings ({MAPPING_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (requirement_id, organization_id) DO UPDATE SET
             mapping_type = EXCLUDED.mapping_type,
             reason = EXCLUDED.reason,
             updated_by = EXCLUDED.updated_by,
             batch_id = EXCLUDED.batch_id,
             updated_at = EXCLUDED.updated_at
         RETURNING {MAPPING_COLUMNS}, (xmax = 0) AS inserted"
    ))
    .bind(*mapping.id.as_uuid())
    .bind(*mapping.requirement_id.as_uuid())
    .bind(*mapping.organization_id.as_uuid())
    .bind(mapping.mapping_type.as_str())
    .bind(mapping.reason.as_ref().map(|r| r.as_str()))
    .bind(mapping.created_by.as_str())
    .bind(mapping.updated_by.as_str())
    .bind(mapping.batch_id.map(|id| *id.as_uuid()))
    .bind(mapping.created_at)
    .bind(mapping.updated_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok((row.row.into_record()?, row.inserted))
}

impl OrganizationStore for PgStore {
    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>("SELECT id, name FROM organizations WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("get_organization"))?;
        Ok(row.map(OrganizationRow::into_record))
    }

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        let rows = sqlx::query_as::<_, OrganizationRow>("SELECT id, name FROM organizations ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("list_organizations"))?;
        Ok(rows.into_iter().map(OrganizationRow::into_record).collect())
    }

    async fn get_attributes(&self, id: OrganizationId) -> StoreResult<Option<AttributesRecord>> {
        let row = sqlx::query_as::<_, AttributesRow>(&format!(
            "SELECT {ATTRIBUTE_COLUMNS} FROM organization_attributes WHERE organization_id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("get_attributes"))?;
        row.map(AttributesRow::into_record)
            .transpose()
            .map_err(store_error("get_attributes"))
    }

    async fn list_attributes(&self) -> StoreResult<Vec<AttributesRecord>> {
        let rows = sqlx::query_as::<_, AttributesRow>(&format!(
            "SELECT {ATTRIBUTE_COLUMNS} FROM organization_attributes"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list_attributes"))?;
        rows.into_iter()
            .map(AttributesRow::into_record)
            .collect::<Result<_, _>>()
            .map_err(store_error("list_attributes"))
    }

    async fn put_attributes(&self, record: AttributesRecord) -> StoreResult<()> {
        let op = "put_attributes";
        let row = AttributesRow::from_record(&record);
        let mut tx = self.pool.begin().await.map_err(store_error(op))?;
        sqlx::query(&format!(
            "INSERT INTO organization_attributes ({ATTRIBUTE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (organization_id) DO UPDATE SET
                 kii_category = EXCLUDED.kii_category,
                 pdn_level = EXCLUDED.pdn_level,
                 is_financial = EXCLUDED.is_financial,
                 is_healthcare = EXCLUDED.is_healthcare,
                 is_government = EXCLUDED.is_government,
                 employee_count = EXCLUDED.employee_count,
                 cross_border_data = EXCLUDED.cross_border_data,
                 updated_by = EXCLUDED.updated_by,
                 updated_at = EXCLUDED.updated_at"
        ))
        .bind(row.organization_id)
        .bind(row.kii_category)
        .bind(row.pdn_level)
        .bind(row.is_financial)
        .bind(row.is_healthcare)
        .bind(row.is_government)
        .bind(row.employee_count)
        .bind(row.cross_border_data)
        .bind(&row.updated_by)
        .bind(row.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(store_error(op))?;
        append_audit(&mut *tx, vec![AuditDraft::for_attributes(&record)])
            .await
            .map_err(store_error(op))?;
        tx.commit().await.map_err(store_error(op))
    }
}

impl RequirementCatalog for PgStore {
    async fn get_requirement(&self, id: RequirementId) -> StoreResult<Option<Requirement>> {
        let row = sqlx::query_as::<_, RequirementRow>(
            "SELECT id, code, title, framework, criticality, category FROM requirements WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("get_requirement"))?;
        row.map(RequirementRow::into_record)
            .transpose()
            .map_err(store_error("get_requirement"))
    }

    async fn list_requirements(&self) -> StoreResult<Vec<Requirement>> {
        let rows = sqlx::query_as::<_, RequirementRow>(
            "SELECT id, code, title, framework, criticality, category FROM requirements ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list_requirements"))?;
        rows.into_iter()
            .map(RequirementRow::into_record)
            .collect::<Result<_, _>>()
            .map_err(store_error("list_requirements"))
    }
}

impl RuleStore for PgStore {
    async fn get_rule(&self, requirement_id: RequirementId) -> StoreResult<Option<ApplicabilityRule>> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM applicability_rules WHERE requirement_id = $1"
        ))
        .bind(*requirement_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("get_rule"))?;
        row.map(RuleRow::into_record)
            .transpose()
            .map_err(store_error("get_rule"))
    }

    async fn list_rules(&self) -> StoreResult<Vec<ApplicabilityRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM applicability_rules"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list_rules"))?;
        rows.into_iter()
            .map(RuleRow::into_record)
            .collect::<Result<_, _>>()
            .map_err(store_error("list_rules"))
    }

    async fn upsert_rule(&self, rule: ApplicabilityRule) -> StoreResult<ApplicabilityRule> {
        let op = "upsert_rule";
        let mut tx = self.pool.begin().await.map_err(store_error(op))?;
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "INSERT INTO applicability_rules ({RULE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (requirement_id) DO UPDATE SET
                 kind = EXCLUDED.kind,
                 filter = EXCLUDED.filter,
                 updated_by = EXCLUDED.updated_by,
                 updated_at = EXCLUDED.updated_at
             RETURNING {RULE_COLUMNS}"
        ))
        .bind(*rule.requirement_id.as_uuid())
        .bind(rule.kind.as_str())
        .bind(rule.filter.as_ref().map(FilterExpr::to_json))
        .bind(rule.created_by.as_str())
        .bind(rule.updated_by.as_str())
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error(op))?;
        let stored = row.into_record().map_err(store_error(op))?;
        append_audit(
            &mut *tx,
            vec![AuditDraft::for_rule(AuditEventKind::RuleUpserted, &stored)],
        )
        .await
        .map_err(store_error(op))?;
        tx.commit().await.map_err(store_error(op))?;
        Ok(stored)
    }

    async fn delete_rule(
        &self,
        requirement_id: RequirementId,
        actor: Actor,
    ) -> StoreResult<Option<ApplicabilityRule>> {
        let op = "delete_rule";
        let mut tx = self.pool.begin().await.map_err(store_error(op))?;
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "DELETE FROM applicability_rules WHERE requirement_id = $1 RETURNING {RULE_COLUMNS}"
        ))
        .bind(*requirement_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error(op))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let removed = row.into_record().map_err(store_error(op))?;
        let draft = AuditDraft {
            requirement_id: Some(requirement_id),
            ..AuditDraft::new(AuditEventKind::RuleDeleted, actor, Utc::now())
        };
        append_audit(&mut *tx, vec![draft]).await.map_err(store_error(op))?;
        tx.commit().await.map_err(store_error(op))?;
        Ok(Some(removed))
    }
}

impl MappingStore for PgStore {
    async fn mappings_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<OrganizationMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(&format!(
            "SELECT {MAPPING_COLUMNS} FROM organization_mappings
             WHERE organization_id = $1 ORDER BY requirement_id"
        ))
        .bind(*organization_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("mappings_for_organization"))?;
        rows.into_iter()
            .map(MappingRow::into_record)
            .collect::<Result<_, _>>()
            .map_err(store_error("mappings_for_organization"))
    }

    async fn mappings_for_requirement(
        &self,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<OrganizationMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(&format!(
            "SELECT {MAPPING_COLUMNS} FROM organization_mappings
             WHERE requirement_id = $1 ORDER BY organization_id"
        ))
        .bind(*requirement_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("mappings_for_requirement"))?;
        rows.into_iter()
            .map(MappingRow::into_record)
            .collect::<Result<_, _>>()
            .map_err(store_error("mappings_for_requirement"))
    }

    async fn upsert_mapping(&self, mapping: OrganizationMapping) -> StoreResult<OrganizationMapping> {
        let op = "upsert_mapping";
        let mut tx = self.pool.begin().await.map_err(store_error(op))?;
        let (stored, _) = upsert_mapping_row(&mut *tx, &mapping)
            .await
            .map_err(store_error(op))?;
        append_audit(&mut *tx, vec![AuditDraft::for_mapping(&stored)])
            .await
            .map_err(store_error(op))?;
        tx.commit().await.map_err(store_error(op))?;
        Ok(stored)
    }

    async fn upsert_mappings(&self, mappings: Vec<OrganizationMapping>) -> StoreResult<BatchWrite> {
        let op = "upsert_mappings";
        let mut tx = self.pool.begin().await.map_err(store_error(op))?;
        let mut outcome = BatchWrite::default();
        let mut drafts = Vec::with_capacity(mappings.len());
        for mapping in &mappings {
            let (stored, inserted) = upsert_mapping_row(&mut *tx, mapping)
                .await
                .map_err(store_error(op))?;
            if inserted {
                outcome.created += 1;
            } else {
                outcome.updated += 1;
            }
            drafts.push(AuditDraft::for_mapping(&stored));
        }
        append_audit(&mut *tx, drafts).await.map_err(store_error(op))?;
        tx.commit().await.map_err(store_error(op))?;
        Ok(outcome)
    }

    async fn delete_manual_mapping(
        &self,
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        actor: Actor,
    ) -> StoreResult<Option<OrganizationMapping>> {
        let op = "delete_manual_mapping";
        let mut tx = self.pool.begin().await.map_err(store_error(op))?;
        let row = sqlx::query_as::<_, MappingRow>(&format!(
            "DELETE FROM organization_mappings
             WHERE requirement_id = $1 AND organization_id = $2 AND mapping_type <> 'automatic'
             RETURNING {MAPPING_COLUMNS}"
        ))
        .bind(*requirement_id.as_uuid())
        .bind(*organization_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error(op))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let removed = row.into_record().map_err(store_error(op))?;
        let draft = AuditDraft::for_removal(
            AuditEventKind::Revert,
            requirement_id,
            organization_id,
            actor,
            Utc::now(),
        );
        append_audit(&mut *tx, vec![draft]).await.map_err(store_error(op))?;
        tx.commit().await.map_err(store_error(op))?;
        Ok(Some(removed))
    }

    async fn apply_cache_changes(&self, changes: CacheChanges) -> StoreResult<CacheApplied> {
        let op = "apply_cache_changes";
        if changes.is_empty() {
            return Ok(CacheApplied::default());
        }
        let mut tx = self.pool.begin().await.map_err(store_error(op))?;
        let mut applied = CacheApplied::default();
        let mut drafts = Vec::new();

        for (requirement_id, organization_id) in changes.remove {
            let result = sqlx::query(
                "DELETE FROM organization_mappings
                 WHERE requirement_id = $1 AND organization_id = $2 AND mapping_type = 'automatic'",
            )
            .bind(*requirement_id.as_uuid())
            .bind(*organization_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(store_error(op))?;
            if result.rows_affected() > 0 {
                applied.removed += 1;
                drafts.push(AuditDraft::for_removal(
                    AuditEventKind::CacheRemoved,
                    requirement_id,
                    organization_id,
                    Actor::system(),
                    Utc::now(),
                ));
            }
        }

        for row in changes.insert {
            let result = sqlx::query(&format!(
                "INSERT INTO organization_mappings ({MAPPING_COLUMNS})
                 VALUES ($1, $2, $3, $4, NULL, $5, $6, NULL, $7, $8)
                 ON CONFLICT (requirement_id, organization_id) DO NOTHING"
            ))
            .bind(*row.id.as_uuid())
            .bind(*row.requirement_id.as_uuid())
            .bind(*row.organization_id.as_uuid())
            .bind(row.mapping_type.as_str())
            .bind(row.created_by.as_str())
            .bind(row.updated_by.as_str())
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error(op))?;
            if result.rows_affected() > 0 {
                applied.written += 1;
                drafts.push(AuditDraft::for_mapping(&row));
            }
        }

        append_audit(&mut *tx, drafts).await.map_err(store_error(op))?;
        tx.commit().await.map_err(store_error(op))?;
        Ok(applied)
    }
}

impl AuditLog for PgStore {
    async fn history(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM applicability_audit_events
             WHERE organization_id = $1 AND requirement_id = $2 ORDER BY sequence"
        ))
        .bind(*organization_id.as_uuid())
        .bind(*requirement_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("history"))?;
        rows.into_iter()
            .map(AuditEventRow::into_event)
            .collect::<Result<_, _>>()
            .map_err(store_error("history"))
    }

    async fn audit_events(&self) -> StoreResult<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM applicability_audit_events ORDER BY sequence"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("audit_events"))?;
        rows.into_iter()
            .map(AuditEventRow::into_event)
            .collect::<Result<_, _>>()
            .map_err(store_error("audit_events"))
    }
}
