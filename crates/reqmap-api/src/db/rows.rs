//! Row types for SQLx mapping and their conversion into engine records.
//!
//! A row that no longer satisfies a domain invariant (unknown enum string,
//! out-of-range rank, blank reason) is reported as a protocol error, never
//! skipped: dropping it would turn corruption into a wrong resolution.

use chrono::{DateTime, Utc};
use reqmap_core::{
    Actor, AttributesRecord, AuditEventId, BatchId, Criticality, DataProtectionLevel,
    InfrastructureCategory, MappingId, MappingType, Organization, OrganizationAttributes,
    OrganizationId, OrganizationMapping, Reason, Requirement, RequirementId, RuleKind,
};
use reqmap_engine::{ApplicabilityRule, AuditEvent, AuditEventKind};
use reqmap_filter::FilterExpr;
use uuid::Uuid;

fn corrupt(table: &str, id: impl std::fmt::Display, detail: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Protocol(format!("invalid {table} row {id}: {detail}"))
}

#[derive(sqlx::FromRow)]
pub(crate) struct OrganizationRow {
    id: Uuid,
    name: String,
}

impl OrganizationRow {
    pub(crate) fn into_record(self) -> Organization {
        Organization {
            id: OrganizationId::from_uuid(self.id),
            name: self.name,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RequirementRow {
    id: Uuid,
    code: String,
    title: String,
    framework: String,
    criticality: String,
    category: Option<String>,
}

impl RequirementRow {
    pub(crate) fn into_record(self) -> Result<Requirement, sqlx::Error> {
        let criticality = Criticality::parse(&self.criticality)
            .ok_or_else(|| corrupt("requirements", self.id, format!("criticality {:?}", self.criticality)))?;
        Ok(Requirement {
            id: RequirementId::from_uuid(self.id),
            code: self.code,
            title: self.title,
            framework: self.framework,
            criticality,
            category: self.category,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AttributesRow {
    pub(crate) organization_id: Uuid,
    pub(crate) kii_category: Option<i16>,
    pub(crate) pdn_level: Option<i16>,
    pub(crate) is_financial: bool,
    pub(crate) is_healthcare: bool,
    pub(crate) is_government: bool,
    pub(crate) employee_count: Option<i64>,
    pub(crate) cross_border_data: bool,
    pub(crate) updated_by: String,
    pub(crate) updated_at: DateTime<Utc>,
}

fn rank<T: TryFrom<u8>>(id: Uuid, field: &str, raw: Option<i16>) -> Result<Option<T>, sqlx::Error> {
    raw.map(|value| {
        u8::try_from(value)
            .ok()
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| corrupt("organization_attributes", id, format!("{field} = {value}")))
    })
    .transpose()
}

impl AttributesRow {
    pub(crate) fn from_record(record: &AttributesRecord) -> Self {
        let attrs = &record.attributes;
        Self {
            organization_id: *record.organization_id.as_uuid(),
            kii_category: attrs.kii_category.map(|c| i16::from(u8::from(c))),
            pdn_level: attrs.pdn_level.map(|l| i16::from(u8::from(l))),
            is_financial: attrs.is_financial,
            is_healthcare: attrs.is_healthcare,
            is_government: attrs.is_government,
            employee_count: attrs.employee_count.map(i64::from),
            cross_border_data: attrs.cross_border_data,
            updated_by: record.updated_by.to_string(),
            updated_at: record.updated_at,
        }
    }

    pub(crate) fn into_record(self) -> Result<AttributesRecord, sqlx::Error> {
        let id = self.organization_id;
        let kii_category = rank::<InfrastructureCategory>(id, "kii_category", self.kii_category)?;
        let pdn_level = rank::<DataProtectionLevel>(id, "pdn_level", self.pdn_level)?;
        let employee_count = self
            .employee_count
            .map(|n| {
                u32::try_from(n)
                    .map_err(|_| corrupt("organization_attributes", id, format!("employee_count = {n}")))
            })
            .transpose()?;
        let updated_by = Actor::new(self.updated_by)
            .map_err(|e| corrupt("organization_attributes", id, e))?;
        Ok(AttributesRecord {
            organization_id: OrganizationId::from_uuid(id),
            attributes: OrganizationAttributes {
                kii_category,
                pdn_level,
                is_financial: self.is_financial,
                is_healthcare: self.is_healthcare,
                is_government: self.is_government,
                employee_count,
                cross_border_data: self.cross_border_data,
            },
            updated_by,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RuleRow {
    requirement_id: Uuid,
    kind: String,
    filter: Option<serde_json::Value>,
    created_by: String,
    updated_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RuleRow {
    pub(crate) fn into_record(self) -> Result<ApplicabilityRule, sqlx::Error> {
        let id = self.requirement_id;
        let kind = RuleKind::parse(&self.kind)
            .ok_or_else(|| corrupt("applicability_rules", id, format!("kind {:?}", self.kind)))?;
        let filter = match kind {
            RuleKind::Automatic => Some(
                FilterExpr::parse_optional(self.filter.as_ref())
                    .map_err(|e| corrupt("applicability_rules", id, e))?,
            ),
            RuleKind::Manual => None,
        };
        Ok(ApplicabilityRule {
            requirement_id: RequirementId::from_uuid(id),
            kind,
            filter,
            created_by: Actor::new(self.created_by).map_err(|e| corrupt("applicability_rules", id, e))?,
            updated_by: Actor::new(self.updated_by).map_err(|e| corrupt("applicability_rules", id, e))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct MappingRow {
    pub(crate) id: Uuid,
    pub(crate) requirement_id: Uuid,
    pub(crate) organization_id: Uuid,
    pub(crate) mapping_type: String,
    pub(crate) reason: Option<String>,
    pub(crate) created_by: String,
    pub(crate) updated_by: String,
    pub(crate) batch_id: Option<Uuid>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl MappingRow {
    pub(crate) fn into_record(self) -> Result<OrganizationMapping, sqlx::Error> {
        let id = self.id;
        let fail = |detail: String| corrupt("organization_mappings", id, detail);
        let mapping_type = MappingType::parse(&self.mapping_type)
            .ok_or_else(|| fail(format!("mapping_type {:?}", self.mapping_type)))?;
        let reason = self
            .reason
            .map(Reason::new)
            .transpose()
            .map_err(|e| fail(e.to_string()))?;
        let mapping = OrganizationMapping {
            id: MappingId::from_uuid(id),
            requirement_id: RequirementId::from_uuid(self.requirement_id),
            organization_id: OrganizationId::from_uuid(self.organization_id),
            mapping_type,
            reason,
            created_by: Actor::new(self.created_by).map_err(|e| fail(e.to_string()))?,
            updated_by: Actor::new(self.updated_by).map_err(|e| fail(e.to_string()))?,
            batch_id: self.batch_id.map(BatchId::from_uuid),
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        mapping.validate().map_err(|e| fail(e.to_string()))?;
        Ok(mapping)
    }
}

/// A mapping row returned by an upsert, with whether the statement inserted it.
#[derive(sqlx::FromRow)]
pub(crate) struct UpsertedMappingRow {
    #[sqlx(flatten)]
    pub(crate) row: MappingRow,
    pub(crate) inserted: bool,
}

#[derive(sqlx::FromRow)]
pub(crate) struct AuditEventRow {
    pub(crate) id: Uuid,
    pub(crate) sequence: i64,
    pub(crate) kind: String,
    pub(crate) organization_id: Option<Uuid>,
    pub(crate) requirement_id: Option<Uuid>,
    pub(crate) reason: Option<String>,
    pub(crate) actor: String,
    pub(crate) batch_id: Option<Uuid>,
    pub(crate) recorded_at: DateTime<Utc>,
    pub(crate) previous_hash: String,
    pub(crate) event_hash: String,
}

impl AuditEventRow {
    pub(crate) fn into_event(self) -> Result<AuditEvent, sqlx::Error> {
        let id = self.id;
        let fail = |detail: String| corrupt("applicability_audit_events", id, detail);
        let kind = AuditEventKind::parse(&self.kind).ok_or_else(|| fail(format!("kind {:?}", self.kind)))?;
        let sequence = u64::try_from(self.sequence).map_err(|_| fail(format!("sequence {}", self.sequence)))?;
        Ok(AuditEvent {
            id: AuditEventId::from_uuid(id),
            sequence,
            kind,
            organization_id: self.organization_id.map(OrganizationId::from_uuid),
            requirement_id: self.requirement_id.map(RequirementId::from_uuid),
            reason: self
                .reason
                .map(Reason::new)
                .transpose()
                .map_err(|e| fail(e.to_string()))?,
            actor: Actor::new(self.actor).map_err(|e| fail(e.to_string()))?,
            batch_id: self.batch_id.map(BatchId::from_uuid),
            recorded_at: self.recorded_at,
            previous_hash: self.previous_hash,
            event_hash: self.event_hash,
        })
    }
}
