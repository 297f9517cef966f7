//! Manual include / exclude / revert and filter-driven bulk inclusion.
//!
//! A manual decision is a single upsert keyed on the (requirement,
//! organization) pair. Revert deletes the manual row, after which the pair
//! falls back to fresh automatic evaluation. Bulk inclusion writes every
//! selected pair through one atomic store call with a shared reason, actor,
//! batch id and timestamp.

use chrono::Utc;
use reqmap_core::{
    Actor, BatchId, EngineError, MappingType, OrganizationId, OrganizationMapping, Reason,
    RequirementId,
};
use reqmap_filter::RequirementFilter;

use crate::engine::{ApplicabilityEngine, BulkOutcome, RevertOutcome};
use crate::store::ApplicabilityStore;

impl<S: ApplicabilityStore> ApplicabilityEngine<S> {
    /// Record a `manual_include` for the pair. Valid from any prior state.
    pub async fn include(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
        reason: Reason,
        actor: Actor,
    ) -> Result<OrganizationMapping, EngineError> {
        self.manual_decision(
            organization_id,
            requirement_id,
            MappingType::ManualInclude,
            reason,
            actor,
        )
        .await
    }

    /// Record a `manual_exclude` for the pair. Valid from any prior state.
    pub async fn exclude(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
        reason: Reason,
        actor: Actor,
    ) -> Result<OrganizationMapping, EngineError> {
        self.manual_decision(
            organization_id,
            requirement_id,
            MappingType::ManualExclude,
            reason,
            actor,
        )
        .await
    }

    async fn manual_decision(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
        mapping_type: MappingType,
        reason: Reason,
        actor: Actor,
    ) -> Result<OrganizationMapping, EngineError> {
        self.require_organization(organization_id).await?;
        self.require_requirement(requirement_id).await?;

        let mapping = OrganizationMapping::manual(
            requirement_id,
            organization_id,
            mapping_type,
            reason,
            actor,
            Utc::now(),
        )?;
        let stored = self.store.upsert_mapping(mapping).await?;
        tracing::info!(
            organization_id = %organization_id,
            requirement_id = %requirement_id,
            mapping_type = %mapping_type,
            actor = %stored.updated_by,
            "manual decision recorded"
        );
        Ok(stored)
    }

    /// Cancel the pair's manual decision.
    ///
    /// Deleting a row that is absent, or that is only an `automatic` cache
    /// row, is a successful no-op. Only the organization must exist, so a
    /// decision left behind by a requirement removed from the catalog can
    /// still be cleared. The pair's cache row is refreshed afterwards in
    /// both cases, so retrying a revert whose refresh failed repairs it.
    pub async fn revert(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
        actor: Actor,
    ) -> Result<RevertOutcome, EngineError> {
        self.require_organization(organization_id).await?;

        let removed = self
            .store
            .delete_manual_mapping(requirement_id, organization_id, actor.clone())
            .await?;
        match &removed {
            Some(mapping) => tracing::info!(
                organization_id = %organization_id,
                requirement_id = %requirement_id,
                previous = %mapping.mapping_type,
                actor = %actor,
                "manual decision reverted"
            ),
            None => tracing::debug!(
                organization_id = %organization_id,
                requirement_id = %requirement_id,
                "revert found no manual decision"
            ),
        }

        let cache_refreshed = match self.refresh_pair(requirement_id, organization_id).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    requirement_id = %requirement_id,
                    error = %err,
                    "cache refresh failed after revert"
                );
                false
            }
        };
        Ok(RevertOutcome {
            removed: removed.is_some(),
            mapping: removed,
            cache_refreshed,
        })
    }

    /// Include every catalog requirement selected by `filter` for one
    /// organization, atomically.
    ///
    /// Existing rows of any type are replaced. Returns the number of rows
    /// actually committed; on failure nothing is written.
    pub async fn add_by_filter(
        &self,
        organization_id: OrganizationId,
        filter: &RequirementFilter,
        reason: Reason,
        actor: Actor,
    ) -> Result<BulkOutcome, EngineError> {
        filter.validate()?;
        self.require_organization(organization_id).await?;

        let catalog = self.store.list_requirements().await?;
        let selected = filter.select(&catalog);
        let batch_id = BatchId::new();
        let decided_at = Utc::now();

        if selected.is_empty() {
            tracing::info!(
                organization_id = %organization_id,
                batch_id = %batch_id,
                "bulk include selected no requirements"
            );
            return Ok(BulkOutcome {
                batch_id,
                matched: 0,
                created: 0,
                updated: 0,
                decided_at,
            });
        }

        let mappings = selected
            .iter()
            .map(|requirement| {
                OrganizationMapping::manual(
                    requirement.id,
                    organization_id,
                    MappingType::ManualInclude,
                    reason.clone(),
                    actor.clone(),
                    decided_at,
                )
                .map(|m| m.with_batch(batch_id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let matched = mappings.len();
        let written = self.store.upsert_mappings(mappings).await?;
        tracing::info!(
            organization_id = %organization_id,
            batch_id = %batch_id,
            matched,
            created = written.created,
            updated = written.updated,
            actor = %actor,
            "bulk include committed"
        );
        Ok(BulkOutcome {
            batch_id,
            matched,
            created: written.created,
            updated: written.updated,
            decided_at,
        })
    }
}
