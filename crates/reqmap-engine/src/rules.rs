//! Rule administration and preview.

use std::collections::HashMap;

use chrono::Utc;
use reqmap_core::{
    Actor, EngineError, OrganizationAttributes, OrganizationId, RequirementId, ResourceKind,
};
use reqmap_filter::FilterExpr;
use serde_json::Value;

use crate::engine::{ApplicabilityEngine, RuleChange, RulePreview};
use crate::rule::{ApplicabilityRule, RuleDraft};
use crate::store::ApplicabilityStore;

impl<S: ApplicabilityStore> ApplicabilityEngine<S> {
    /// Create or replace the rule for a requirement, then reconcile that
    /// requirement's cache rows across every organization.
    ///
    /// The filter of an `automatic` draft is validated here, so a stored
    /// rule can always be evaluated. Once the rule is saved the call
    /// succeeds, whether or not the cache refresh does.
    pub async fn upsert_rule(
        &self,
        requirement_id: RequirementId,
        draft: &RuleDraft,
        actor: Actor,
    ) -> Result<RuleChange, EngineError> {
        self.require_requirement(requirement_id).await?;
        let rule = ApplicabilityRule::from_draft(requirement_id, draft, actor, Utc::now())?;
        let stored = self.store.upsert_rule(rule).await?;
        tracing::info!(
            requirement_id = %requirement_id,
            kind = %stored.kind,
            leaves = stored.filter.as_ref().map_or(0, FilterExpr::leaf_count),
            actor = %stored.updated_by,
            "applicability rule saved"
        );
        let cache_refreshed = self.refresh_after_rule_change(requirement_id).await;
        Ok(RuleChange {
            rule: stored,
            cache_refreshed,
        })
    }

    /// The stored rule for a requirement.
    pub async fn get_rule(
        &self,
        requirement_id: RequirementId,
    ) -> Result<ApplicabilityRule, EngineError> {
        self.require_requirement(requirement_id).await?;
        self.store
            .get_rule(requirement_id)
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Rule, requirement_id))
    }

    /// Delete the rule for a requirement and clear its automatic cache rows.
    ///
    /// Manual mappings are kept. Deleting an absent rule is NotFound; to
    /// repair the cache after a delete whose refresh failed, call
    /// [`ApplicabilityEngine::reconcile_requirement`].
    pub async fn delete_rule(
        &self,
        requirement_id: RequirementId,
        actor: Actor,
    ) -> Result<RuleChange, EngineError> {
        let removed = self
            .store
            .delete_rule(requirement_id, actor.clone())
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Rule, requirement_id))?;
        tracing::info!(
            requirement_id = %requirement_id,
            actor = %actor,
            "applicability rule deleted"
        );
        let cache_refreshed = self.refresh_after_rule_change(requirement_id).await;
        Ok(RuleChange {
            rule: removed,
            cache_refreshed,
        })
    }

    async fn refresh_after_rule_change(&self, requirement_id: RequirementId) -> bool {
        match self.refresh_requirement_cache(requirement_id).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(
                    requirement_id = %requirement_id,
                    error = %err,
                    "cache refresh failed after rule change"
                );
                false
            }
        }
    }

    /// Validate a filter and report the organizations it would match,
    /// without saving anything.
    pub async fn preview_rule(&self, filter: &Value) -> Result<RulePreview, EngineError> {
        let expr = FilterExpr::parse(filter)?;
        let organizations = self.store.list_organizations().await?;
        let attributes: HashMap<OrganizationId, OrganizationAttributes> = self
            .store
            .list_attributes()
            .await?
            .into_iter()
            .map(|r| (r.organization_id, r.attributes))
            .collect();

        let unknown = OrganizationAttributes::default();
        let mut matched: Vec<OrganizationId> = organizations
            .iter()
            .filter(|org| expr.matches(attributes.get(&org.id).unwrap_or(&unknown)))
            .map(|org| org.id)
            .collect();
        matched.sort();

        tracing::debug!(
            evaluated = organizations.len(),
            matched = matched.len(),
            "rule preview evaluated"
        );
        Ok(RulePreview {
            evaluated: organizations.len(),
            matched,
        })
    }
}
