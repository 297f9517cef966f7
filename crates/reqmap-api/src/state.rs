//! # Application State
//!
//! Shared state passed to all Axum route handlers via the `State` extractor:
//! the applicability engine over the configured store backend, runtime
//! configuration, the optional database pool, and the metrics registry.

use reqmap_core::{
    Actor, AttributesRecord, Organization, OrganizationId, OrganizationMapping, Requirement,
    RequirementId,
};
use reqmap_engine::{
    ApplicabilityEngine, ApplicabilityRule, AuditEvent, AuditLog, BatchWrite, CacheApplied,
    CacheChanges, MappingStore, MemoryStore, OrganizationStore, RequirementCatalog, RuleStore,
    StoreResult,
};
use sqlx::PgPool;
use thiserror::Error;

use crate::db::PgStore;
use crate::middleware::metrics::ApiMetrics;

/// Log output format for the binary's subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Configuration values that could not be parsed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value of the wrong shape.
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Application configuration, read once at startup.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Postgres connection URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Upper bound on pooled database connections.
    pub db_max_connections: u32,
    /// Log output format.
    pub log_format: LogFormat,
    /// Whether request metrics are recorded and `/metrics` is served.
    pub metrics_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            db_max_connections: 10,
            log_format: LogFormat::Text,
            metrics_enabled: true,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "database_url",
                &self.database_url.as_deref().map(redact_credentials),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("log_format", &self.log_format)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

/// Hide the user-info part of a connection URL.
fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://[REDACTED]@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                value: raw,
                expected: "a port number",
            })?,
            None => defaults.port,
        };

        let db_max_connections = match lookup("REQMAP_DB_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "REQMAP_DB_MAX_CONNECTIONS",
                        value: raw,
                        expected: "a positive integer",
                    })
                }
            },
            None => defaults.db_max_connections,
        };

        let log_format = match lookup("REQMAP_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "REQMAP_LOG_FORMAT",
                    value: other.to_string(),
                    expected: "text or json",
                })
            }
        };

        let metrics_enabled = match lookup("REQMAP_METRICS_ENABLED").as_deref().map(str::trim) {
            None | Some("") => defaults.metrics_enabled,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "REQMAP_METRICS_ENABLED",
                    value: other.to_string(),
                    expected: "true or false",
                })
            }
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            port,
            database_url,
            db_max_connections,
            log_format,
            metrics_enabled,
        })
    }
}

/// The store the engine runs against.
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-process store; state is lost on restart.
    Memory(MemoryStore),
    /// Postgres via SQLx.
    Postgres(PgStore),
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Backend::Memory($store) => $call.await,
            Backend::Postgres($store) => $call.await,
        }
    };
}

impl OrganizationStore for Backend {
    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        dispatch!(self, s => s.get_organization(id))
    }

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        dispatch!(self, s => s.list_organizations())
    }

    async fn get_attributes(&self, id: OrganizationId) -> StoreResult<Option<AttributesRecord>> {
        dispatch!(self, s => s.get_attributes(id))
    }

    async fn list_attributes(&self) -> StoreResult<Vec<AttributesRecord>> {
        dispatch!(self, s => s.list_attributes())
    }

    async fn put_attributes(&self, record: AttributesRecord) -> StoreResult<()> {
        dispatch!(self, s => s.put_attributes(record))
    }
}

impl RequirementCatalog for Backend {
    async fn get_requirement(&self, id: RequirementId) -> StoreResult<Option<Requirement>> {
        dispatch!(self, s => s.get_requirement(id))
    }

    async fn list_requirements(&self) -> StoreResult<Vec<Requirement>> {
        dispatch!(self, s => s.list_requirements())
    }
}

impl RuleStore for Backend {
    async fn get_rule(&self, requirement_id: RequirementId) -> StoreResult<Option<ApplicabilityRule>> {
        dispatch!(self, s => s.get_rule(requirement_id))
    }

    async fn list_rules(&self) -> StoreResult<Vec<ApplicabilityRule>> {
        dispatch!(self, s => s.list_rules())
    }

    async fn upsert_rule(&self, rule: ApplicabilityRule) -> StoreResult<ApplicabilityRule> {
        dispatch!(self, s => s.upsert_rule(rule))
    }

    async fn delete_rule(
        &self,
        requirement_id: RequirementId,
        actor: Actor,
    ) -> StoreResult<Option<ApplicabilityRule>> {
        dispatch!(self, s => s.delete_rule(requirement_id, actor))
    }
}

impl MappingStore for Backend {
    async fn mappings_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<OrganizationMapping>> {
        dispatch!(self, s => s.mappings_for_organization(organization_id))
    }

    async fn mappings_for_requirement(
        &self,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<OrganizationMapping>> {
        dispatch!(self, s => s.mappings_for_requirement(requirement_id))
    }

    async fn upsert_mapping(&self, mapping: OrganizationMapping) -> StoreResult<OrganizationMapping> {
        dispatch!(self, s => s.upsert_mapping(mapping))
    }

    async fn upsert_mappings(&self, mappings: Vec<OrganizationMapping>) -> StoreResult<BatchWrite> {
        dispatch!(self, s => s.upsert_mappings(mappings))
    }

    async fn delete_manual_mapping(
        &self,
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        actor: Actor,
    ) -> StoreResult<Option<OrganizationMapping>> {
        dispatch!(self, s => s.delete_manual_mapping(requirement_id, organization_id, actor))
    }

    async fn apply_cache_changes(&self, changes: CacheChanges) -> StoreResult<CacheApplied> {
        dispatch!(self, s => s.apply_cache_changes(changes))
    }
}

impl AuditLog for Backend {
    async fn history(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<AuditEvent>> {
        dispatch!(self, s => s.history(organization_id, requirement_id))
    }

    async fn audit_events(&self) -> StoreResult<Vec<AuditEvent>> {
        dispatch!(self, s => s.audit_events())
    }
}

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The applicability engine over the configured backend.
    pub engine: ApplicabilityEngine<Backend>,
    /// Runtime configuration.
    pub config: AppConfig,
    /// Present when running against Postgres; used by the readiness probe.
    pub db_pool: Option<PgPool>,
    /// Request and domain metrics.
    pub metrics: ApiMetrics,
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn new() -> Self {
        Self::with_memory(MemoryStore::new(), AppConfig::default())
    }

    /// State over an existing in-memory store.
    pub fn with_memory(store: MemoryStore, config: AppConfig) -> Self {
        Self {
            engine: ApplicabilityEngine::new(Backend::Memory(store)),
            config,
            db_pool: None,
            metrics: ApiMetrics::new(),
        }
    }

    /// State for the configured backend: Postgres when a pool is supplied,
    /// otherwise a fresh in-memory store.
    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        match db_pool {
            Some(pool) => Self {
                engine: ApplicabilityEngine::new(Backend::Postgres(PgStore::new(pool.clone()))),
                config,
                db_pool: Some(pool),
                metrics: ApiMetrics::new(),
            },
            None => Self::with_memory(MemoryStore::new(), config),
        }
    }

    /// The in-memory store, when that is the active backend. Used to seed
    /// organizations and the requirement catalog.
    pub fn memory_store(&self) -> Option<&MemoryStore> {
        match self.engine.store() {
            Backend::Memory(store) => Some(store),
            Backend::Postgres(_) => None,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
