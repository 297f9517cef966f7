//! # Database Persistence Layer
//!
//! Postgres persistence for applicability state via SQLx.
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, the API
//! stores attributes, rules, mappings and the audit chain in PostgreSQL and
//! reads organizations and the requirement catalog from their tables. When
//! absent, the API runs against the in-memory store (development and tests).

mod rows;
pub mod store;

use std::time::Duration;

use reqmap_core::{EngineError, PersistenceError};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::state::AppConfig;

pub use store::PgStore;

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if no database URL is configured (in-memory mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(config: &AppConfig) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!(
            "DATABASE_URL not set — running in-memory only mode. \
             State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Connected to PostgreSQL"
    );

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Map a driver error to the engine's error contract.
///
/// A unique violation the upsert could not absorb is a conflict; everything
/// else (pool timeout, dropped connection, corrupt row) is a persistence
/// failure.
pub(crate) fn store_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> EngineError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EngineError::Conflict(format!("{operation}: {}", db.message()))
        }
        _ => PersistenceError::new(operation, err.to_string()).into(),
    }
}
