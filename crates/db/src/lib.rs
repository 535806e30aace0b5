//! Persistence collaborator for the monitor.
//!
//! Everything the pipeline persists is an append-only JSON document in one of
//! four [`Collection`]s. [`DocumentStore`] is the seam; [`MemoryStore`] backs
//! tests and degraded mode, [`PgStore`] writes to PostgreSQL.

pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

pub use document::{Collection, DocumentFilter, StoredDocument};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{DocumentStore, SharedStore};

pub type DbPool = sqlx::PgPool;

/// How long pool creation waits for the first connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse a database URL without connecting.
pub fn connect_options(database_url: &str) -> Result<PgConnectOptions, sqlx::Error> {
    database_url.parse()
}

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect_with(connect_options(database_url)?)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
