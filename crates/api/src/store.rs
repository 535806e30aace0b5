//! Document store selection at startup.

use std::sync::Arc;

use anyhow::Context;
use fleetwatch_db::{Collection, DocumentStore, MemoryStore, PgStore, SharedStore};

/// JSONB fields indexed per collection when running against Postgres.
const INDEXED_FIELDS: [(Collection, &str); 3] = [
    (Collection::HealthReports, "rating"),
    (Collection::Diagnostics, "severity"),
    (Collection::Notifications, "type"),
];

/// Postgres when `database_url` is set and reachable, otherwise an in-memory
/// store. Only a malformed URL fails startup.
pub async fn open_store(database_url: Option<&str>) -> anyhow::Result<SharedStore> {
    let Some(database_url) = database_url else {
        tracing::warn!("DATABASE_URL not set, monitor data will not survive restarts");
        return Ok(Arc::new(MemoryStore::new()));
    };
    fleetwatch_db::connect_options(database_url).context("DATABASE_URL is not a valid URL")?;

    match connect(database_url).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) => {
            tracing::warn!(
                error = %format!("{e:#}"),
                "Database unavailable, continuing with in-memory store"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn connect(database_url: &str) -> anyhow::Result<PgStore> {
    let pool = fleetwatch_db::create_pool(database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    fleetwatch_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    fleetwatch_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let store = PgStore::new(pool);
    for (collection, field) in INDEXED_FIELDS {
        store
            .ensure_index(collection, field)
            .await
            .with_context(|| format!("Failed to index {collection}.{field}"))?;
    }
    Ok(store)
}
