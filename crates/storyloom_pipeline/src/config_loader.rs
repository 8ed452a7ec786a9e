//! Refreshable registry config: read current per-processor tuning from
//! `storyloom_db`, merge over defaults, and never let a read failure take
//! the registry down.

use sqlx::Row;
use storyloom_db::DbPool;
use tracing::warn;

use crate::registry::{ProcessorConfig, ProcessorRegistry};

/// Reads `processor_configs` (owner_id-scoped overrides are out of scope;
/// this is a single global tuning table) and applies each row onto the
/// registry, leaving untouched entries at their constructor default.
pub async fn refresh(registry: &mut ProcessorRegistry, pool: &DbPool) {
    let names = registry.names();
    for name in names {
        match load_one(pool, &name).await {
            Ok(Some(cfg)) => registry.set_config(&name, cfg),
            Ok(None) => {}
            Err(err) => {
                warn!(processor = %name, error = %err, "failed to load processor config, keeping default");
            }
        }
    }
}

async fn load_one(pool: &DbPool, name: &str) -> Result<Option<ProcessorConfig>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT enabled, weight, threshold, priority_rank FROM processor_configs WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| ProcessorConfig {
        enabled: r.get::<i64, _>("enabled") != 0,
        weight: r.get::<f64, _>("weight") as f32,
        threshold: r.get::<f64, _>("threshold") as f32,
        priority_rank: r.get::<i64, _>("priority_rank") as u8,
    }))
}
