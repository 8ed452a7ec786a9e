//! Database pool creation.
//!
//! Compile-time database selection via feature flags. Unlike `sqlx::AnyPool`,
//! concrete pool types are used so `#[derive(FromRow)]` works against
//! database-specific types (e.g. SQLite's `TEXT`-stored timestamps).
//!
//! If both features are enabled, `postgres` takes priority.

use tracing::info;

use crate::{DatabaseType, DbError};

/// Database pool type alias.
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPool = sqlx::PgPool;

#[cfg(feature = "sqlite")]
pub type DbPool = sqlx::SqlitePool;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub db_type: DatabaseType,
    pub max_connections: u32,
}

impl DbConfig {
    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref()),
            db_type: DatabaseType::Sqlite,
            max_connections: 5,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            db_type: DatabaseType::Sqlite,
            max_connections: 1,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db_type: DatabaseType::Postgres,
            max_connections: 10,
        }
    }

    pub fn from_url(url: impl Into<String>) -> Result<Self, DbError> {
        let url = url.into();
        let db_type = DatabaseType::from_url(&url)
            .ok_or_else(|| DbError::InvalidUrl(url.clone()))?;

        let max_connections = match db_type {
            DatabaseType::Sqlite => 5,
            DatabaseType::Postgres => 10,
        };

        Ok(Self {
            url,
            db_type,
            max_connections,
        })
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Create a database pool and run schema migration, applying
/// database-specific optimizations (e.g. SQLite WAL mode).
pub async fn create_pool(config: DbConfig) -> Result<DbPool, DbError> {
    #[cfg(feature = "sqlite")]
    {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        apply_sqlite_optimizations(&pool).await?;
        crate::schema::migrate(&pool).await?;

        info!("connected to {} database", config.db_type);
        return Ok(pool);
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        crate::schema::migrate(&pool).await?;

        info!("connected to {} database", config.db_type);
        return Ok(pool);
    }

    #[allow(unreachable_code)]
    Err(DbError::NotCompiled(
        "unknown".to_string(),
        "sqlite or postgres".to_string(),
    ))
}

#[cfg(feature = "sqlite")]
async fn apply_sqlite_optimizations(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn test_sqlite_pool_runs_migration() {
        let config = DbConfig::sqlite_memory();
        let pool = create_pool(config).await;
        assert!(pool.is_ok());
    }

    #[test]
    fn from_url_rejects_unknown_scheme() {
        let result = DbConfig::from_url("mysql://localhost/test");
        assert!(matches!(result, Err(DbError::InvalidUrl(_))));
    }
}
