//! Persistence layer for the book processing orchestrator.
//!
//! Owns the schema for books, chapters, descriptions, generated images and
//! parsing jobs, and the compile-time database selection (`sqlite` or
//! `postgres` feature) used by every other crate in the workspace.

pub mod error;
pub mod models;
pub mod pool;
pub mod repo;
pub mod schema;

pub use error::{DbError, Result};
pub use models::{Book, Chapter, Description, GeneratedImage, ParsingJob};
pub use pool::{create_pool, DbConfig, DbPool};

/// Database backend selected at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum DatabaseType {
    /// SQLite - embedded transactional database, the default for local/dev use.
    Sqlite,
    /// PostgreSQL - for multi-instance deployments sharing one database.
    Postgres,
}

impl DatabaseType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
        }
    }

    /// Detect database type from a connection URL.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("sqlite:") {
            return Some(Self::Sqlite);
        }
        if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            return Some(Self::Postgres);
        }
        None
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
