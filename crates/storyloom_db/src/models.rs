//! Row types for the orchestrator's tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Epub,
    Fb2,
}

/// One of the nine supported book genres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    Fantasy,
    SciFi,
    Mystery,
    Romance,
    Horror,
    Historical,
    Thriller,
    NonFiction,
    Other,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub format: BookFormat,
    pub genre: Genre,
    pub is_parsed: bool,
    pub is_processing: bool,
    pub cover_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub book_id: String,
    pub chapter_number: i64,
    pub title: Option<String>,
    pub content: String,
    pub word_count: i64,
    pub is_description_parsed: bool,
    pub descriptions_found: i64,
    pub is_service_page: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum DescriptionType {
    Location,
    Character,
    Atmosphere,
    Object,
    Action,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Description {
    pub id: String,
    pub chapter_id: String,
    pub description_type: DescriptionType,
    pub content: String,
    pub context: Option<String>,
    pub confidence_score: f64,
    pub priority_score: f64,
    pub position: i64,
    pub word_count: i64,
    pub is_suitable_for_generation: bool,
    pub image_generated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Generating,
    Completed,
    Failed,
    Moderated,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub owner_id: String,
    pub description_id: Option<String>,
    pub chapter_id: Option<String>,
    pub service_used: String,
    pub status: ImageStatus,
    pub location: Option<String>,
    pub prompt: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParsingJobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ParsingJobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ParsingJobState::Succeeded | ParsingJobState::Failed | ParsingJobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParsingJob {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub state: ParsingJobState,
    pub priority: i64,
    pub attempts: i64,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
