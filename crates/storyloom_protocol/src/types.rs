//! Wire payload types for Admission/Dispatch <-> Worker messages.
//!
//! These are the JSON bodies carried by [`crate::Message`] frames; the
//! [`crate::OpCode`] on the header says which of these to deserialize.

use serde::{Deserialize, Serialize};

/// Numeric job identifier carried in the wire header (`Q` = u64, network
/// byte order). Distinct from [`storyloom_ids`]'s UUID-based job identity:
/// this one only needs to round-trip through the 16-byte header cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WireJobId(u64);

impl WireJobId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WireJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker -> dispatcher handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub worker_id: String,
    pub queues: Vec<String>,
    pub concurrency: u32,
}

/// Dispatcher -> worker: process this book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub job_id: String,
    pub book_id: String,
    pub user_id: String,
    pub priority: u8,
    pub attempt: u32,
}

/// Worker -> dispatcher: still alive, working on job X.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub job_id: String,
    pub chapters_completed: u32,
    pub chapters_total: u32,
}

/// Worker -> dispatcher: job finished (success or failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReceipt {
    pub job_id: String,
    pub status: JobOutcome,
    pub descriptions_found: u32,
    pub images_requested: u32,
    pub error_message: Option<String>,
    pub is_transient: bool,
    pub unavailable_processors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Bidirectional error payload (opcode `Err`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub is_transient: bool,
}

/// Dispatcher -> worker: cancel this job cooperatively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortCommand {
    pub job_id: String,
    pub reason: String,
}

/// Job lifecycle states (`ParsingJob.state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    Defer,
    Reject,
}

/// Structured reason code accompanying an [`AdmissionDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionReason {
    Admitted,
    BookCooldown,
    GlobalCapacity,
    UserQuota,
    SystemResources,
    HardPolicy,
    CoordinationUnavailable,
}

impl AdmissionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionReason::Admitted => "admitted",
            AdmissionReason::BookCooldown => "book_cooldown",
            AdmissionReason::GlobalCapacity => "global_capacity",
            AdmissionReason::UserQuota => "user_quota",
            AdmissionReason::SystemResources => "system_resources",
            AdmissionReason::HardPolicy => "hard_policy",
            AdmissionReason::CoordinationUnavailable => "coordination_unavailable",
        }
    }
}
