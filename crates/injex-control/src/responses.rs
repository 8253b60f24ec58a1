//! Typed responses for the boundary operations.

use serde::Serialize;

use injex_core::{event::EngineMessage, traits::ProcessInfo};
use injex_executor::{ExecutionOutcome, ExecutionStatus};

/// Process enumeration result.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessList {
    pub count: usize,
    pub processes: Vec<ProcessInfo>,
}

/// Result of an attach/spawn request.
///
/// With an initial script, `status` mirrors the script result (so a timeout
/// or error during injection is visible at the top level) and `suspended`
/// reports whether a spawned target was left suspended by a failed
/// injection.
#[derive(Debug, Clone, Serialize)]
pub struct AttachResponse {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_result: Option<ExecutionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttachResponse {
    pub(crate) fn failed(error: String) -> Self {
        Self {
            status: ExecutionStatus::Error,
            pid: None,
            session_id: None,
            suspended: None,
            message: None,
            script_result: None,
            error: Some(error),
        }
    }
}

/// Acknowledgement for resume/kill pass-throughs.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ControlAck {
    pub success: bool,
    pub pid: u32,
}

/// Drained messages for one session.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesResponse {
    pub status: ExecutionStatus,
    pub session_id: String,
    pub messages_retrieved: usize,
    pub messages: Vec<EngineMessage>,
}

/// Result of a detach request.
#[derive(Debug, Clone, Serialize)]
pub struct DetachResponse {
    pub status: ExecutionStatus,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts_unloaded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub message: String,
}
