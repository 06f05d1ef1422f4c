//! Hosted assistant integration.
//!
//! - `AssistantBackend`: conversation-oriented API (sessions, turns, tool outputs)
//! - `OpenAiAssistant`: REST client for the OpenAI Assistants v2 API
//! - `SessionStore`: correspondent → session mapping
//! - `TurnOrchestrator`: runs one inbound message through a turn and builds the reply

pub mod openai;
pub mod orchestrator;
pub mod session;
pub mod tools;

pub use openai::OpenAiAssistant;
pub use orchestrator::{ReplyPayload, TurnOrchestrator};
pub use session::{SessionRetention, SessionStore};
pub use tools::{CertificateArgs, ToolInvocation, ToolResult, ToolStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AssistantError;

/// Status of an assistant turn (a "run" on the backend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl TurnStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Queued => "queued",
            TurnStatus::InProgress => "in_progress",
            TurnStatus::RequiresAction => "requires_action",
            TurnStatus::Cancelling => "cancelling",
            TurnStatus::Cancelled => "cancelled",
            TurnStatus::Failed => "failed",
            TurnStatus::Completed => "completed",
            TurnStatus::Incomplete => "incomplete",
            TurnStatus::Expired => "expired",
            TurnStatus::Unknown => "unknown",
        }
    }

    /// Whether the turn ended without producing a usable answer.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TurnStatus::Failed | TurnStatus::Cancelled | TurnStatus::Expired | TurnStatus::Incomplete
        )
    }

    /// Whether the backend will not move the turn any further on its own.
    pub fn is_terminal(&self) -> bool {
        *self == TurnStatus::Completed || self.is_failure()
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    pub arguments: String,
}

/// Snapshot of a turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub status: TurnStatus,
    /// Populated when `status` is `RequiresAction`.
    pub tool_calls: Vec<ToolCall>,
}

/// Author of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in a session's history.
#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
}

/// Output of one tool call, reported back to the turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Conversation-oriented assistant API.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Create a new, empty session. Returns its id.
    async fn create_session(&self) -> Result<String, AssistantError>;

    /// Append a user-authored message to a session. Returns the message id.
    async fn append_user_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<String, AssistantError>;

    /// Start a turn over the session's accumulated messages.
    async fn start_turn(&self, session_id: &str) -> Result<Turn, AssistantError>;

    /// Fetch the current state of a turn.
    async fn get_turn(&self, session_id: &str, turn_id: &str) -> Result<Turn, AssistantError>;

    /// Report tool outputs to a turn waiting in `RequiresAction`.
    async fn submit_tool_outputs(
        &self,
        session_id: &str,
        turn_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Turn, AssistantError>;

    /// List session messages, newest first.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>, AssistantError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_deserializes_from_wire_names() {
        let status: TurnStatus = serde_json::from_str("\"requires_action\"").unwrap();
        assert_eq!(status, TurnStatus::RequiresAction);
        let status: TurnStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, TurnStatus::InProgress);
    }

    #[test]
    fn unknown_status_is_not_terminal() {
        let status: TurnStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, TurnStatus::Unknown);
        assert!(!status.is_terminal());
    }

    #[test]
    fn failure_statuses() {
        for status in [
            TurnStatus::Failed,
            TurnStatus::Cancelled,
            TurnStatus::Expired,
            TurnStatus::Incomplete,
        ] {
            assert!(status.is_failure(), "{status} should be a failure");
            assert!(status.is_terminal());
        }
        assert!(!TurnStatus::Completed.is_failure());
        assert!(TurnStatus::Completed.is_terminal());
        assert!(!TurnStatus::RequiresAction.is_terminal());
        assert!(!TurnStatus::Cancelling.is_terminal());
    }

    #[test]
    fn status_display_uses_wire_name() {
        assert_eq!(TurnStatus::Expired.to_string(), "expired");
        assert_eq!(TurnStatus::RequiresAction.to_string(), "requires_action");
    }
}
