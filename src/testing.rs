//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::assistant::{
    AssistantBackend, CertificateArgs, Role, SessionMessage, ToolCall, ToolOutput, ToolResult,
    Turn, TurnStatus,
};
use crate::certificate::DocumentGenerator;
use crate::error::{AssistantError, MailboxError};
use crate::mailbox::{EmailMessage, Mailbox, OutgoingReply};

pub fn user_message(text: &str) -> SessionMessage {
    SessionMessage {
        id: format!("msg_user_{}", text.len()),
        role: Role::User,
        text: text.to_string(),
    }
}

pub fn assistant_message(text: &str) -> SessionMessage {
    SessionMessage {
        id: format!("msg_asst_{}", text.len()),
        role: Role::Assistant,
        text: text.to_string(),
    }
}

/// Backend replaying a script of run snapshots.
///
/// Each `get_turn` consumes one snapshot; the last one repeats forever.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Turn>>,
    messages: Vec<SessionMessage>,
    fail_start: bool,
    hang_on_poll: bool,
    appended: Mutex<Vec<String>>,
    submitted: Mutex<Vec<ToolOutput>>,
    pub sessions_created: AtomicUsize,
    pub get_turn_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Turn>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            messages: Vec::new(),
            fail_start: false,
            hang_on_poll: false,
            appended: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            sessions_created: AtomicUsize::new(0),
            get_turn_calls: AtomicUsize::new(0),
        }
    }

    /// Messages returned by `list_messages`, newest first.
    pub fn with_messages(mut self, messages: Vec<SessionMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Make `start_turn` fail with a server error.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make `get_turn` never resolve, like a request with no response.
    pub fn hanging_poll(mut self) -> Self {
        self.hang_on_poll = true;
        self
    }

    pub fn status(status: TurnStatus) -> Turn {
        Turn {
            id: "run_1".into(),
            session_id: "thread_0".into(),
            status,
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: &str, arguments: &str) -> Turn {
        Turn {
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
            ..Self::status(TurnStatus::RequiresAction)
        }
    }

    pub fn appended(&self) -> Vec<String> {
        self.appended.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<ToolOutput> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantBackend for ScriptedBackend {
    async fn create_session(&self) -> Result<String, AssistantError> {
        let n = self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("thread_{n}"))
    }

    async fn append_user_message(
        &self,
        _session_id: &str,
        content: &str,
    ) -> Result<String, AssistantError> {
        let mut appended = self.appended.lock().unwrap();
        appended.push(content.to_string());
        Ok(format!("msg_{}", appended.len()))
    }

    async fn start_turn(&self, session_id: &str) -> Result<Turn, AssistantError> {
        if self.fail_start {
            return Err(AssistantError::Api {
                status: 500,
                message: "The server had an error processing your request".into(),
            });
        }
        Ok(Turn {
            session_id: session_id.to_string(),
            ..Self::status(TurnStatus::Queued)
        })
    }

    async fn get_turn(&self, _session_id: &str, _turn_id: &str) -> Result<Turn, AssistantError> {
        self.get_turn_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_poll {
            std::future::pending::<()>().await;
        }
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.ok_or_else(|| AssistantError::Api {
            status: 404,
            message: "script exhausted".into(),
        })
    }

    async fn submit_tool_outputs(
        &self,
        _session_id: &str,
        _turn_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Turn, AssistantError> {
        self.submitted.lock().unwrap().extend(outputs);
        Ok(Self::status(TurnStatus::Queued))
    }

    async fn list_messages(&self, _session_id: &str) -> Result<Vec<SessionMessage>, AssistantError> {
        Ok(self.messages.clone())
    }
}

/// Document generator returning a canned result.
pub struct MockGenerator {
    result: ToolResult,
    last_args: Mutex<Option<CertificateArgs>>,
    pub calls: AtomicUsize,
}

impl MockGenerator {
    pub fn succeeding(path: &str) -> Self {
        Self::with_result(ToolResult::success("Certificate generated successfully", path))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_result(ToolResult::error(message))
    }

    fn with_result(result: ToolResult) -> Self {
        Self {
            result,
            last_args: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn last_args(&self) -> Option<CertificateArgs> {
        self.last_args.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentGenerator for MockGenerator {
    async fn generate(&self, args: &CertificateArgs) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock().unwrap() = Some(args.clone());
        self.result.clone()
    }
}

/// Inbound message `id` from `sender`, received after the epoch.
pub fn inbound(id: &str, sender: &str) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        thread_id: Some(format!("thread-{id}")),
        sender: sender.to_string(),
        sender_address: sender.to_lowercase(),
        sender_name: None,
        subject: "Question".into(),
        body: format!("body of {id}"),
        timestamp: DateTime::from_timestamp(1_760_000_000, 0).unwrap_or_default(),
        message_id: Some(format!("<{id}@mail.example.com>")),
        references: Vec::new(),
    }
}

/// In-memory mailbox. Always reports the same unread messages until told
/// otherwise; records replies and read markers.
pub struct MockMailbox {
    unread: Vec<EmailMessage>,
    fail_list: bool,
    fail_send: bool,
    sent: Mutex<Vec<OutgoingReply>>,
    marked_read: Mutex<Vec<String>>,
    pub list_calls: AtomicUsize,
}

impl MockMailbox {
    pub const ADDRESS: &'static str = "support@hub.example";

    pub fn new(unread: Vec<EmailMessage>) -> Self {
        Self {
            unread,
            fail_list: false,
            fail_send: false,
            sent: Mutex::new(Vec::new()),
            marked_read: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn sent(&self) -> Vec<OutgoingReply> {
        self.sent.lock().unwrap().clone()
    }

    pub fn marked_read(&self) -> Vec<String> {
        self.marked_read.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for MockMailbox {
    fn address(&self) -> &str {
        Self::ADDRESS
    }

    async fn list_unread_since(
        &self,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<EmailMessage>, MailboxError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(MailboxError::AuthExpired);
        }
        let read = self.marked_read.lock().unwrap();
        Ok(self
            .unread
            .iter()
            .filter(|m| m.timestamp > watermark && !read.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn send_reply(&self, reply: &OutgoingReply) -> Result<(), MailboxError> {
        if self.fail_send {
            return Err(MailboxError::Api {
                status: 503,
                message: "Backend Error".into(),
            });
        }
        self.sent.lock().unwrap().push(reply.clone());
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        self.marked_read.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}
