//! Mailbox gateway: where inbound mail comes from and replies go.
//!
//! - `Mailbox`: list unread mail, send threaded replies, mark as read
//! - `GmailMailbox`: Gmail REST API implementation
//! - `mime`: reply message assembly
//! - `parse`: raw RFC 822 → `EmailMessage`

pub mod gmail;
pub mod mime;
pub mod parse;

pub use gmail::GmailMailbox;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// An inbound email with the headers needed to answer it in-thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Provider id of the message (used to mark it read).
    pub id: String,
    /// Provider thread id.
    pub thread_id: Option<String>,
    /// Raw `From` header value, e.g. `Jane Doe <jane@example.com>`.
    pub sender: String,
    /// Bare sender address, lowercased. Identifies the correspondent.
    pub sender_address: String,
    /// Display name from the `From` header, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub subject: String,
    pub body: String,
    /// When the provider received the message.
    pub timestamp: DateTime<Utc>,
    /// `Message-ID` header in angle-bracket form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// `References` header ids in angle-bracket form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

/// A reply ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub attachment: Option<PathBuf>,
}

impl OutgoingReply {
    /// Address a reply to `original`, keeping it in the same thread.
    pub fn to_message(original: &EmailMessage, body: String, attachment: Option<PathBuf>) -> Self {
        let mut references = original.references.clone();
        if let Some(id) = &original.message_id {
            references.push(id.clone());
        }

        Self {
            to: original.sender.clone(),
            subject: reply_subject(&original.subject),
            body,
            thread_id: original.thread_id.clone(),
            in_reply_to: original.message_id.clone(),
            references: (!references.is_empty()).then(|| references.join(" ")),
            attachment,
        }
    }
}

/// Prefix `Re: ` unless the subject already carries it.
pub fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Remote mailbox operations used by the driver.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Address replies are sent from.
    fn address(&self) -> &str;

    /// Unread messages received strictly after `watermark`.
    async fn list_unread_since(
        &self,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<EmailMessage>, MailboxError>;

    /// Send a reply, attaching the file if it exists.
    async fn send_reply(&self, reply: &OutgoingReply) -> Result<(), MailboxError>;

    /// Remove the unread marker from a message.
    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError>;
}
