//! Polling driver. Answers each unread message in its thread, then marks it read.
//!
//! One message at a time, to completion, before the next. A message whose reply
//! could not be sent stays unread and is not picked up again by this process
//! while it remains in the unread listing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assistant::{ReplyPayload, TurnOrchestrator};
use crate::error::{MailboxError, TurnError};
use crate::mailbox::{EmailMessage, Mailbox, OutgoingReply};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply delivered (the message is marked read).
    Replied,
    /// Reply could not be delivered; the message stays unread.
    SendFailed,
    /// Not answered: sent by this mailbox or already handled.
    Skipped,
    /// Shutdown requested while the turn was in flight.
    Cancelled,
}

/// Tally of one polling cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub replied: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Mail polling loop.
pub struct Driver {
    mailbox: Arc<dyn Mailbox>,
    orchestrator: Arc<TurnOrchestrator>,
    poll_interval: Duration,
    watermark: DateTime<Utc>,
    /// Unread messages that must not be answered again.
    handled: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl Driver {
    /// Messages received at or before `watermark` are ignored.
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        orchestrator: Arc<TurnOrchestrator>,
        poll_interval: Duration,
        watermark: DateTime<Utc>,
    ) -> Self {
        Self {
            mailbox,
            orchestrator,
            poll_interval,
            watermark,
            handled: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Poll until cancelled. Cycle failures are logged and the next cycle runs
    /// after the usual interval.
    pub async fn run(&self) {
        info!(
            watermark = %self.watermark,
            interval_secs = self.poll_interval.as_secs(),
            "Email monitoring started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            debug!("Checking for new emails");
            match self.poll_once().await {
                Ok(summary) if summary.fetched > 0 => info!(
                    fetched = summary.fetched,
                    replied = summary.replied,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Processing cycle finished"
                ),
                Ok(_) => debug!("No new emails found"),
                Err(e) => error!(error = %e, "Error in processing cycle"),
            }

            let evicted = self.orchestrator.sessions().evict_idle().await;
            if evicted > 0 {
                info!(evicted, "Dropped idle assistant sessions");
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Email monitoring stopped");
    }

    /// Run a single cycle: fetch unread → process each → reply → mark read.
    pub async fn poll_once(&self) -> Result<CycleSummary, MailboxError> {
        let emails = self.mailbox.list_unread_since(self.watermark).await?;
        self.handled
            .lock()
            .await
            .retain(|id| emails.iter().any(|e| &e.id == id));

        let mut summary = CycleSummary {
            fetched: emails.len(),
            ..Default::default()
        };
        if !emails.is_empty() {
            info!(count = emails.len(), "Found new emails");
        }

        for email in &emails {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.process_email(email).await {
                Outcome::Replied => summary.replied += 1,
                Outcome::SendFailed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Cancelled => break,
            }
        }
        Ok(summary)
    }

    /// Answer one message.
    pub async fn process_email(&self, email: &EmailMessage) -> Outcome {
        if self.handled.lock().await.contains(&email.id) {
            debug!(id = %email.id, "Already handled, skipping");
            return Outcome::Skipped;
        }

        // Self-loop prevention
        if email.sender_address.eq_ignore_ascii_case(self.mailbox.address()) {
            debug!(id = %email.id, "Skipping self-sent email");
            if let Err(e) = self.mailbox.mark_read(&email.id).await {
                warn!(id = %email.id, error = %e, "Failed to mark self-sent email as read");
                self.handled.lock().await.insert(email.id.clone());
            }
            return Outcome::Skipped;
        }

        info!(
            id = %email.id,
            from = %email.sender_address,
            name = ?email.sender_name,
            subject = %email.subject,
            "Processing email"
        );

        let reply = match self
            .orchestrator
            .try_process_message(&email.sender_address, &email.body)
            .await
        {
            Ok(reply) => reply,
            Err(TurnError::Cancelled { .. }) => {
                info!(id = %email.id, "Shutdown requested, leaving email unread");
                return Outcome::Cancelled;
            }
            Err(e) => {
                warn!(id = %email.id, error = %e, "Assistant turn failed, replying with diagnostic");
                ReplyPayload::from_error(&e)
            }
        };

        if let Some(path) = &reply.attachment
            && !path.exists()
        {
            warn!(path = %path.display(), "Generated file not found");
        }

        let outgoing = OutgoingReply::to_message(email, reply.body, reply.attachment);

        match self.mailbox.send_reply(&outgoing).await {
            Ok(()) => {
                info!(id = %email.id, to = %email.sender, "Successfully sent reply");
                if let Err(e) = self.mailbox.mark_read(&email.id).await {
                    warn!(id = %email.id, error = %e, "Failed to mark email as read");
                }
                Outcome::Replied
            }
            Err(e) => {
                error!(id = %email.id, to = %email.sender, error = %e, "Failed to send reply");
                self.handled.lock().await.insert(email.id.clone());
                Outcome::SendFailed
            }
        }
    }
}
