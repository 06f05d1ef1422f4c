//! Turn orchestration: maps one inbound message to an assistant turn,
//! fulfils the tool call the assistant asks for, and builds the reply.
//!
//! Flow per message:
//! 1. Resolve the correspondent's session
//! 2. Append the message and start a turn
//! 3. Poll the turn until it completes, fails, or asks for a tool
//! 4. For `generate_certificate`: render the PDF, report the result, reply with it attached

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::SessionStore;
use super::tools::ToolInvocation;
use super::{AssistantBackend, Role, ToolOutput, Turn, TurnStatus};
use crate::certificate::DocumentGenerator;
use crate::config::TurnConfig;
use crate::error::{AssistantError, TurnError};

/// Stands in for the run id while the run has not been started yet.
const RUN_NOT_STARTED: &str = "(not started)";

/// What gets sent back to the correspondent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPayload {
    pub body: String,
    pub attachment: Option<PathBuf>,
}

impl ReplyPayload {
    /// A plain-text reply without attachment.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachment: None,
        }
    }

    /// Diagnostic reply for a turn that could not be completed.
    pub fn from_error(err: &TurnError) -> Self {
        match err {
            TurnError::InvalidToolArguments { .. } | TurnError::Submission(_) => {
                Self::text(format!("Error processing function call: {err}"))
            }
            _ => Self::text(format!("Error processing message: {err}")),
        }
    }
}

/// Reply sent when a certificate was generated.
pub fn certificate_success_reply(signature: &str) -> String {
    format!(
        "Hello,\n\n\
         I'm pleased to inform you that your certificate has been successfully generated \
         with the updated name. I have attached the updated certificate to this email \
         for your reference.\n\n\
         Best regards,\n{signature}"
    )
}

/// Reply sent when certificate generation failed.
pub fn certificate_failure_reply(reason: &str, signature: &str) -> String {
    format!(
        "Hello,\n\n\
         I apologize, but there was an error generating your certificate. \
         Error details: {reason}\n\n\
         Please try again or contact support if the issue persists.\n\n\
         Best regards,\n{signature}"
    )
}

/// Drives assistant turns for inbound messages.
pub struct TurnOrchestrator {
    backend: Arc<dyn AssistantBackend>,
    sessions: SessionStore,
    documents: Arc<dyn DocumentGenerator>,
    config: TurnConfig,
    cancel: CancellationToken,
}

impl TurnOrchestrator {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        sessions: SessionStore,
        documents: Arc<dyn DocumentGenerator>,
        config: TurnConfig,
    ) -> Self {
        Self {
            backend,
            sessions,
            documents,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort turn polling when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Process a message and always produce a reply; failures become diagnostics.
    pub async fn process_message(&self, correspondent: &str, text: &str) -> ReplyPayload {
        match self.try_process_message(correspondent, text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(correspondent = correspondent, error = %e, "Message processing failed");
                ReplyPayload::from_error(&e)
            }
        }
    }

    /// Process a message, surfacing failures (timeouts, cancellation, backend errors).
    pub async fn try_process_message(
        &self,
        correspondent: &str,
        text: &str,
    ) -> Result<ReplyPayload, TurnError> {
        info!(
            correspondent = correspondent,
            chars = text.len(),
            "Processing message"
        );

        let deadline = Instant::now() + self.config.deadline;

        let session_id = self
            .bounded(RUN_NOT_STARTED, deadline, self.sessions.get_or_create(correspondent))
            .await?;

        let message_id = self
            .bounded(
                RUN_NOT_STARTED,
                deadline,
                self.backend.append_user_message(&session_id, text),
            )
            .await?;
        debug!(session_id = %session_id, message_id = %message_id, "Added message to session");

        let turn = self
            .bounded(RUN_NOT_STARTED, deadline, self.backend.start_turn(&session_id))
            .await?;
        info!(session_id = %session_id, run_id = %turn.id, "Started assistant run");

        let reply = self.drive_turn(&session_id, &turn.id, deadline).await?;

        debug!(
            run_id = %turn.id,
            has_attachment = reply.attachment.is_some(),
            "Assistant reply ready"
        );
        Ok(reply)
    }

    async fn drive_turn(
        &self,
        session_id: &str,
        run_id: &str,
        deadline: Instant,
    ) -> Result<ReplyPayload, TurnError> {
        loop {
            let turn = self
                .bounded(run_id, deadline, self.backend.get_turn(session_id, run_id))
                .await?;
            debug!(run_id = run_id, status = %turn.status, "Run status");

            match turn.status {
                TurnStatus::Completed => {
                    return self.completed_reply(session_id, run_id, deadline).await;
                }
                TurnStatus::RequiresAction => {
                    if let Some(reply) = self.fulfil_tool_calls(&turn, deadline).await? {
                        return Ok(reply);
                    }
                }
                ref status if status.is_failure() => {
                    warn!(run_id = run_id, status = %status, "Run ended without a reply");
                    return Ok(ReplyPayload::text(format!(
                        "Run failed with status: {status}"
                    )));
                }
                _ => {}
            }

            self.wait(run_id, deadline).await?;
        }
    }

    /// Newest assistant-authored message in the session.
    async fn completed_reply(
        &self,
        session_id: &str,
        run_id: &str,
        deadline: Instant,
    ) -> Result<ReplyPayload, TurnError> {
        let messages = self
            .bounded(run_id, deadline, self.backend.list_messages(session_id))
            .await?;
        match messages.into_iter().find(|m| m.role == Role::Assistant) {
            Some(msg) => Ok(ReplyPayload::text(msg.text)),
            None => {
                warn!(session_id = session_id, "Run completed without an assistant message");
                Ok(ReplyPayload::text("Run completed without an assistant reply"))
            }
        }
    }

    /// Handle the first recognized tool call of a turn in `requires_action`.
    ///
    /// Returns `None` when the turn asked only for unknown tools.
    async fn fulfil_tool_calls(
        &self,
        turn: &Turn,
        deadline: Instant,
    ) -> Result<Option<ReplyPayload>, TurnError> {
        for call in &turn.tool_calls {
            let Some(invocation) = ToolInvocation::from_call(call)? else {
                warn!(tool = %call.name, run_id = %turn.id, "Ignoring unrecognized tool call");
                continue;
            };
            info!(tool = invocation.name(), call_id = %call.id, "Function called");

            match invocation {
                ToolInvocation::GenerateCertificate(args) => {
                    let result = self
                        .bounded(&turn.id, deadline, async {
                            Ok::<_, TurnError>(self.documents.generate(&args).await)
                        })
                        .await?;

                    if !result.is_success() {
                        warn!(reason = %result.message, "Certificate generation failed");
                        return Ok(Some(ReplyPayload::text(certificate_failure_reply(
                            &result.message,
                            &self.config.signature,
                        ))));
                    }

                    let output = ToolOutput {
                        tool_call_id: call.id.clone(),
                        output: serde_json::to_string(&result).map_err(AssistantError::from)?,
                    };
                    self.bounded(&turn.id, deadline, async {
                        self.backend
                            .submit_tool_outputs(&turn.session_id, &turn.id, vec![output])
                            .await
                            .map_err(TurnError::Submission)
                    })
                    .await?;
                    info!(run_id = %turn.id, "Submitted function outputs to assistant");

                    if self.config.confirm_tool_submission {
                        self.confirm_settled(&turn.session_id, &turn.id, deadline)
                            .await?;
                    }

                    return Ok(Some(ReplyPayload {
                        body: certificate_success_reply(&self.config.signature),
                        attachment: result.file_path.map(PathBuf::from),
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Poll a run after tool submission until the backend settles it.
    ///
    /// The certificate already exists at this point, so only cancellation aborts
    /// the reply; anything else is logged.
    async fn confirm_settled(
        &self,
        session_id: &str,
        run_id: &str,
        deadline: Instant,
    ) -> Result<(), TurnError> {
        match self.poll_until_settled(session_id, run_id, deadline).await {
            Ok(TurnStatus::Completed) => {
                debug!(run_id = run_id, "Run completed after tool submission");
                Ok(())
            }
            Ok(status) => {
                warn!(run_id = run_id, status = %status, "Run did not complete after tool submission");
                Ok(())
            }
            Err(e @ TurnError::Cancelled { .. }) => Err(e),
            Err(e) => {
                warn!(run_id = run_id, error = %e, "Could not confirm run after tool submission");
                Ok(())
            }
        }
    }

    async fn poll_until_settled(
        &self,
        session_id: &str,
        run_id: &str,
        deadline: Instant,
    ) -> Result<TurnStatus, TurnError> {
        loop {
            self.wait(run_id, deadline).await?;
            let turn = self
                .bounded(run_id, deadline, self.backend.get_turn(session_id, run_id))
                .await?;
            if turn.status.is_terminal() || turn.status == TurnStatus::RequiresAction {
                return Ok(turn.status);
            }
        }
    }

    /// Await a backend call, giving up at `deadline` or on cancellation.
    async fn bounded<T, E, F>(&self, run_id: &str, deadline: Instant, call: F) -> Result<T, TurnError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<TurnError>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TurnError::Cancelled {
                run_id: run_id.to_string(),
            }),
            outcome = tokio::time::timeout_at(deadline, call) => match outcome {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(TurnError::Timeout {
                    run_id: run_id.to_string(),
                    deadline: self.config.deadline,
                }),
            },
        }
    }

    /// Sleep one poll interval, bounded by the deadline and the cancellation token.
    async fn wait(&self, run_id: &str, deadline: Instant) -> Result<(), TurnError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(TurnError::Timeout {
                run_id: run_id.to_string(),
                deadline: self.config.deadline,
            });
        }
        let wake = (now + self.config.poll_interval).min(deadline);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TurnError::Cancelled {
                run_id: run_id.to_string(),
            }),
            _ = tokio::time::sleep_until(wake) => Ok(()),
        }
    }
}
