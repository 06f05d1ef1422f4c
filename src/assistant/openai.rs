//! OpenAI Assistants v2 backend over plain REST.
//!
//! Sessions map to threads, turns map to runs.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{AssistantBackend, Role, SessionMessage, ToolCall, ToolOutput, Turn, TurnStatus};
use crate::config::{AssistantConfig, HTTP_TIMEOUT};
use crate::error::AssistantError;

const ASSISTANTS_BETA_HEADER: &str = "assistants=v2";

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    thread_id: String,
    status: TurnStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<RunToolCall>,
}

#[derive(Debug, Deserialize)]
struct RunToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    id: String,
    role: Role,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

impl From<RunObject> for Turn {
    fn from(run: RunObject) -> Self {
        let tool_calls = run
            .required_action
            .and_then(|a| a.submit_tool_outputs)
            .map(|s| {
                s.tool_calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.function.name,
                        arguments: c.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Turn {
            id: run.id,
            session_id: run.thread_id,
            status: run.status,
            tool_calls,
        }
    }
}

impl From<MessageObject> for SessionMessage {
    fn from(msg: MessageObject) -> Self {
        // The first text part carries the reply; image and file parts are skipped.
        let text = msg
            .content
            .into_iter()
            .find_map(|part| match part {
                ContentPart::Text { text } => Some(text.value),
                ContentPart::Other => None,
            })
            .unwrap_or_default();

        SessionMessage {
            id: msg.id,
            role: msg.role,
            text,
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Assistants API client bound to one assistant.
pub struct OpenAiAssistant {
    client: reqwest::Client,
    api_key: SecretString,
    assistant_id: String,
    base_url: String,
}

impl OpenAiAssistant {
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key: config.api_key.clone(),
            assistant_id: config.assistant_id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", ASSISTANTS_BETA_HEADER)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AssistantError> {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Api {
                status: status.as_u16(),
                message: extract_api_message(&body),
            });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Pull `error.message` out of an OpenAI error body, falling back to the raw text.
fn extract_api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl AssistantBackend for OpenAiAssistant {
    async fn create_session(&self) -> Result<String, AssistantError> {
        let thread: IdOnly = self
            .send(
                self.request(reqwest::Method::POST, "threads")
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(thread.id)
    }

    async fn append_user_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<String, AssistantError> {
        let message: IdOnly = self
            .send(
                self.request(reqwest::Method::POST, &format!("threads/{session_id}/messages"))
                    .json(&serde_json::json!({
                        "role": "user",
                        "content": content,
                    })),
            )
            .await?;
        Ok(message.id)
    }

    async fn start_turn(&self, session_id: &str) -> Result<Turn, AssistantError> {
        let run: RunObject = self
            .send(
                self.request(reqwest::Method::POST, &format!("threads/{session_id}/runs"))
                    .json(&serde_json::json!({ "assistant_id": self.assistant_id })),
            )
            .await?;
        Ok(run.into())
    }

    async fn get_turn(&self, session_id: &str, turn_id: &str) -> Result<Turn, AssistantError> {
        let run: RunObject = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("threads/{session_id}/runs/{turn_id}"),
            ))
            .await?;
        Ok(run.into())
    }

    async fn submit_tool_outputs(
        &self,
        session_id: &str,
        turn_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Turn, AssistantError> {
        let run: RunObject = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("threads/{session_id}/runs/{turn_id}/submit_tool_outputs"),
                )
                .json(&serde_json::json!({ "tool_outputs": outputs })),
            )
            .await?;
        Ok(run.into())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>, AssistantError> {
        let list: MessageList = self
            .send(
                self.request(reqwest::Method::GET, &format!("threads/{session_id}/messages"))
                    .query(&[("order", "desc")]),
            )
            .await?;
        Ok(list.data.into_iter().map(SessionMessage::from).collect())
    }
}
