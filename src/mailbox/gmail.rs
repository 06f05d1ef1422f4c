//! Gmail API v1 mailbox.
//!
//! Lists `is:unread` messages, fetches each in `raw` format and parses it
//! locally, sends replies as base64url MIME with a `threadId`, and marks
//! messages read by removing the `UNREAD` label.
//!
//! Authentication uses an existing OAuth token file (google-auth JSON format);
//! expired access tokens are refreshed and written back. Obtaining the first
//! token is out of scope.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::mime::{build_reply, encode_raw, load_attachment};
use super::parse::{Envelope, parse_raw_message};
use super::{EmailMessage, Mailbox, OutgoingReply};
use crate::config::{GmailConfig, HTTP_TIMEOUT};
use crate::error::MailboxError;

const UNREAD_QUERY: &str = "is:unread";
const UNREAD_LABEL: &str = "UNREAD";

// ============================================================================
// OAuth token
// ============================================================================

/// OAuth2 token as written by Google's client libraries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// RFC 3339 expiry of `token`.
    #[serde(default)]
    pub expiry: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl GoogleToken {
    pub fn load(path: &Path) -> Result<Self, MailboxError> {
        if !path.exists() {
            return Err(MailboxError::TokenNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), MailboxError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Expired, unparsable, or within 60 seconds of expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match &self.expiry {
            None => true,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(expiry) => expiry <= now + chrono::Duration::seconds(60),
                Err(_) => true,
            },
        }
    }
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    /// Epoch milliseconds, as a decimal string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    raw: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

// ============================================================================
// Mailbox
// ============================================================================

/// Gmail-backed mailbox for the authenticated user.
pub struct GmailMailbox {
    client: reqwest::Client,
    api_base: String,
    token_path: PathBuf,
    token: Mutex<GoogleToken>,
    address: String,
}

impl GmailMailbox {
    /// Load the token and look up the mailbox address.
    pub async fn connect(config: &GmailConfig) -> Result<Self, MailboxError> {
        let token = GoogleToken::load(&config.token_path)?;
        let mut mailbox = Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_path: config.token_path.clone(),
            token: Mutex::new(token),
            address: String::new(),
        };

        let profile: Profile = mailbox
            .get_json(&mailbox.url("users/me/profile"), &[])
            .await?;
        info!(address = %profile.email_address, "Connected to Gmail");
        mailbox.address = profile.email_address;
        Ok(mailbox)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    /// Current access token, refreshed first when it is about to expire.
    async fn access_token(&self) -> Result<String, MailboxError> {
        let mut token = self.token.lock().await;
        if token.is_expired(Utc::now()) {
            let refreshed = self.refresh(&token).await?;
            *token = refreshed;
            if let Err(e) = token.save(&self.token_path) {
                warn!(path = %self.token_path.display(), error = %e, "Failed to persist refreshed token");
            }
        }
        Ok(token.token.clone())
    }

    async fn refresh(&self, token: &GoogleToken) -> Result<GoogleToken, MailboxError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(MailboxError::AuthExpired)?;

        let mut form = vec![
            ("client_id", token.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = token.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self.client.post(&token.token_uri).form(&form).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(MailboxError::RefreshFailed(format!("{status}: {body}")));
        }
        let refreshed: RefreshResponse = serde_json::from_str(&body)?;

        let expiry = Utc::now() + chrono::Duration::seconds(refreshed.expires_in.unwrap_or(3600));
        debug!(expiry = %expiry, "Refreshed Gmail access token");

        let mut new_token = token.clone();
        new_token.token = refreshed.access_token;
        new_token.expiry = Some(expiry.to_rfc3339());
        Ok(new_token)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, MailboxError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MailboxError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailboxError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MailboxError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.access_token().await?)
            .query(query)
            .send()
            .await?;
        let body = Self::check(resp).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<(), MailboxError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(self.access_token().await?)
            .json(body)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Ids of unread messages received after `watermark`, following pagination.
    ///
    /// `after:` has one-second granularity; callers still check `internalDate`.
    async fn list_unread_ids(&self, watermark: DateTime<Utc>) -> Result<Vec<String>, MailboxError> {
        let url = self.url("users/me/messages");
        let query = unread_query(watermark);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: MessageListResponse = match page_token.as_deref() {
                Some(token) => {
                    self.get_json(&url, &[("q", query.as_str()), ("pageToken", token)])
                        .await?
                }
                None => self.get_json(&url, &[("q", query.as_str())]).await?,
            };
            ids.extend(page.messages.into_iter().map(|m| m.id));

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(ids)
    }

    async fn fetch_raw(&self, id: &str) -> Result<RawMessage, MailboxError> {
        self.get_json(
            &self.url(&format!("users/me/messages/{id}")),
            &[("format", "raw")],
        )
        .await
    }
}

/// Search query for unread mail newer than `watermark` (epoch seconds).
fn unread_query(watermark: DateTime<Utc>) -> String {
    format!("{UNREAD_QUERY} after:{}", watermark.timestamp())
}

/// Decode a fetched raw message, keeping it only if received after `watermark`.
fn decode_if_newer(
    message: RawMessage,
    watermark: DateTime<Utc>,
) -> Result<Option<EmailMessage>, MailboxError> {
    let received_ms: i64 = message
        .internal_date
        .as_deref()
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| MailboxError::Decode {
            id: message.id.clone(),
            reason: "missing internalDate".into(),
        })?;

    if received_ms / 1000 <= watermark.timestamp() {
        return Ok(None);
    }

    let received_at =
        DateTime::from_timestamp_millis(received_ms).ok_or_else(|| MailboxError::Decode {
            id: message.id.clone(),
            reason: format!("internalDate out of range: {received_ms}"),
        })?;

    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(message.raw.trim_end_matches('='))
        .map_err(|e| MailboxError::Decode {
            id: message.id.clone(),
            reason: e.to_string(),
        })?;

    let envelope = Envelope {
        id: message.id,
        thread_id: message.thread_id,
        received_at,
    };
    parse_raw_message(envelope, &raw).map(Some)
}

#[async_trait]
impl Mailbox for GmailMailbox {
    fn address(&self) -> &str {
        &self.address
    }

    async fn list_unread_since(
        &self,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<EmailMessage>, MailboxError> {
        let ids = self.list_unread_ids(watermark).await?;
        let mut emails = Vec::with_capacity(ids.len());

        for id in &ids {
            let fetched = match self.fetch_raw(id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping message that could not be fetched");
                    continue;
                }
            };
            match decode_if_newer(fetched, watermark) {
                Ok(Some(email)) => emails.push(email),
                Ok(None) => debug!(id = %id, "Skipping message older than watermark"),
                Err(e) => warn!(id = %id, error = %e, "Skipping message that could not be decoded"),
            }
        }
        Ok(emails)
    }

    async fn send_reply(&self, reply: &OutgoingReply) -> Result<(), MailboxError> {
        let attachment = match &reply.attachment {
            Some(path) => load_attachment(path).await,
            None => None,
        };
        let message = build_reply(&self.address, reply, attachment)?;

        let mut body = serde_json::json!({ "raw": encode_raw(&message) });
        if let Some(thread_id) = &reply.thread_id {
            body["threadId"] = serde_json::Value::String(thread_id.clone());
        }

        self.post_json(&self.url("users/me/messages/send"), &body)
            .await?;
        info!(to = %reply.to, "Email reply sent");
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        self.post_json(
            &self.url(&format!("users/me/messages/{message_id}/modify")),
            &serde_json::json!({ "removeLabelIds": [UNREAD_LABEL] }),
        )
        .await?;
        debug!(id = message_id, "Marked message as read");
        Ok(())
    }
}
