//! Tools the assistant may invoke, as a closed set.

use serde::{Deserialize, Serialize};

use super::ToolCall;
use crate::error::TurnError;

/// Wire name of the certificate generation function.
pub const GENERATE_CERTIFICATE: &str = "generate_certificate";

/// Arguments of `generate_certificate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateArgs {
    /// Name printed on the certificate.
    pub name: String,
    /// Identifier of the recipient in the certificate service.
    pub user_id: String,
    /// Course or subject the certificate is for.
    pub subject: String,
}

/// A recognized tool invocation with parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    GenerateCertificate(CertificateArgs),
}

impl ToolInvocation {
    /// Resolve a raw tool call.
    ///
    /// Returns `Ok(None)` for names outside the known set; those calls are
    /// neither dispatched nor answered.
    pub fn from_call(call: &ToolCall) -> Result<Option<Self>, TurnError> {
        match call.name.as_str() {
            GENERATE_CERTIFICATE => {
                let args: CertificateArgs = serde_json::from_str(&call.arguments).map_err(|e| {
                    TurnError::InvalidToolArguments {
                        name: call.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(ToolInvocation::GenerateCertificate(args)))
            }
            _ => Ok(None),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::GenerateCertificate(_) => GENERATE_CERTIFICATE,
        }
    }
}

/// Outcome status of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Structured outcome of a tool call; serialized as the tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl ToolResult {
    pub fn success(message: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            message: message.into(),
            file_path: Some(file_path.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            message: message.into(),
            file_path: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}
