//! Certificate generation: calls the rendering service and stores the PDF locally.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::assistant::{CertificateArgs, ToolResult};
use crate::config::{CertificateConfig, HTTP_TIMEOUT};

/// Produces a document on behalf of the assistant.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    /// Generate a document. Failures are reported in the result, never raised.
    async fn generate(&self, args: &CertificateArgs) -> ToolResult;
}

/// Request body of the certificate service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    pub today: String,
    pub name: String,
    pub user_id: String,
    pub subject: String,
    pub sample: bool,
    pub excellence: bool,
    pub pre_excellence: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub final_certificate: bool,
}

impl CertificateRequest {
    /// Build the fixed-shape request; the rendering flags are constants.
    pub fn new(args: &CertificateArgs, today: DateTime<Local>) -> Self {
        Self {
            today: today.format("%Y-%m-%d").to_string(),
            name: args.name.clone(),
            user_id: args.user_id.clone(),
            subject: args.subject.clone(),
            sample: true,
            excellence: true,
            pre_excellence: false,
            kind: "pdf".to_string(),
            final_certificate: true,
        }
    }
}

/// File name for a generated certificate: whitespace and characters that are
/// not allowed in a file name become `_`, suffixed with a second-precision
/// timestamp. The result never contains a path separator.
pub fn certificate_file_name(display_name: &str, at: DateTime<Local>) -> String {
    let safe: String = display_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("certificate_{}_{}.pdf", safe, at.format("%Y%m%d_%H%M%S"))
}

/// HTTP client for the certificate rendering service.
pub struct CertificateClient {
    client: reqwest::Client,
    api_url: String,
    output_dir: PathBuf,
}

impl CertificateClient {
    pub fn new(config: &CertificateConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_url: config.api_url.clone(),
            output_dir: config.output_dir.clone(),
        }
    }

    async fn request_certificate(&self, args: &CertificateArgs) -> anyhow::Result<ToolResult> {
        let body = CertificateRequest::new(args, Local::now());
        info!(url = %self.api_url, user_id = %args.user_id, "Requesting certificate");

        let resp = self.client.post(&self.api_url).json(&body).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            warn!(status = status.as_u16(), "Certificate service returned an error");
            return Ok(ToolResult::error(format!(
                "Error generating certificate: {}",
                status.as_u16()
            )));
        }

        let bytes = resp.bytes().await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(certificate_file_name(&args.name, Local::now()));
        tokio::fs::write(&path, &bytes).await?;

        info!(path = %path.display(), size = bytes.len(), "Certificate saved");
        Ok(ToolResult::success(
            "Certificate generated successfully",
            path.to_string_lossy(),
        ))
    }
}

#[async_trait]
impl DocumentGenerator for CertificateClient {
    async fn generate(&self, args: &CertificateArgs) -> ToolResult {
        match self.request_certificate(args).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Certificate generation failed");
                ToolResult::error(format!("Exception in certificate generation: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::TimeZone;

    use super::*;

    fn args() -> CertificateArgs {
        CertificateArgs {
            name: "Jane Doe".into(),
            user_id: "u-42".into(),
            subject: "Rust Basics".into(),
        }
    }

    #[test]
    fn request_has_fixed_flags() {
        let today = Local.with_ymd_and_hms(2026, 3, 5, 14, 7, 9).unwrap();
        let json = serde_json::to_value(CertificateRequest::new(&args(), today)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "today": "2026-03-05",
                "name": "Jane Doe",
                "userId": "u-42",
                "subject": "Rust Basics",
                "sample": true,
                "excellence": true,
                "preExcellence": false,
                "type": "pdf",
                "finalCertificate": true
            })
        );
    }

    #[test]
    fn file_name_embeds_name_and_timestamp() {
        let at = Local.with_ymd_and_hms(2026, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(
            certificate_file_name("Jane Doe", at),
            "certificate_Jane_Doe_20260305_140709.pdf"
        );
        assert_eq!(
            certificate_file_name("Ana Maria de Souza", at),
            "certificate_Ana_Maria_de_Souza_20260305_140709.pdf"
        );
    }

    #[test]
    fn file_name_cannot_escape_output_dir() {
        let at = Local.with_ymd_and_hms(2026, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(
            certificate_file_name("AC/DC Fan", at),
            "certificate_AC_DC_Fan_20260305_140709.pdf"
        );

        let name = certificate_file_name("../../etc\\passwd\0x", at);
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
        assert!(!name.contains('\0'));

        let dir = Path::new("certificates");
        assert_eq!(dir.join(&name).parent(), Some(dir));
    }

    #[tokio::test]
    async fn unreachable_service_is_reported_as_exception() {
        let tmp = tempfile::tempdir().unwrap();
        let client = CertificateClient::new(&CertificateConfig {
            // Port 9 (discard) on localhost is not expected to accept HTTP.
            api_url: "http://127.0.0.1:9/certificate".into(),
            output_dir: tmp.path().join("certificates"),
        });

        let result = client.generate(&args()).await;
        assert!(!result.is_success());
        assert!(result.message.starts_with("Exception in certificate generation:"));
        assert!(result.file_path.is_none());
        assert!(!tmp.path().join("certificates").exists());
    }
}
