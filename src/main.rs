use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mail_assist::assistant::{AssistantBackend, OpenAiAssistant, SessionStore, TurnOrchestrator};
use mail_assist::certificate::CertificateClient;
use mail_assist::config::{AppConfig, LogConfig};
use mail_assist::driver::Driver;
use mail_assist::logging;
use mail_assist::mailbox::GmailMailbox;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = logging::init(&LogConfig::from_env())?;

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            eprintln!("Error: {e}");
            eprintln!("  Required: OPENAI_API_KEY, ASSISTANT_ID, CERTIFICATE_API_URL");
            return Err(e.into());
        }
    };

    eprintln!("📬 Mail Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Assistant: {}", config.assistant.assistant_id);
    eprintln!("   Mail poll: every {}s", config.mail_poll_interval.as_secs());
    eprintln!("   Certificates: {}", config.certificate.output_dir.display());
    eprintln!("   Press Ctrl-C to stop.\n");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                cancel.cancel();
            }
        });
    }

    let mailbox = GmailMailbox::connect(&config.gmail)
        .await
        .context("connecting to Gmail")?;

    let backend: Arc<dyn AssistantBackend> = Arc::new(OpenAiAssistant::new(&config.assistant));
    let sessions = SessionStore::new(backend.clone(), config.session_retention);
    let documents = Arc::new(CertificateClient::new(&config.certificate));
    let orchestrator = TurnOrchestrator::new(backend, sessions, documents, config.turn.clone())
        .with_cancellation(cancel.clone());

    let driver = Driver::new(
        Arc::new(mailbox),
        Arc::new(orchestrator),
        config.mail_poll_interval,
        Utc::now(),
    )
    .with_cancellation(cancel);

    driver.run().await;
    Ok(())
}
