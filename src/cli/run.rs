use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{load_config, Config, ProviderKind};
use crate::dispatch::{DispatchError, DispatchSettings, EmailService, VerificationGate};
use crate::provider::{EmailProvider, LogProvider, MailgunProvider, ProviderError};
use crate::storage::{DuckDbStorage, Storage, StorageError};
use crate::web::run_server;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

fn require_config(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/segmail/config.yml");
            eprintln!("  /etc/segmail/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'segmail config init' to generate one.");
            std::process::exit(1);
        }
    }
}

/// Wires storage, provider and verification settings into an [`EmailService`].
pub async fn build_service(config: &Config) -> Result<Arc<EmailService>, RunError> {
    info!(path = %config.storage.path.display(), "Initializing storage");
    let storage: Arc<dyn Storage> = Arc::new(DuckDbStorage::new(&config.storage.path)?);
    storage.init_schema().await?;

    let provider: Arc<dyn EmailProvider> = match config.provider.kind {
        ProviderKind::Mailgun => Arc::new(MailgunProvider::new(&config.provider)?),
        ProviderKind::Log => Arc::new(LogProvider::new(config.provider.batch_size)),
    };
    info!(
        provider = provider.name(),
        batch_size = provider.batch_size(),
        "Provider configured"
    );

    let settings = DispatchSettings::new(config.site.url.clone())
        .with_concurrency(config.dispatch.concurrency)
        .with_outbound_ref(config.site.outbound_ref);

    let service = EmailService::new(storage, provider, settings)
        .with_verification(VerificationGate::from_config(&config.verification));
    Ok(Arc::new(service))
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config(config_path);
    serve(&config_path).await.map_err(|e| e.into())
}

async fn serve(config_path: &PathBuf) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let service = build_service(&config).await?;

    let report = service.recover().await?;
    if !report.interrupted.is_empty() || !report.resumed.is_empty() {
        info!(
            interrupted = report.interrupted.len(),
            resumed = report.resumed.len(),
            "Recovered unfinished emails"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("Starting web server on {}", config.web.listen);
    let web_config = config.web.clone();
    let mut web_handle = tokio::spawn(async move {
        run_server(service, web_config, shutdown_rx)
            .await
            .map_err(|e| RunError::WebServer(e.to_string()))
    });

    info!("Segmail started, press Ctrl+C to shutdown");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            web_handle.await??;
        }
        result = &mut web_handle => {
            match result {
                Ok(Ok(())) => info!("Web server exited"),
                Ok(Err(e)) => {
                    error!(error = %e, "Web server failed");
                    return Err(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Prints an email record and its batches as JSON.
pub async fn status(config_path: Option<PathBuf>, email_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&require_config(config_path))?;
    let service = build_service(&config).await?;

    let email = service.get_email(email_id).await?;
    let batches = service.storage().list_batches(email_id).await?;
    let report = serde_json::json!({ "email": email, "batches": batches });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Re-sends the failed batches of an email and waits for the outcome.
pub async fn retry(config_path: Option<PathBuf>, email_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&require_config(config_path))?;
    let service = build_service(&config).await?;

    let status = service.retry(email_id).await?;
    println!("Email {} is {}", email_id, status);
    Ok(())
}
