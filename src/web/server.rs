use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;
use crate::dispatch::EmailService;

use super::api::{
    create_email, get_email, health_check, import_members, list_batch_recipients, list_batches,
    retry_email, AppState,
};

pub fn create_router(service: Arc<EmailService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/members", post(import_members))
        .route("/api/emails", post(create_email))
        .route("/api/emails/:id", get(get_email))
        .route("/api/emails/:id/batches", get(list_batches))
        .route(
            "/api/emails/:id/batches/:batch_id/recipients",
            get(list_batch_recipients),
        )
        .route("/api/emails/:id/retry", put(retry_email))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

/// Start the web server with the given email service
pub async fn run_server(
    service: Arc<EmailService>,
    web_config: WebConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(service);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Web server listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await?;

    Ok(())
}
