use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{self, AppState, AuthSettings, SharedState};
use crate::auth::JwtManager;
use crate::config::Config;
use crate::store::{self, StoreHandle};
use crate::timer::SystemClock;
use crate::whatsapp::{EvolutionClient, MessageSender, NoopSender};

/// Build the full application router: API routes, request tracing and
/// optional permissive CORS.
pub fn build_router(state: SharedState, cors: bool) -> Router {
    let mut app = api::api_router(state)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http());
    if cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Route not found"})),
    )
}

/// Open storage and assemble the shared state from a validated config.
pub fn build_state(config: &Config) -> Result<SharedState> {
    let path = config.storage.resolved_path();
    let backend = store::open(config.storage.backend, &path).with_context(|| {
        format!(
            "Failed to open {} storage at {}",
            config.storage.backend,
            path.display()
        )
    })?;
    info!(backend = %config.storage.backend, path = %path.display(), "Storage ready");

    let sender: Arc<dyn MessageSender> = if config.whatsapp.send_replies {
        Arc::new(EvolutionClient::new(Duration::from_secs(
            config.whatsapp.timeout_secs,
        ))?)
    } else {
        Arc::new(NoopSender)
    };

    if !config.auth.required {
        warn!("Authentication is optional; anonymous requests will be served");
    }

    Ok(Arc::new(AppState {
        store: StoreHandle::new(backend),
        clock: Arc::new(SystemClock),
        jwt: JwtManager::new(
            config.auth.jwt_secret.as_bytes(),
            config.auth.token_ttl_secs,
        ),
        sender,
        auth: AuthSettings {
            required: config.auth.required,
            reset_token_ttl_secs: config.auth.reset_token_ttl_secs,
        },
    }))
}

/// Run the HTTP server until Ctrl+C or SIGTERM.
pub async fn start_server(config: Config) -> Result<()> {
    config.ensure_valid()?;
    let state = build_state(&config)?;
    let app = build_router(state, config.server.cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Pontual listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BackendKind;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.storage.backend = BackendKind::Memory;
        config.auth.jwt_secret = "test".into();
        config.whatsapp.send_replies = false;
        config
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let state = build_state(&memory_config()).unwrap();
        let app = build_router(state, true);
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Route not found");
    }

    #[tokio::test]
    async fn health_is_served_through_full_stack() {
        let state = build_state(&memory_config()).unwrap();
        let response = build_router(state, false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sqlite_state_opens_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config();
        config.storage.backend = BackendKind::Sqlite;
        config.storage.path = Some(dir.path().join("nested").join("pontual.db"));
        let state = build_state(&config).unwrap();
        let users = state.store.call(|s| s.count_users()).await.unwrap();
        assert_eq!(users, 0);
        assert!(dir.path().join("nested").join("pontual.db").exists());
    }
}
