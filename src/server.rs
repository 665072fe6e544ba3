//! HTTP server: router assembly, startup and graceful shutdown.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::get,
};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, warn};

use crate::broker::{Broker, CredentialBroker};
use crate::config::{Config, ServerConfig};
use crate::credentials::{self, CredentialsService, load_configuration};
use crate::{Error, Result};

/// State behind `GET /health`.
#[derive(Debug, Clone, Copy)]
struct HealthState {
    started: Instant,
}

/// Build the application router.
pub fn create_router(service: Arc<CredentialsService>, config: &ServerConfig) -> Router {
    let health = Router::new()
        .route("/health", get(health_handler))
        .with_state(HealthState {
            started: Instant::now(),
        });

    let app = Router::new()
        .merge(credentials::router(service))
        .merge(health)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());

    if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

async fn health_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "uptime": state.started.elapsed().as_secs_f64(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// The credential broker service.
pub struct Server {
    config: Config,
    broker: Arc<CredentialBroker>,
    service: Arc<CredentialsService>,
}

impl Server {
    /// Build the broker and load configuration documents.
    ///
    /// Loading problems are logged; the server still starts with whatever
    /// was registered.
    pub async fn new(config: Config) -> Self {
        let broker = Arc::new(CredentialBroker::new(&config));
        load_configuration(broker.as_ref(), &config.identity.config_dir).await;

        let service = Arc::new(CredentialsService::new(
            broker.clone() as Arc<dyn Broker>,
            &config,
        ));

        Self {
            config,
            broker,
            service,
        }
    }

    /// Credentials service shared with the handlers.
    #[must_use]
    pub fn service(&self) -> &Arc<CredentialsService> {
        &self.service
    }

    /// Serve until SIGINT/SIGTERM, then drain within `shutdown_timeout`.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address: {e}")))?;

        let app = create_router(Arc::clone(&self.service), &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        let summary = self.broker.summary();
        info!("============================================================");
        info!("VOIDKEY BROKER v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            idps = summary.idps,
            identities = summary.identities,
            access_providers = summary.access_providers.len(),
            broker_idp = summary.broker_idp.as_deref().unwrap_or("-"),
            "Registry loaded"
        );
        info!(
            "Credentials endpoint: POST http://{}:{}/credentials/mint",
            self.config.server.host, self.config.server.port
        );

        let signalled = Arc::new(Notify::new());
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown({
                let signalled = Arc::clone(&signalled);
                async move {
                    shutdown_signal().await;
                    signalled.notify_one();
                }
            })
            .into_future();

        let grace = self.config.server.shutdown_timeout;
        tokio::select! {
            result = serve => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = async {
                signalled.notified().await;
                tokio::time::sleep(grace).await;
            } => warn!(timeout = ?grace, "Graceful shutdown timed out"),
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    async fn app() -> Router {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.identity.config_dir = dir.path().to_path_buf();
        let server = Server::new(config.clone()).await;
        create_router(Arc::clone(server.service()), &config.server)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["uptime"].is_number());
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn fresh_server_lists_hello_world() {
        let response = app()
            .await
            .oneshot(
                Request::get("/credentials/idp-providers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!([{"name": "hello-world", "isDefault": true}]));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app()
            .await
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
