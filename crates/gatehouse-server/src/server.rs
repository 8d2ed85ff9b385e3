use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Json, Router, routing::get};
use gatehouse_auth::{
    AuthFlowController, GithubProvider, IdentityDirectory, InMemoryDirectory, login_router,
};
use gatehouse_auth_postgres::PostgresDirectory;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, StorageBackend, StorageConfig};

pub struct GatehouseServer {
    addr: SocketAddr,
    app: Router,
}

/// Opens the identity directory selected by `storage.backend`.
pub async fn connect_directory(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn IdentityDirectory>> {
    match cfg.backend {
        StorageBackend::Postgres => {
            let directory = PostgresDirectory::connect(&cfg.postgres)
                .await
                .context("failed to open PostgreSQL identity directory")?;
            tracing::info!(backend = "postgres", "Identity directory ready");
            Ok(Arc::new(directory))
        }
        StorageBackend::Memory => {
            tracing::warn!(
                backend = "memory",
                "Using in-memory identity directory; accounts are lost on restart"
            );
            Ok(Arc::new(InMemoryDirectory::new()))
        }
    }
}

/// Builds the router around an already opened directory.
pub fn build_app_with_directory(
    cfg: &AppConfig,
    directory: Arc<dyn IdentityDirectory>,
) -> anyhow::Result<Router> {
    let provider = GithubProvider::from_config(&cfg.auth.provider)
        .context("failed to build provider client")?;
    let controller = AuthFlowController::from_config(&cfg.auth, Arc::new(provider), directory)
        .context("failed to build login flow")?;

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .merge(login_router(Arc::new(controller)))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            // Query strings carry codes and state; log the path only.
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri().path(),
                                http.status_code = tracing::field::Empty,
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes)),
        ))
}

/// Opens the configured directory and builds the router.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let directory = connect_directory(&cfg.storage).await?;
    build_app_with_directory(cfg, directory)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub struct ServerBuilder {
    addr: Option<SocketAddr>,
    config: AppConfig,
    directory: Option<Arc<dyn IdentityDirectory>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            addr: None,
            config: AppConfig::default(),
            directory: None,
        }
    }

    /// Overrides the address derived from `server.host` and `server.port`.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Uses the given directory instead of opening `storage.backend`.
    pub fn with_directory(mut self, directory: Arc<dyn IdentityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub async fn build(self) -> anyhow::Result<GatehouseServer> {
        let addr = match self.addr {
            Some(addr) => addr,
            None => self.config.addr()?,
        };
        let directory = match self.directory {
            Some(directory) => directory,
            None => connect_directory(&self.config.storage).await?,
        };
        let app = build_app_with_directory(&self.config, directory)?;

        Ok(GatehouseServer { addr, app })
    }
}

impl GatehouseServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
