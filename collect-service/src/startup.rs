use crate::config::{CollectConfig, PskSourceConfig};
use crate::handlers;
use crate::services::{
    CompletionNotifier, LogNotifier, PskStore, SecretSource, SessionService, SessionSettings,
    SlackWebhookNotifier, SsmParameterSource, StaticSecretSource, StsTrustBroker, TokenEngine,
    TrustBroker,
};
use aws_config::{BehaviorVersion, Region};
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }

    /// Wire the production collaborators: SSM or inline PSKs, STS, Slack.
    pub async fn from_config(config: &CollectConfig) -> Result<Self, AppError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.storage.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let source: Arc<dyn SecretSource> = match &config.psk {
            PskSourceConfig::SsmParameter(name) => Arc::new(SsmParameterSource::new(
                aws_sdk_ssm::Client::new(&sdk_config),
                name.clone(),
            )),
            PskSourceConfig::Inline(blob) => Arc::new(StaticSecretSource::new(blob.clone())),
        };
        let tokens = Arc::new(TokenEngine::new(Arc::new(PskStore::new(source))));

        let broker: Arc<dyn TrustBroker> = Arc::new(StsTrustBroker::new(
            aws_sdk_sts::Client::new(&sdk_config),
        ));

        let notifier: Arc<dyn CompletionNotifier> = match &config.notify.slack_webhook_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                    .map_err(|e| {
                        AppError::InternalError(anyhow::anyhow!(
                            "Failed to build webhook client: {}",
                            e
                        ))
                    })?;
                Arc::new(SlackWebhookNotifier::new(client, url.clone()))
            }
            None => {
                tracing::warn!("No Slack webhook configured; completion notices are only logged");
                Arc::new(LogNotifier::new())
            }
        };

        let settings = SessionSettings {
            region,
            bucket: config.storage.files_bucket.clone(),
            client_role_arn: config.broker.client_role_arn.clone(),
            use_accelerated_endpoint: config.storage.use_accelerated_endpoint,
            timing: config.session.clone(),
        };

        Ok(Self::new(Arc::new(SessionService::new(
            tokens, broker, notifier, settings,
        ))))
    }
}

/// Session routes under `base_path`, plus health and metrics at the root.
/// Every other method or path answers 404.
pub fn build_router(state: AppState, base_path: &str) -> Router {
    let api = Router::new()
        .route(
            "/sessions",
            post(handlers::start_session).fallback(handlers::not_found),
        )
        .route(
            "/complete",
            post(handlers::complete_session).fallback(handlers::not_found),
        );

    let router = if base_path.is_empty() {
        api
    } else {
        Router::new().nest(base_path, api)
    };

    router
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .fallback(handlers::not_found)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

type Server = Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>;

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(config: CollectConfig) -> Result<Self, AppError> {
        let state = AppState::from_config(&config).await?;
        let app = build_router(state, &config.api.base_path);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, base_path = %config.api.base_path, "Listening");

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::pin(async move { server.await }),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
