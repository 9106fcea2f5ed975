use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::listener::NotificationListener;
use crate::pubsub_consumer::ListenerControl;

use super::config::{NotificationTransport, ServiceConfig};
use super::pipeline::Pipeline;
use super::BoxError;

#[derive(Clone)]
pub struct PushState {
    pub listener: Arc<NotificationListener>,
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let config = Arc::new(config);

    let pipeline = {
        let config = config.clone();
        Arc::new(
            task::spawn_blocking(move || Pipeline::start(&config))
                .await
                .map_err(|err| -> BoxError { err.into() })??,
        )
    };

    // From here on every exit path goes through the drain below.
    let mut pull_control = None;
    let serve_result = match start_intake(&pipeline, &config).await {
        Ok(control) => {
            pull_control = control;
            let mut app = Router::new()
                .route("/", get(health))
                .route("/health", get(health));
            if config.transport == NotificationTransport::Push {
                app = app.merge(push_router(PushState {
                    listener: pipeline.listener.clone(),
                }));
            }
            serve(addr, app, shutdown).await
        }
        Err(err) => Err(err),
    };

    // Shutdown order: intake, then queue drain.
    let drained = task::spawn_blocking(move || {
        if let Some(control) = pull_control.as_mut() {
            control.stop_and_join();
        }
        pipeline.shutdown();
    })
    .await;
    if let Err(err) = drained {
        error!("shutdown task failed: {}", err);
    }

    serve_result
}

async fn start_intake(
    pipeline: &Arc<Pipeline>,
    config: &Arc<ServiceConfig>,
) -> Result<Option<ListenerControl>, BoxError> {
    if config.transport != NotificationTransport::Pull {
        return Ok(None);
    }
    let pipeline = pipeline.clone();
    let config = config.clone();
    let control = task::spawn_blocking(move || pipeline.start_pull_intake(&config))
        .await
        .map_err(|err| -> BoxError { err.into() })??;
    Ok(Some(control))
}

async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("mail triage service listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn push_router(state: PushState) -> Router {
    Router::new()
        .route("/pubsub/push", post(pubsub_push))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(default)]
    message: Option<PushMessage>,
    #[serde(default)]
    subscription: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message_id: String,
}

/// Pub/Sub push endpoint. Always acknowledges; redelivery is never used as a
/// retry mechanism.
async fn pubsub_push(State(state): State<PushState>, body: Bytes) -> impl IntoResponse {
    let envelope: PushEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("malformed push envelope: {}", err);
            return (StatusCode::OK, "ok");
        }
    };
    let Some(message) = envelope.message else {
        warn!("push envelope from {} has no message", envelope.subscription);
        return (StatusCode::OK, "ok");
    };

    let data = message
        .data
        .as_deref()
        .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
        .unwrap_or_default();

    let listener = state.listener.clone();
    match task::spawn_blocking(move || listener.handle_payload(&data)).await {
        Ok(outcome) => debug!("push message {}: {:?}", message.message_id, outcome),
        Err(err) => error!("push message {} handler failed: {}", message.message_id, err),
    }
    (StatusCode::OK, "ok")
}
