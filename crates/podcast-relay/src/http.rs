use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use podcast_proto::config::RelayConfig;
use podcast_proto::protocol::{
    DispatchRequest, DispatchResponse, MessageResponse, PublicKeyResponse, PushSubscription,
    StatsResponse,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::dispatcher::{payload_for, test_payload, DispatchError, Dispatcher};
use crate::error::RelayError;
use crate::registry::SubscriptionRegistry;

#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<SubscriptionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn router(state: HttpState, config: &RelayConfig) -> Router {
    let static_dir: &Path = &config.static_dir;

    let api = Router::new()
        .route("/vapid-public-key", get(public_key))
        .route("/suscribir", post(subscribe))
        .route("/notificar", post(notify))
        .route("/test-notification", get(test_notification))
        .route("/stats", get(stats))
        .with_state(state);

    let app = api
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http());

    if config.cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    config: &RelayConfig,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Relay listening on http://{}", addr);
    info!("  GET  /                   app shell from {:?}", config.static_dir);
    info!("  GET  /vapid-public-key   application server key");
    info!("  POST /suscribir          register a subscription");
    info!("  POST /notificar          notify every subscriber");
    info!("  GET  /test-notification  notify the first subscriber");
    info!("  GET  /stats              subscription stats");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn public_key(State(state): State<HttpState>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key: state.registry.public_key(),
    })
}

async fn subscribe(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<(StatusCode, Json<MessageResponse>), RelayError> {
    let subscription: PushSubscription = serde_json::from_slice(&body)
        .map_err(|e| RelayError::BadRequest(format!("invalid subscription: {}", e)))?;
    state.registry.register(subscription).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Subscription registered".to_string(),
        }),
    ))
}

async fn notify(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Json<DispatchResponse>, RelayError> {
    // An empty body is the same as `{}`
    let request: DispatchRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DispatchRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| RelayError::BadRequest(format!("invalid JSON body: {}", e)))?
    };

    let payload = payload_for(&request);
    debug!("dispatch payload: {:?}", payload);
    let report = state.dispatcher.dispatch(&payload).await?;

    Ok(Json(DispatchResponse {
        message: format!("Notification sent to {} user(s)", report.sent),
        sent: report.sent,
        failed: report.failed,
    }))
}

async fn test_notification(
    State(state): State<HttpState>,
) -> Result<Json<MessageResponse>, RelayError> {
    match state.dispatcher.send_test(&test_payload()).await {
        Ok(()) => Ok(Json(MessageResponse {
            message: "Test notification sent".to_string(),
        })),
        Err(DispatchError::RegistryEmpty) => Err(RelayError::NoSubscribersForTest),
        Err(e) => Err(e.into()),
    }
}

async fn stats(State(state): State<HttpState>) -> Result<Json<StatsResponse>, RelayError> {
    Ok(Json(state.registry.stats().await?))
}
