//! Status and operator routes

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::observability::{Event, Logger, MetricsRegistry};
use crate::region::RegionId;
use crate::signal::{OperatorCommand, Signal, SignalSender};
use crate::status::StatusBoard;

// ==================
// Shared State
// ==================

/// State shared by every handler
#[derive(Clone)]
pub struct HttpState {
    pub status: Arc<StatusBoard>,
    pub metrics: Arc<MetricsRegistry>,
    pub signals: SignalSender,
}

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub primary: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

// ==================
// Routes
// ==================

/// Build the router.
pub fn routes(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/operator/rebalance", post(rebalance_handler))
        .route("/operator/retry", post(retry_handler))
        .route("/operator/resolve", post(resolve_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}

async fn status_handler(State(state): State<HttpState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.status.snapshot()))
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.metrics.snapshot()))
}

async fn rebalance_handler(State(state): State<HttpState>) -> impl IntoResponse {
    submit(&state, OperatorCommand::RebalanceRequested).await
}

async fn retry_handler(State(state): State<HttpState>) -> impl IntoResponse {
    submit(&state, OperatorCommand::RetryFailover).await
}

async fn resolve_handler(
    State(state): State<HttpState>,
    Json(request): Json<ResolveRequest>,
) -> impl IntoResponse {
    if request.primary.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "primary must not be empty");
    }
    submit(
        &state,
        OperatorCommand::ResolveManually {
            primary: RegionId::new(request.primary.trim()),
        },
    )
    .await
}

/// Queue a command for the engine. The engine decides whether it applies;
/// rejections show up in the log and in `/status`.
async fn submit(state: &HttpState, command: OperatorCommand) -> axum::response::Response {
    let name = command.name();
    match state.signals.try_send(Signal::Operator(command)) {
        Ok(()) => {
            Logger::info("OPERATOR_COMMAND_QUEUED", &[("command", name)]);
            (
                StatusCode::ACCEPTED,
                Json(AcceptedResponse {
                    accepted: name.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            Logger::event(
                Event::CommandRejected,
                &[("command", name), ("reason", &e.to_string())],
            );
            error(StatusCode::SERVICE_UNAVAILABLE, "engine is not accepting signals")
        }
    }
}

fn error(code: StatusCode, message: &str) -> axum::response::Response {
    (
        code,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.as_u16(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{RegionRecord, RegionRegistry, RegionRole};
    use crate::signal::signal_channel;
    use axum::body::to_bytes;

    fn state(capacity: usize) -> (HttpState, crate::signal::SignalReceiver) {
        let registry = Arc::new(
            RegionRegistry::new(vec![
                RegionRecord::new("use1", RegionRole::Primary, "db.use1:5432", "c-use1"),
                RegionRecord::new("usw2", RegionRole::Secondary, "db.usw2:5432", "c-usw2"),
            ])
            .unwrap(),
        );
        let (tx, rx) = signal_channel(capacity);
        (
            HttpState {
                status: Arc::new(StatusBoard::new(registry)),
                metrics: Arc::new(MetricsRegistry::new()),
                signals: tx,
            },
            rx,
        )
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_status_lists_regions() {
        let (state, _rx) = state(4);
        let response = status_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        assert!(body.contains(r#""engine_state":"HEALTHY""#));
        assert!(body.contains("usw2"));
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let (state, _rx) = state(4);
        state.metrics.increment_probes_sent();
        let body = body_string(metrics_handler(State(state)).await.into_response()).await;
        assert!(body.contains(r#""probes_sent":1"#));
    }

    #[tokio::test]
    async fn test_resolve_is_queued() {
        let (state, mut rx) = state(4);
        let response = resolve_handler(
            State(state),
            Json(ResolveRequest {
                primary: "usw2".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert_eq!(
            rx.recv().await,
            Some(Signal::Operator(OperatorCommand::ResolveManually {
                primary: "usw2".into()
            }))
        );
    }

    #[tokio::test]
    async fn test_full_channel_is_unavailable() {
        let (state, _rx) = state(1);
        let first = retry_handler(State(state.clone())).await.into_response();
        let second = rebalance_handler(State(state)).await.into_response();

        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_primary() {
        let (state, _rx) = state(4);
        let response = resolve_handler(
            State(state),
            Json(ResolveRequest {
                primary: "  ".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
