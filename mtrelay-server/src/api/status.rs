//! Health, status and counters.

use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use mtrelay_sdk::objects::status::{HealthResponse, MetricsSummary, StatusResponse};

use super::ApiError;
use crate::state::AppState;

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "mtrelay".to_string(),
    })
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let connections = state.relays.statuses();
    let deduplication_engine = state.dedup.stats().await?;
    Ok(Json(StatusResponse {
        active_connections: state.relays.active_connections(),
        connections,
        deduplication_engine,
    }))
}

/// `GET /metrics`
pub async fn prometheus(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}

/// `GET /api/metrics/summary`
pub async fn metrics_summary(State(state): State<AppState>) -> Json<MetricsSummary> {
    Json(state.metrics.summary())
}

#[cfg(test)]
mod tests {
    use crate::api::testing::{app, send, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mtrelay_core::metrics::RelayMetrics;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = app(state(false));
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "mtrelay");
    }

    #[tokio::test]
    async fn test_status_reports_dedup_tiers() {
        let state = state(false);
        state.dedup.admit("event-1").await.unwrap();
        let app = app(state);

        let (status, body) = send(&app, "GET", "/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_connections"], 0);
        assert_eq!(body["connections"], serde_json::json!([]));
        assert_eq!(body["deduplication_engine"]["durable_entry_count"], 1);
        assert_eq!(body["deduplication_engine"]["lru_cache_size"], 1);
    }

    #[tokio::test]
    async fn test_metrics_summary() {
        let state = state(false);
        RelayMetrics::add(&state.metrics.duplicates_filtered, 4);
        let app = app(state);
        let (status, body) = send(&app, "GET", "/api/metrics/summary", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicates_filtered_total"], 4);
        assert_eq!(body["events_received_total"], 0);
    }

    #[tokio::test]
    async fn test_prometheus_exposition() {
        let state = state(false);
        state.metrics.describe();
        RelayMetrics::add(&state.metrics.trades_settled, 2);
        RelayMetrics::incr(&state.metrics.downstream_connections);
        let app = app(state);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        // Other tests share the recorder, so only presence is stable.
        assert!(text.contains("# TYPE mtrelay_trades_settled_total counter"));
        assert!(text.contains("mtrelay_downstream_connections"));
    }
}
