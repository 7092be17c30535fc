//! Upstream source management.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use mtrelay_sdk::objects::ActionResponse;
use mtrelay_sdk::objects::relays::{RelayUrlRequest, RelaysResponse};

use super::ApiError;
use super::extractors::ControlToken;
use crate::state::AppState;

/// `GET /api/relays`
pub async fn list_relays(State(state): State<AppState>) -> Json<RelaysResponse> {
    let relays = state.relays.statuses();
    Json(RelaysResponse {
        count: relays.len(),
        relays,
    })
}

/// `POST /api/relays/add`
pub async fn add_relay(
    _token: ControlToken,
    State(state): State<AppState>,
    body: Result<Json<RelayUrlRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let Json(req) = body?;
    state.relays.add_source(&req.url)?;
    Ok(Json(ActionResponse::ok(format!("relay {} added", req.url))))
}

/// `DELETE /api/relays/remove`
pub async fn remove_relay(
    _token: ControlToken,
    State(state): State<AppState>,
    body: Result<Json<RelayUrlRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let Json(req) = body?;
    state.relays.remove_source(&req.url)?;
    Ok(Json(ActionResponse::ok(format!("relay {} removed", req.url))))
}

#[cfg(test)]
mod tests {
    use crate::api::testing::{TOKEN, app, send, state};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_list_remove() {
        let app = app(state(true));
        let relay = json!({ "url": "ws://127.0.0.1:1" });

        let (status, _) =
            send(&app, "POST", "/api/relays/add", Some(relay.clone()), Some(TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            send(&app, "POST", "/api/relays/add", Some(relay.clone()), Some(TOKEN)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "GET", "/api/relays", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert!(body["relays"][0]["url"].as_str().unwrap().starts_with("ws://127.0.0.1:1"));

        let (status, _) =
            send(&app, "DELETE", "/api/relays/remove", Some(relay.clone()), Some(TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            send(&app, "DELETE", "/api/relays/remove", Some(relay), Some(TOKEN)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, "GET", "/api/relays", None, None).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_rejects_bad_url_and_capacity() {
        let app = app(state(true));
        let (status, _) = send(
            &app,
            "POST",
            "/api/relays/add",
            Some(json!({ "url": "http://example.com" })),
            Some(TOKEN),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // The test pool holds two sources.
        for port in [1, 2] {
            let (status, _) = send(
                &app,
                "POST",
                "/api/relays/add",
                Some(json!({ "url": format!("ws://127.0.0.1:{port}") })),
                Some(TOKEN),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = send(
            &app,
            "POST",
            "/api/relays/add",
            Some(json!({ "url": "ws://127.0.0.1:3" })),
            Some(TOKEN),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
