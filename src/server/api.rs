use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use precast_common::{ChangeEvent, ChangeKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ws::{self, Keepalive};
use crate::errors::ServerError;
use crate::hub::{ChangeHub, TopicInfo};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub hub: ChangeHub,
    pub keepalive: Keepalive,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub table: String,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub id: Uuid,
    pub delivered: usize,
}

// ── Error handling ────────────────────────────────────────────────────

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::InvalidTopic(_) | ServerError::BadRequest(_) | ServerError::Change(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::HubClosed => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/topics", get(list_topics))
        .route("/api/topics/{topic}/changes", post(publish_change))
        .route("/ws/{topic}", get(ws::ws_handler))
        .route("/health", get(health_check))
}

/// Topic names are used verbatim as hub keys and URL segments.
pub fn validate_topic(topic: &str) -> Result<(), ServerError> {
    let valid = !topic.is_empty()
        && topic.len() <= 128
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '=' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ServerError::InvalidTopic(topic.to_string()))
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn list_topics(State(state): State<SharedState>) -> Json<Vec<TopicInfo>> {
    Json(state.hub.topics())
}

async fn publish_change(
    State(state): State<SharedState>,
    Path(topic): Path<String>,
    Json(req): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ServerError> {
    validate_topic(&topic)?;
    if state.hub.is_closed() {
        return Err(ServerError::HubClosed);
    }
    if req.table.trim().is_empty() {
        return Err(ServerError::BadRequest("table must not be empty".to_string()));
    }

    let mut event = ChangeEvent::new(topic, req.table, req.kind, req.record)?;
    if let Some(old) = req.old_record {
        event = event.with_old_record(old)?;
    }
    let id = event.id;
    let delivered = state.hub.publish(event);

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { id, delivered })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> (Router, ChangeHub) {
        let hub = ChangeHub::new(16);
        let state = Arc::new(AppState {
            hub: hub.clone(),
            keepalive: Keepalive::default(),
        });
        (api_router().with_state(state), hub)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn publish_request(topic: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/topics/{}/changes", topic))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("elements").is_ok());
        assert!(validate_topic("elements:project_id=42").is_ok());
        assert!(validate_topic("messages.unread-7").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("has space").is_err());
        assert!(validate_topic("slash/topic").is_err());
        assert!(validate_topic(&"x".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_publish_delivers_to_subscribers() {
        let (app, hub) = test_app();
        let mut rx = hub.subscribe_topic("elements").unwrap();

        let response = app
            .oneshot(publish_request(
                "elements",
                serde_json::json!({
                    "table": "elements",
                    "kind": "UPDATE",
                    "record": {"id": 3, "status": "cast"},
                    "old_record": {"id": 3, "status": "planned"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["delivered"], 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.topic, "elements");
        assert_eq!(event.record["status"], "cast");
        assert_eq!(event.old_record.unwrap()["status"], "planned");
        assert_eq!(body["id"], event.id.to_string());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_accepted() {
        let (app, _) = test_app();
        let response = app
            .oneshot(publish_request(
                "deliveries",
                serde_json::json!({"table": "deliveries", "kind": "INSERT", "record": {"id": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["delivered"], 0);
    }

    #[tokio::test]
    async fn test_publish_rejects_non_object_record() {
        let (app, _) = test_app();
        let response = app
            .oneshot(publish_request(
                "elements",
                serde_json::json!({"table": "elements", "kind": "INSERT", "record": "oops"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("JSON object"));
    }

    #[tokio::test]
    async fn test_publish_rejects_invalid_topic() {
        let (app, _) = test_app();
        let response = app
            .oneshot(publish_request(
                "bad%20topic",
                serde_json::json!({"table": "elements", "kind": "INSERT", "record": {"id": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_table() {
        let (app, _) = test_app();
        let response = app
            .oneshot(publish_request(
                "elements",
                serde_json::json!({"table": " ", "kind": "DELETE", "record": {}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_on_closed_hub_is_unavailable() {
        let (app, hub) = test_app();
        hub.close();
        let response = app
            .oneshot(publish_request(
                "elements",
                serde_json::json!({"table": "elements", "kind": "INSERT", "record": {"id": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_list_topics() {
        let (app, hub) = test_app();
        let _rx = hub.subscribe_topic("messages").unwrap();
        let req = Request::builder()
            .uri("/api/topics")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["topic"], "messages");
        assert_eq!(body[0]["subscribers"], 1);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let (app, _) = test_app();
        let req = Request::builder()
            .uri("/ws/elements")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
