//! HTTP endpoint handlers.
//!
//! `POST /notifications` accepts the same SNS event batch the queue worker
//! consumes and forwards it inside the request.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::forward::{ForwardedRecord, Forwarder};
use crate::transmit::{MailTransmitter, Transport};
use crate::Config;

/// Header carrying the shared webhook secret.
pub const AUTH_HEADER: &str = "X-Custom-Auth";

/// Shared application state.
pub struct AppState<T = Transport> {
    pub config: Arc<Config>,
    pub forwarder: Arc<Forwarder<T>>,
}

impl<T> AppState<T> {
    pub fn new(config: Config, forwarder: Arc<Forwarder<T>>) -> Self {
        Self {
            config: Arc::new(config),
            forwarder,
        }
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            forwarder: Arc::clone(&self.forwarder),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Notifications
// =============================================================================

/// Notification batch response.
#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<Vec<ForwardedRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationResponse {
    fn unauthorized() -> Self {
        Self {
            status: "unauthorized",
            forwarded: None,
            error: None,
        }
    }
}

/// Notification batch endpoint.
///
/// This endpoint:
/// 1. Verifies the X-Custom-Auth header (if configured)
/// 2. Forwards every record of the batch
/// 3. Returns 200 only when all records were forwarded
pub async fn notifications<T: MailTransmitter>(
    State(state): State<AppState<T>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!(body_length = body.len(), "notification_batch_received");

    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());

    match (provided, state.config.webhook_auth_token.as_deref()) {
        (Some(provided), Some(expected)) if provided == expected => {
            // Auth passes
        }
        (None, Some(_)) => {
            warn!("notification_auth_missing");
            return (
                StatusCode::UNAUTHORIZED,
                Json(NotificationResponse::unauthorized()),
            );
        }
        (Some(_), Some(_)) => {
            warn!("notification_auth_invalid");
            return (
                StatusCode::UNAUTHORIZED,
                Json(NotificationResponse::unauthorized()),
            );
        }
        (_, None) => {
            // No auth configured, allow through
        }
    }

    match state.forwarder.process_event(&body).await {
        Ok(report) => {
            info!(forwarded = report.forwarded.len(), "notification_batch_forwarded");
            (
                StatusCode::OK,
                Json(NotificationResponse {
                    status: "forwarded",
                    forwarded: Some(report.forwarded),
                    error: None,
                }),
            )
        }
        Err(e) => {
            warn!(error = %e, "notification_batch_failed");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(NotificationResponse {
                    status: "failed",
                    forwarded: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{http::HeaderValue, response::Response};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde_json::{json, Value};

    use super::*;
    use crate::forward::ForwarderSettings;
    use crate::routing::{RoutingConfig, RuleSpec};

    #[derive(Default)]
    struct RecordingTransmitter {
        sent: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl MailTransmitter for RecordingTransmitter {
        async fn send(&self, _raw: &[u8], destinations: &[String]) -> Result<()> {
            self.sent.lock().unwrap().push(destinations.to_vec());
            Ok(())
        }
    }

    fn state(auth_token: Option<&str>) -> AppState<RecordingTransmitter> {
        let mut config = Config::from_env();
        config.webhook_auth_token = auth_token.map(str::to_string);

        let routing = RoutingConfig::new(vec![RuleSpec::new(".+@example.com", "team@relay")]).unwrap();
        let forwarder = Forwarder::new(
            Arc::new(routing),
            ForwarderSettings::default(),
            RecordingTransmitter::default(),
        );

        AppState::new(config, Arc::new(forwarder))
    }

    fn batch(recipient: &str) -> Bytes {
        let message = json!({
            "content": BASE64.encode("From: a@b\r\nTo: x\r\n\r\nhi"),
            "receipt": {
                "recipients": [recipient],
                "spamVerdict": {"status": "PASS"},
                "virusVerdict": {"status": "PASS"}
            }
        });
        let event = json!({
            "Records": [{"Sns": {"MessageId": "sns-1", "Message": message.to_string()}}]
        });
        Bytes::from(event.to_string())
    }

    async fn call(
        state: AppState<RecordingTransmitter>,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, Value) {
        let response: Response = notifications(State(state), headers, body)
            .await
            .into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom-auth", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_health() {
        let Json(response) = health().await;
        assert_eq!(response.status, "ok");
    }

    #[tokio::test]
    async fn test_notifications_forwarded() {
        let state = state(None);
        let (status, body) = call(state.clone(), HeaderMap::new(), batch("user@example.com")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "forwarded");
        assert_eq!(body["forwarded"][0]["id"], "sns-1");
        assert_eq!(body["forwarded"][0]["destinations"][0], "team@relay");
        assert_eq!(
            state.forwarder.transmitter().sent.lock().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_notifications_batch_failure() {
        let (status, body) = call(state(None), HeaderMap::new(), batch("user@moto.com")).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], "sns-1: no destination");
    }

    #[tokio::test]
    async fn test_notifications_malformed_event() {
        let (status, body) = call(state(None), HeaderMap::new(), Bytes::from_static(b"nope")).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "failed");
    }

    #[tokio::test]
    async fn test_notifications_auth() {
        let (status, _) = call(state(Some("secret")), HeaderMap::new(), batch("user@example.com")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(state(Some("secret")), auth("wrong"), batch("user@example.com")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(state(Some("secret")), auth("secret"), batch("user@example.com")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "forwarded");
    }
}
