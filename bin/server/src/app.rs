//! Routes and shared state.

use crate::error::ApiError;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use persona_studio_ai::ActionDispatcher;
use persona_studio_core::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info_span};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: ActionDispatcher,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(dispatcher: ActionDispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Body of `POST /api/ai`.
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub payload: JsonValue,
}

/// Successful reply to `POST /api/ai`.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub result: JsonValue,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ai", post(run_action))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn run_action(
    State(state): State<AppState>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let Json(request) = body?;
    let span = info_span!("api_request", request_id = %RequestId::new(), action = %request.action);

    let result = state
        .dispatcher
        .dispatch(&request.action, request.payload)
        .instrument(span)
        .await?;

    Ok(Json(ActionResponse { result }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use persona_studio_ai::{
        Credential, CredentialPool, Invoker, LlmBackend, LlmError, LlmRequest, LlmResponse,
        TokenUsage,
    };
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn generate(
            &self,
            _credential: &Credential,
            _request: &LlmRequest,
        ) -> Result<LlmResponse, LlmError> {
            let reply = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .expect("script ran out");
            reply.map(|content| LlmResponse {
                content,
                usage: TokenUsage::default(),
                model: "scripted".to_string(),
            })
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn app(keys: &[&str], replies: Vec<Result<&'static str, LlmError>>) -> Router {
        let backend = Arc::new(ScriptedBackend {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
        });
        let invoker = Invoker::with_defaults(CredentialPool::new(keys.iter().copied()));
        router(AppState::new(ActionDispatcher::new(invoker, backend)))
    }

    async fn post_json(app: Router, body: &str) -> (StatusCode, JsonValue) {
        let response = app
            .oneshot(
                Request::post("/api/ai")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn health_says_ok() {
        let response = app(&[], vec![])
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn text_action_wraps_the_result() {
        let (status, body) = post_json(
            app(&["k1"], vec![Ok("Hello from the model")]),
            r#"{"action": "generate_text", "payload": {"prompt": "Say hello"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "result": "Hello from the model" }));
    }

    #[tokio::test]
    async fn structured_action_returns_the_value() {
        let (status, body) = post_json(
            app(&["k1"], vec![Ok("```json\n[{\"title\": \"Rent\"}]\n```")]),
            r#"{"action": "suggest_issues", "payload": {"persona": "A tenant organiser", "count": 1}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "result": [{ "title": "Rent" }] }));
    }

    #[tokio::test]
    async fn unknown_action_is_400() {
        let (status, body) = post_json(
            app(&["k1"], vec![]),
            r#"{"action": "summon", "payload": {}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "message": "unknown action: summon" }));
    }

    #[tokio::test]
    async fn undecodable_body_is_400_with_a_message() {
        let (status, body) = post_json(app(&["k1"], vec![]), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn exhausted_quota_is_429() {
        let quota = LlmError::QuotaExceeded {
            retry_after_secs: None,
            reason: "daily limit".to_string(),
        };
        let (status, body) = post_json(
            app(&["only"], vec![Err(quota)]),
            r#"{"action": "generate_text", "payload": {"prompt": "hi"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(
            body["message"]
                .as_str()
                .is_some_and(|m| m.contains("daily limit"))
        );
    }

    #[tokio::test]
    async fn missing_credentials_are_reported_explicitly() {
        let (status, body) = post_json(
            app(&[], vec![]),
            r#"{"action": "chat", "payload": {"message": "hi"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "message": "no API credentials configured" }));
    }

    #[tokio::test]
    async fn backend_status_passes_through() {
        let rejected = LlmError::RequestFailed {
            status: Some(400),
            reason: "Invalid JSON payload received.".to_string(),
        };
        let (status, body) = post_json(
            app(&["k1"], vec![Err(rejected)]),
            r#"{"action": "generate_text", "payload": {"prompt": "hi"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["message"]
                .as_str()
                .is_some_and(|m| m.contains("Invalid JSON payload"))
        );
    }
}
