//! REST API Server for the DeFi fund manager
//!
//! Exposes the advisor via HTTP endpoints for the wallet frontend

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::advisor::Advisor;
use crate::models::{TurnRequest, TurnResponse};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default, alias = "chat_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub advisor: Arc<Advisor>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

/// The last message is the turn input; earlier ones are already in the
/// session history. Always answers 200 with an `answer` field.
async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Json<TurnResponse> {
    let text = req
        .messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default();

    info!(
        session_id = ?req.session_id,
        messages = req.messages.len(),
        "Received chat request"
    );

    let response = state
        .advisor
        .handle_turn(TurnRequest {
            session_id: req.session_id,
            text,
        })
        .await;
    Json(response)
}

/// =============================
/// Session Endpoint
/// =============================

async fn reset_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.advisor.reset_session(&session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "cleared": true,
            }))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Failed to reset session: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(advisor: Arc<Advisor>) -> Router {
    let state = ApiState { advisor };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:session_id", delete(reset_session))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    advisor: Arc<Advisor>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(advisor);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolAgent;
    use crate::dispatch::{DispatchGraph, FALLBACK_ANSWER};
    use crate::llm::{Completion, ScriptedModel};
    use crate::memory::InMemorySessionStore;
    use crate::models::Specialist;
    use crate::supervisor::RuleSupervisor;
    use crate::tools::ToolRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(analyst_script: Vec<Completion>) -> Router {
        let agent = |identity, script| {
            Arc::new(ToolAgent::new(
                identity,
                Arc::new(ScriptedModel::new(script)),
                ToolRegistry::new(),
                2,
                Duration::from_secs(1),
            ))
        };
        let graph = DispatchGraph::new(
            Arc::new(RuleSupervisor::new()),
            agent(Specialist::Analyst, analyst_script),
            agent(Specialist::Executor, vec![]),
            4,
        );
        let advisor = Advisor::new(graph, Arc::new(InMemorySessionStore::default()));
        create_router(Arc::new(advisor))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn chat(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(vec![])
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_chat_uses_last_message() {
        let response = router(vec![Completion::text("📈 ethereum 当前价格: $3000")])
            .oneshot(chat(serde_json::json!({
                "session_id": "s1",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "what is the eth price"}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["answer"], "📈 ethereum 当前价格: $3000");
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["hops"], 1);
        assert!(body.get("transaction").is_none());
    }

    #[tokio::test]
    async fn test_chat_without_messages() {
        let response = router(vec![])
            .oneshot(chat(serde_json::json!({ "messages": [] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["answer"], crate::advisor::EMPTY_MESSAGE_ANSWER);
        assert_eq!(body["session_id"], "default");
    }

    #[tokio::test]
    async fn test_chat_greeting_alias_route() {
        let mut request = chat(serde_json::json!({
            "chat_id": "c9",
            "messages": [{"role": "user", "content": "你好"}]
        }));
        *request.uri_mut() = "/api/chat".parse().unwrap();

        let body = json_body(router(vec![]).oneshot(request).await.unwrap()).await;
        assert_eq!(body["answer"], FALLBACK_ANSWER);
        assert_eq!(body["session_id"], "c9");
    }

    #[tokio::test]
    async fn test_reset_session() {
        let response = router(vec![])
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sessions/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["session_id"], "s1");
    }
}
