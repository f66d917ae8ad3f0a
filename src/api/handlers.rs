//! HTTP request handlers

use super::types::{
    ConversationResponse, ErrorResponse, MessagesResponse, ModelsResponse,
    RetrievalPriorityRequest, RetrievalPriorityResponse, SendTurnRequest, SwitchModelRequest,
    UnresolvedResponse,
};
use super::AppState;
use crate::llm::{LlmError, LlmErrorKind, ModelStatus};
use crate::pipeline::{PipelineStatus, TurnError, TurnReply};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

const DEFAULT_UNRESOLVED_LIMIT: u32 = 50;
const MAX_UNRESOLVED_LIMIT: u32 = 500;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Turns
        .route("/api/conversations/:id/turns", post(send_turn))
        .route("/api/conversations/:id/messages", get(get_messages))
        .route("/api/conversations/:id/close", post(close_conversation))
        // Review queue
        .route("/api/unresolved", get(list_unresolved))
        // Model control
        .route("/api/models", get(list_models))
        .route("/api/model/switch", post(switch_model))
        .route("/api/model/unload", post(unload_model))
        // Status and settings
        .route("/api/status", get(get_status))
        .route("/api/retrieval-priority", post(set_retrieval_priority))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Turns
// ============================================================

async fn send_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendTurnRequest>,
) -> Result<Json<TurnReply>, AppError> {
    if req.utterance.trim().is_empty() {
        return Err(AppError::BadRequest("Utterance must not be empty".to_string()));
    }

    let reply = state.pipeline.send_turn(&id, &req.utterance).await?;
    Ok(Json(reply))
}

async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let messages = state
        .pipeline
        .messages(&id)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(MessagesResponse {
        conversation_id: id,
        messages,
    }))
}

async fn close_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = state
        .pipeline
        .close_conversation(&id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("Conversation not found: {id}")))?;

    Ok(Json(ConversationResponse { conversation }))
}

#[derive(Debug, Deserialize)]
struct UnresolvedQuery {
    limit: Option<u32>,
}

async fn list_unresolved(
    State(state): State<AppState>,
    Query(query): Query<UnresolvedQuery>,
) -> Result<Json<UnresolvedResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_UNRESOLVED_LIMIT)
        .min(MAX_UNRESOLVED_LIMIT);
    let messages = state
        .pipeline
        .list_unresolved(limit)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(UnresolvedResponse { messages }))
}

// ============================================================
// Models
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state.pipeline.list_models();
    let active_model = state.pipeline.get_status().active_model;
    Json(ModelsResponse {
        models,
        active_model,
    })
}

async fn switch_model(
    State(state): State<AppState>,
    Json(req): Json<SwitchModelRequest>,
) -> Result<Json<ModelStatus>, AppError> {
    let status = state.pipeline.switch_model(&req.model_id).await?;
    Ok(Json(status))
}

async fn unload_model(State(state): State<AppState>) -> Result<Json<ModelStatus>, AppError> {
    let status = state.pipeline.unload_model().await?;
    Ok(Json(status))
}

// ============================================================
// Status
// ============================================================

async fn get_status(State(state): State<AppState>) -> Json<PipelineStatus> {
    Json(state.pipeline.get_status())
}

async fn set_retrieval_priority(
    State(state): State<AppState>,
    Json(req): Json<RetrievalPriorityRequest>,
) -> Json<RetrievalPriorityResponse> {
    state.pipeline.set_retrieval_priority(req.enabled);
    Json(RetrievalPriorityResponse {
        retrieval_priority: state.pipeline.get_status().retrieval_priority,
    })
}

async fn get_version() -> &'static str {
    concat!("aicounsel ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl From<TurnError> for AppError {
    fn from(e: TurnError) -> Self {
        match e {
            TurnError::ModelNotReady(_) => AppError::ServiceUnavailable(e.to_string()),
            TurnError::ConversationClosed(_) => AppError::Conflict(e.to_string()),
        }
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        match e.kind {
            LlmErrorKind::UnknownModel => AppError::NotFound(e.message),
            LlmErrorKind::LoadFailed
            | LlmErrorKind::Network
            | LlmErrorKind::Timeout
            | LlmErrorKind::ServerError => AppError::ServiceUnavailable(e.message),
            _ => AppError::Internal(e.message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FailingConversationStore, TestPipeline};
    use std::sync::Arc;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn harness() -> (Router, TestPipeline) {
        let t = TestPipeline::builder().build().await;
        let router = create_router(AppState::new(t.pipeline.clone()));
        (router, t)
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn turn_round_trip() {
        let (app, t) = harness().await;
        t.backend.queue_response("반갑습니다. 무엇을 도와드릴까요?");

        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/conversations/c1/turns",
            Some(json!({ "utterance": "안녕하세요" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["label"], "casual");
        assert_eq!(body["unresolved"], false);
        assert!(body.get("cooldown_until").is_none());

        let (status, body) = call(app, "GET", "/api/conversations/c1/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn empty_utterance_is_bad_request() {
        let (app, t) = harness().await;
        let (status, body) = call(
            app,
            "POST",
            "/api/conversations/c1/turns",
            Some(json!({ "text": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));
        assert_eq!(t.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn closed_conversation_is_conflict() {
        let (app, _t) = harness().await;
        let (status, _) = call(
            app.clone(),
            "POST",
            "/api/conversations/c1/turns",
            Some(json!({ "utterance": "불고기 레시피" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(app.clone(), "POST", "/api/conversations/c1/close", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation"]["status"], "closed");

        let (status, _) = call(
            app,
            "POST",
            "/api/conversations/c1/turns",
            Some(json!({ "utterance": "날씨 어때" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn closing_unknown_conversation_is_not_found() {
        let (app, _t) = harness().await;
        let (status, _) = call(app, "POST", "/api/conversations/nope/close", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn closing_with_store_outage_is_internal_error() {
        let t = TestPipeline::builder()
            .conversations(Arc::new(FailingConversationStore))
            .build()
            .await;
        let app = create_router(AppState::new(t.pipeline.clone()));

        let (status, body) = call(app, "POST", "/api/conversations/c1/close", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn not_ready_model_is_service_unavailable() {
        let t = TestPipeline::builder().unloaded().build().await;
        let app = create_router(AppState::new(t.pipeline.clone()));

        let (status, body) = call(
            app,
            "POST",
            "/api/conversations/c1/turns",
            Some(json!({ "utterance": "안녕하세요" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("not ready"));
    }

    #[tokio::test]
    async fn unknown_model_switch_is_not_found() {
        let (app, _t) = harness().await;
        let (status, _) = call(
            app,
            "POST",
            "/api/model/switch",
            Some(json!({ "model_id": "gpt-9" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn model_listing_and_switch() {
        let (app, _t) = harness().await;
        let (status, body) = call(app.clone(), "GET", "/api/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_model"], "model-a");
        assert_eq!(body["models"][0]["active"], true);

        let (status, body) = call(
            app,
            "POST",
            "/api/model/switch",
            Some(json!({ "model_id": "model-a" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_model"], "model-a");
        assert_eq!(body["load_state"]["state"], "ready");
    }

    #[tokio::test]
    async fn unload_then_turn_is_service_unavailable() {
        let (app, _t) = harness().await;
        let (status, body) = call(app.clone(), "POST", "/api/model/unload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_model"], "model-a");
        assert_eq!(body["load_state"]["state"], "unloaded");

        let (status, _) = call(
            app,
            "POST",
            "/api/conversations/c1/turns",
            Some(json!({ "utterance": "안녕하세요" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn retrieval_priority_toggle_shows_in_status() {
        let (app, _t) = harness().await;
        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/retrieval-priority",
            Some(json!({ "enabled": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retrieval_priority"], false);

        let (_, status_body) = call(app, "GET", "/api/status", None).await;
        assert_eq!(status_body["retrieval_priority"], false);
        assert!(status_body["counters"]["turns"].is_object());
    }

    #[tokio::test]
    async fn unresolved_listing() {
        let (app, t) = harness().await;
        t.backend.queue_response("프린터 전원을 다시 켜 보세요.");
        let (status, _) = call(
            app.clone(),
            "POST",
            "/api/conversations/c1/turns",
            Some(json!({ "utterance": "프린터가 이상해요" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(app, "GET", "/api/unresolved?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["unresolved"], true);
    }
}
