//! HTTP request handlers

use super::types::{
    ChatResponse, CoachChatRequest, DocumentUploadRequest, DocumentUploadResponse, ErrorResponse,
    GrammarChatRequest, GrammarChatResponse, HistoryEntry, RefineChatRequest,
    RefineChatResponse, ServiceIndex, ThreadResponse,
};
use super::AppState;
use crate::db::ChatMessage;
use crate::runtime::{EngineError, TurnInput};
use crate::state_machine::Flow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

const MAX_THREAD_ID_LEN: usize = 128;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_index))
        .route("/version", get(get_version))
        // Coaching agent
        .route("/coaching/chat", post(coach_chat))
        .route("/coaching/threads", post(create_thread))
        .route("/coaching/threads/:thread_id/resume", post(resume_coach))
        // Refiner agent
        .route("/refiner/refine_chat", post(refine_chat))
        .route("/refiner/threads", post(create_thread))
        .route("/refiner/threads/:thread_id/resume", post(resume_refiner))
        .route("/refiner/documents", post(upload_document))
        // Grammar agent
        .route("/grammar/chat", post(grammar_chat))
        .route("/grammar/threads", post(create_thread))
        .route("/grammar/threads/:thread_id/resume", post(resume_grammar))
        .with_state(state)
}

// ============================================================
// Agents
// ============================================================

async fn coach_chat(
    State(state): State<AppState>,
    Json(req): Json<CoachChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let thread_id = resolve_thread(&state, req.thread_id)?;
    let input = TurnInput {
        user_input: req.user_input,
        conversation_history: to_messages(&req.conversation_history)?,
        has_document: false,
    };

    let outcome = state
        .engine
        .handle_turn(&thread_id, Flow::Coach, input)
        .await?;
    Ok(Json(ChatResponse::from_outcome(thread_id, &outcome)))
}

async fn refine_chat(
    State(state): State<AppState>,
    Json(req): Json<RefineChatRequest>,
) -> Result<Json<RefineChatResponse>, AppError> {
    let thread_id = resolve_thread(&state, req.thread_id)?;
    let input = TurnInput {
        user_input: req.original_prompt,
        conversation_history: to_messages(&req.conversation_history)?,
        has_document: req.has_document,
    };

    let outcome = state
        .engine
        .handle_turn(&thread_id, Flow::Refiner, input)
        .await?;
    Ok(Json(RefineChatResponse::from_outcome(thread_id, &outcome)))
}

async fn grammar_chat(
    State(state): State<AppState>,
    Json(req): Json<GrammarChatRequest>,
) -> Result<Json<GrammarChatResponse>, AppError> {
    let thread_id = resolve_thread(&state, req.thread_id)?;
    let input = TurnInput {
        user_input: req.user_input,
        ..TurnInput::default()
    };

    let outcome = state
        .engine
        .handle_turn(&thread_id, Flow::Grammar, input)
        .await?;
    Ok(Json(GrammarChatResponse::from_outcome(thread_id, &outcome)))
}

// ============================================================
// Threads
// ============================================================

async fn create_thread(State(state): State<AppState>) -> Json<ThreadResponse> {
    Json(ThreadResponse {
        thread_id: state.engine.create_thread(),
    })
}

async fn resume_coach(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ChatResponse>, AppError> {
    let thread_id = validate_thread_id(thread_id)?;
    let outcome = state.engine.step(&thread_id, Flow::Coach).await?;
    Ok(Json(ChatResponse::from_outcome(thread_id, &outcome)))
}

async fn resume_refiner(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<RefineChatResponse>, AppError> {
    let thread_id = validate_thread_id(thread_id)?;
    let outcome = state.engine.step(&thread_id, Flow::Refiner).await?;
    Ok(Json(RefineChatResponse::from_outcome(thread_id, &outcome)))
}

async fn resume_grammar(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<GrammarChatResponse>, AppError> {
    let thread_id = validate_thread_id(thread_id)?;
    let outcome = state.engine.step(&thread_id, Flow::Grammar).await?;
    Ok(Json(GrammarChatResponse::from_outcome(thread_id, &outcome)))
}

/// An omitted thread starts a new conversation
fn resolve_thread(state: &AppState, thread_id: Option<String>) -> Result<String, AppError> {
    match thread_id {
        Some(id) => validate_thread_id(id),
        None => Ok(state.engine.create_thread()),
    }
}

fn validate_thread_id(thread_id: String) -> Result<String, AppError> {
    if thread_id.trim().is_empty() {
        return Err(AppError::BadRequest("thread_id must not be blank".to_string()));
    }
    if thread_id.chars().count() > MAX_THREAD_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "thread_id must be at most {MAX_THREAD_ID_LEN} characters"
        )));
    }
    Ok(thread_id)
}

fn to_messages(history: &[HistoryEntry]) -> Result<Vec<ChatMessage>, AppError> {
    history
        .iter()
        .map(|entry| {
            entry
                .to_message()
                .ok_or_else(|| AppError::BadRequest(format!("Unknown role: {}", entry.role)))
        })
        .collect()
}

// ============================================================
// Documents
// ============================================================

async fn upload_document(
    State(state): State<AppState>,
    Json(req): Json<DocumentUploadRequest>,
) -> Result<Json<DocumentUploadResponse>, AppError> {
    if req.filename.trim().is_empty() {
        return Err(AppError::BadRequest("filename must not be blank".to_string()));
    }
    let chunks = state
        .documents
        .ingest(req.filename.trim(), &req.content)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(DocumentUploadResponse { chunks }))
}

// ============================================================
// Service info
// ============================================================

async fn service_index(State(state): State<AppState>) -> Json<ServiceIndex> {
    Json(ServiceIndex {
        service: "prompt-coach",
        version: env!("CARGO_PKG_VERSION"),
        agents: vec!["coaching", "refiner", "grammar"],
        models: state.llm_registry.available_model_info(),
        default_model: state.llm_registry.default_model_id().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("prompt-coach ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ThreadNotFound { .. } => AppError::NotFound(err.to_string()),
            EngineError::FlowMismatch { .. } => AppError::Conflict(err.to_string()),
            // Logged by the engine; callers get a generic message
            EngineError::Persistence(_) | EngineError::InvalidTransition(_) => {
                AppError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
