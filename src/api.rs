//! The outbound REST shell: thin adapters over `Core`. No routing logic
//! lives here beyond translating HTTP in and out.

use crate::document::IngestRecord;
use crate::error::CoreError;
use crate::orchestrator::Core;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
}

impl AppState {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    pub doc_id: String,
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub hybrid_answer: String,
    pub rag_only_answer: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteDocumentRequest {
    pub doc_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Wraps `CoreError` so it can be returned directly from a handler.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        error!("request failed: {}", self.0);
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/uploadpdf", post(upload_pdf_handler))
        .route("/answer", post(answer_handler))
        .route("/compare", post(compare_handler))
        .route("/clearalldata", post(clear_all_data_handler))
        .route("/document", axum::routing::delete(delete_document_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Accept a multipart upload containing a single PDF file field named `file`.
async fn upload_pdf_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<IngestRecord>> {
    let mut pdf_bytes: Option<Vec<u8>> = None;
    let mut display_name = "document.pdf".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            if let Some(name) = field.file_name() {
                display_name = name.to_string();
            }
            let data = field
                .bytes()
                .await
                .map_err(|e| CoreError::InvalidInput(format!("failed to read upload: {e}")))?;
            pdf_bytes = Some(data.to_vec());
        }
    }

    let pdf_bytes = pdf_bytes.ok_or_else(|| CoreError::InvalidInput("missing \"file\" field".to_string()))?;

    let max_bytes = state.core.max_upload_bytes();
    if pdf_bytes.len() > max_bytes {
        return Err(CoreError::InvalidInput(format!(
            "upload of {} bytes exceeds the {max_bytes}-byte limit",
            pdf_bytes.len()
        ))
        .into());
    }

    info!(bytes = pdf_bytes.len(), display_name = %display_name, "received PDF upload");
    let record = state.core.ingest(&pdf_bytes, display_name).await?;
    Ok(Json(record))
}

async fn answer_handler(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> ApiResult<Json<AnswerResponse>> {
    let answer = state.core.answer(request.question, request.doc_id).await?;
    Ok(Json(AnswerResponse { answer }))
}

/// Run both the hybrid pipeline and a RAG-only bypass side by side.
async fn compare_handler(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> ApiResult<Json<CompareResponse>> {
    let hybrid_answer = state
        .core
        .answer(request.question.clone(), request.doc_id.clone())
        .await?;
    let rag_only_answer = state.core.answer_rag_only(request.question, request.doc_id).await?;

    Ok(Json(CompareResponse { hybrid_answer, rag_only_answer }))
}

async fn clear_all_data_handler(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.core.clear_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_document_handler(
    State(state): State<AppState>,
    Json(request): Json<DeleteDocumentRequest>,
) -> ApiResult<StatusCode> {
    state.core.delete_document(&request.doc_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serializes() {
        let response = HealthResponse { status: "ok".to_string(), version: "0.1.0".to_string() };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"ok\""));
    }

    #[test]
    fn test_api_error_maps_invalid_input_to_bad_request() {
        let err = ApiError::from(CoreError::InvalidInput("bad".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_api_error_maps_not_found() {
        let err = ApiError::from(CoreError::NotFound("doc".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
