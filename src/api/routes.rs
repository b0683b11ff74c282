//! API route handlers.
//!
//! Thin JSON plumbing over the ledger service and the loop simulator.
//! Domain errors map to stable HTTP statuses; bodies carry the error
//! description plus a machine-readable kind.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::ledger::service::IconUpload;
use crate::ledger::LedgerService;
use crate::simulator::{simulate_form, LoopForm, Projection};
use crate::types::{
    CreatedTransactions, Cycle, Institution, LedgerError, Transaction, TransactionInput,
};

pub type AppState = Arc<LedgerService>;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Wrapper turning domain errors into HTTP responses.
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
            LedgerError::InsufficientBalance { .. }
            | LedgerError::IdenticalSettlementCycles
            | LedgerError::ImmutableTransaction => StatusCode::CONFLICT,
            LedgerError::Storage(_) | LedgerError::Decode(_) | LedgerError::Io(_) => {
                error!(error = %self.0, "Internal storage error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct NameBody {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub success: bool,
    pub deleted_transactions: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTransactionResponse {
    pub success: bool,
    pub deleted_transaction_id: String,
}

// ---------------------------------------------------------------------------
// Institutions
// ---------------------------------------------------------------------------

/// GET /api/institutions
pub async fn list_institutions(
    State(svc): State<AppState>,
) -> Result<Json<Vec<Institution>>, ApiError> {
    Ok(Json(svc.list_institutions().await?))
}

/// POST /api/institutions
pub async fn create_institution(
    State(svc): State<AppState>,
    Json(body): Json<NameBody>,
) -> Result<Json<Institution>, ApiError> {
    Ok(Json(svc.create_institution(&body.name, None).await?))
}

/// POST /api/institutions/{name}/icon — raw image bytes.
pub async fn upload_institution_icon(
    State(svc): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Institution>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let upload = IconUpload {
        original_file_name: format!("icon.{}", extension_for(&content_type)),
        content_type,
        bytes: body.to_vec(),
    };
    Ok(Json(svc.create_institution(&name, Some(upload)).await?))
}

/// GET /api/institutions/icons/{file_name}
pub async fn get_institution_icon(
    State(svc): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let (bytes, content_type) = svc.get_institution_icon(&file_name).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

/// GET /api/cycles
pub async fn list_cycles(State(svc): State<AppState>) -> Result<Json<Vec<Cycle>>, ApiError> {
    Ok(Json(svc.list_cycles().await?))
}

/// POST /api/cycles
pub async fn create_cycle(
    State(svc): State<AppState>,
    Json(body): Json<NameBody>,
) -> Result<Json<Cycle>, ApiError> {
    Ok(Json(svc.create_cycle(&body.name).await?))
}

/// PATCH /api/cycles/{id}
pub async fn rename_cycle(
    State(svc): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NameBody>,
) -> Result<Json<Cycle>, ApiError> {
    Ok(Json(svc.rename_cycle(&id, &body.name).await?))
}

/// DELETE /api/cycles/{id}
pub async fn delete_cycle(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    svc.delete_cycle(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/cycles/{id}/reset
pub async fn reset_cycle(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let outcome = svc.reset_cycle(&id).await?;
    Ok(Json(ResetResponse {
        success: true,
        deleted_transactions: outcome.deleted_transactions,
    }))
}

/// POST /api/cycles/{id}/undo-last
pub async fn undo_last_transaction(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedTransactionResponse>, ApiError> {
    let deleted = svc.undo_last_transaction(&id).await?;
    Ok(Json(DeletedTransactionResponse {
        success: true,
        deleted_transaction_id: deleted,
    }))
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// GET /api/transactions
pub async fn list_transactions(
    State(svc): State<AppState>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    Ok(Json(svc.list_transactions().await?))
}

/// POST /api/transactions — settlements respond with the linked pair.
pub async fn create_transaction(
    State(svc): State<AppState>,
    Json(input): Json<TransactionInput>,
) -> Result<Json<CreatedTransactions>, ApiError> {
    Ok(Json(svc.create_transaction(input).await?))
}

/// PUT /api/transactions/{id}
pub async fn update_transaction(
    State(svc): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<TransactionInput>,
) -> Result<Json<Transaction>, ApiError> {
    Ok(Json(svc.update_transaction(&id, input).await?))
}

/// DELETE /api/transactions/{id}
pub async fn delete_transaction(
    State(svc): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedTransactionResponse>, ApiError> {
    let deleted = svc.delete_transaction(&id).await?;
    Ok(Json(DeletedTransactionResponse {
        success: true,
        deleted_transaction_id: deleted,
    }))
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// POST /api/simulate — read-only loop projection, no ledger access.
pub async fn simulate(Json(form): Json<LoopForm>) -> Result<Json<Projection>, ApiError> {
    Ok(Json(simulate_form(&form)?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
