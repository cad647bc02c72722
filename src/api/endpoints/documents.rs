//! `POST /api/documents/process`: ingest one clinical document.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ProcessDocumentRequest};
use crate::models::Document;
use crate::pipeline::processor::ProcessResult;

/// Maximum accepted document size in bytes (1 MB).
const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

pub async fn process(
    State(ctx): State<ApiContext>,
    Json(request): Json<ProcessDocumentRequest>,
) -> Result<Json<ProcessResult>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("document text is empty".into()));
    }
    if request.text.len() > MAX_DOCUMENT_BYTES {
        return Err(ApiError::BadRequest(format!(
            "document exceeds {MAX_DOCUMENT_BYTES} bytes"
        )));
    }

    let document = Document {
        text: request.text,
        source: request.source,
        filename: request.filename,
    };
    let policy = request.policy;

    let result = ctx
        .blocking(move |ctx, conn| Ok(ctx.processor.process_document(conn, &document, policy)?))
        .await?;
    Ok(Json(result))
}
