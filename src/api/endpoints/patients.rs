//! Patient endpoints: decrypt and reprocess.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{parse_patient_id, ApiContext, ReprocessRequest};
use crate::pipeline::processor::GenerationReport;
use crate::pipeline::vault::DecryptedPatient;

/// `GET /api/patients/:id/decrypt`: resolve stored tokens for display.
pub async fn decrypt(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<DecryptedPatient>, ApiError> {
    let patient_id = parse_patient_id(&id)?;
    let decrypted = ctx
        .blocking(move |ctx, conn| Ok(ctx.processor.decrypt(conn, &patient_id)?))
        .await?;
    Ok(Json(decrypted))
}

/// `POST /api/patients/:id/reprocess`: body is optional.
pub async fn reprocess(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    body: Option<Json<ReprocessRequest>>,
) -> Result<Json<GenerationReport>, ApiError> {
    let patient_id = parse_patient_id(&id)?;
    let policy = body.and_then(|Json(request)| request.policy);
    let report = ctx
        .blocking(move |ctx, conn| Ok(ctx.processor.reprocess(conn, &patient_id, policy)?))
        .await?;
    Ok(Json(report))
}
