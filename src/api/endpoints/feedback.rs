//! Feedback endpoints.

use axum::extract::{Query, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, FeedbackRequest, StatsQuery};
use crate::pipeline::feedback::{feedback_stats, FeedbackInput, FeedbackStats, UpdatedMetrics};

/// `POST /api/feedback`: rate a generated summary.
pub async fn submit(
    State(ctx): State<ApiContext>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<UpdatedMetrics>, ApiError> {
    let input = FeedbackInput {
        patient_id: request.patient_id,
        rating: request.rating,
        corrections: request.corrections,
    };
    let metrics = ctx
        .blocking(move |ctx, conn| Ok(ctx.processor.submit_feedback(conn, &input)?))
        .await?;
    Ok(Json(metrics))
}

/// `GET /api/feedback/stats?days=N`
pub async fn stats(
    State(ctx): State<ApiContext>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<FeedbackStats>, ApiError> {
    let days = query.days.unwrap_or(ctx.feedback_stats_days);
    if !(1..=365).contains(&days) {
        return Err(ApiError::BadRequest("days must be between 1 and 365".into()));
    }
    let stats = ctx
        .blocking(move |_, conn| Ok(feedback_stats(conn, days)?))
        .await?;
    Ok(Json(stats))
}
