//! Trend, snapshot and department insight endpoints.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::PerformanceSnapshot;
use crate::pipeline::feedback::{improvement_trend, learn_from_patterns, record_snapshot, DepartmentInsights, ImprovementTrend};

/// `GET /api/metrics/improvement-trend`
pub async fn trend(State(ctx): State<ApiContext>) -> Result<Json<ImprovementTrend>, ApiError> {
    let trend = ctx
        .blocking(|ctx, conn| Ok(improvement_trend(conn, &ctx.trend)?))
        .await?;
    Ok(Json(trend))
}

/// `POST /api/metrics/snapshot` rolls up today's processing.
pub async fn snapshot(State(ctx): State<ApiContext>) -> Result<Json<PerformanceSnapshot>, ApiError> {
    let snapshot = ctx.blocking(|_, conn| Ok(record_snapshot(conn)?)).await?;
    Ok(Json(snapshot))
}

/// `GET /api/metrics/insights`
pub async fn insights(State(ctx): State<ApiContext>) -> Result<Json<DepartmentInsights>, ApiError> {
    let insights = ctx
        .blocking(|ctx, conn| Ok(learn_from_patterns(conn, &ctx.insights)?))
        .await?;
    Ok(Json(insights))
}
