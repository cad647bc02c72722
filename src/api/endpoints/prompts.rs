//! Prompt template endpoints.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::PromptPerformance;
use crate::pipeline::prompts::{evolve as evolve_templates, EvolutionReport};

/// `GET /api/prompts/performance`: templates in ranking order.
pub async fn performance(State(ctx): State<ApiContext>) -> Result<Json<Vec<PromptPerformance>>, ApiError> {
    let ranked = ctx
        .blocking(|ctx, conn| Ok(ctx.processor.prompt_performance(conn)?))
        .await?;
    Ok(Json(ranked))
}

/// `POST /api/prompts/evolve`: promote the best template when it has earned it.
pub async fn evolve(State(ctx): State<ApiContext>) -> Result<Json<EvolutionReport>, ApiError> {
    let report = ctx
        .blocking(|ctx, conn| Ok(evolve_templates(conn, &ctx.evolution)?))
        .await?;
    Ok(Json(report))
}
