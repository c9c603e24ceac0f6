use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use market_data::range::DEFAULT_RANGE;
use serde::Deserialize;
use types::chart::ChartDataResponse;

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub symbol: String,
    pub range: Option<String>,
}

/// `GET /v1/chart?symbol=..&range=..`
pub async fn get_chart(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<ChartDataResponse>, AppError> {
    let range = query.range.as_deref().unwrap_or(DEFAULT_RANGE);
    let chart = state
        .engine
        .charts()
        .get_chart(&query.symbol, range)
        .await
        .inspect_err(|e| {
            tracing::debug!(symbol = query.symbol.as_str(), range, error = %e, "Chart request failed");
        })?;

    Ok(Json(ChartDataResponse::clone(&chart)))
}
