use crate::state::AppState;
use axum::{extract::State, Json};
use market_data::metrics::MetricsSnapshot;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": market_data::SERVICE_VERSION,
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.engine.metrics().snapshot())
}
