use super::ApiError;
use crate::{
    prediction::{ProbeReport, TimedPrediction},
    server::SharedState,
};
use axum::{extract::State, response::Json};
use iris_contract::PredictionRequest;

pub async fn service_status(State(state): State<SharedState>) -> Json<ProbeReport> {
    state.metrics.record_request("/status");
    Json(state.prediction_client.probe().await)
}

/// Sends the canonical Setosa sample. Nothing is recorded in any history.
pub async fn test_prediction(
    State(state): State<SharedState>,
) -> Result<Json<TimedPrediction>, ApiError> {
    state.metrics.record_request("/status/test-prediction");

    let timed = state
        .prediction_client
        .predict(PredictionRequest::new(5.1, 3.5, 1.4, 0.2))
        .await?;
    tracing::info!(
        response_time_ms = timed.response_time_ms,
        "Test prediction answered"
    );

    Ok(Json(timed))
}
