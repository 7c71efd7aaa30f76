use super::ApiError;
use crate::{batch::run_batch, server::SharedState};
use axum::{body::Bytes, extract::State, response::Json};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::instrument;

#[derive(Serialize)]
pub struct BatchReport {
    total: usize,
    failed: usize,
    counts: BTreeMap<String, usize>,
    csv: String,
}

#[instrument(skip_all)]
pub async fn predict_batch(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<BatchReport>, ApiError> {
    state.metrics.record_request("/batch");

    let output = run_batch(state.prediction_client.as_ref(), &body, |progress| {
        tracing::info!("Prediction {}/{}", progress.completed, progress.total);
    })
    .await?;

    let summary = output.summary();
    state
        .metrics
        .record_batch(summary.total - summary.failed, summary.failed);

    let csv =
        String::from_utf8(output.to_csv()?).map_err(|e| ApiError::Export(e.to_string()))?;

    Ok(Json(BatchReport {
        total: summary.total,
        failed: summary.failed,
        counts: summary.counts,
        csv,
    }))
}
