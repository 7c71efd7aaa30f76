use super::ApiError;
use crate::{history::HistoryEntry, server::SharedState, session::predict_and_record};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use iris_contract::PredictionRequest;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

#[derive(Serialize)]
pub struct SessionCreated {
    session_id: Uuid,
}

pub async fn create_session(
    State(state): State<SharedState>,
) -> (StatusCode, Json<SessionCreated>) {
    state.metrics.record_request("/sessions");
    let session_id = state.sessions.create();
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

pub async fn delete_session(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(session_id))
    }
}

#[instrument(skip(state))]
pub async fn predict(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<HistoryEntry>, ApiError> {
    state.metrics.record_request("/sessions/predict");

    match predict_and_record(
        &state.sessions,
        state.prediction_client.as_ref(),
        session_id,
        request,
    )
    .await
    {
        Ok(entry) => {
            state
                .metrics
                .record_prediction("success", Some(entry.response_time_ms));
            tracing::info!(
                session = %session_id,
                prediction = %entry.prediction,
                response_time_ms = entry.response_time_ms,
                "Prediction recorded"
            );
            Ok(Json(entry))
        }
        Err(e) => {
            let err = ApiError::from(e);
            if let ApiError::Prediction(cause) = &err {
                state.metrics.record_prediction("failure", None);
                tracing::error!(session = %session_id, "Prediction failed: {}", cause);
            }
            Err(err)
        }
    }
}
