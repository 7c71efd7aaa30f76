mod batch;
mod health;
mod history;
mod metrics;
mod predict;
mod status;

use crate::{
    batch::BatchError, prediction::PredictionClientError, server::SharedState,
    session::SessionError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use iris_contract::ErrorDetail;
use thiserror::Error;
use uuid::Uuid;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/status", get(status::service_status))
        .route("/status/test-prediction", post(status::test_prediction))
        .route("/sessions", post(predict::create_session))
        .route("/sessions/{session_id}", delete(predict::delete_session))
        .route("/sessions/{session_id}/predict", post(predict::predict))
        .route(
            "/sessions/{session_id}/history",
            get(history::list_history).delete(history::clear_history),
        )
        .route("/sessions/{session_id}/history/export", get(history::export_history))
        .route("/sessions/{session_id}/stats", get(history::history_stats))
        .route("/batch", post(batch::predict_batch))
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unknown session {0}")]
    SessionNotFound(Uuid),
    #[error(transparent)]
    Prediction(#[from] PredictionClientError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Export failed: {0}")]
    Export(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => ApiError::SessionNotFound(id),
            SessionError::Prediction(e) => ApiError::Prediction(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Prediction(PredictionClientError::Client(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Prediction(_) => StatusCode::BAD_GATEWAY,
            ApiError::Batch(_) | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorDetail::new(self.to_string()))).into_response()
    }
}
