use crate::{
    inference_service::{InferenceError, InferenceService},
    model_service::ModelService,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use iris_contract::{ErrorDetail, HealthStatus, PredictionRequest, PredictionResponse, RootInfo};
use tracing::instrument;

pub fn api_routes<M: ModelService>() -> Router<InferenceService<M>> {
    Router::new()
        .route("/", get(root::<M>))
        .route("/health", get(healthcheck))
        .route("/predict/", post(predict::<M>))
        .route("/predict", post(predict::<M>))
}

async fn root<M: ModelService>(State(service): State<InferenceService<M>>) -> Json<RootInfo> {
    Json(RootInfo {
        message: service.state().message().to_string(),
        version: service.state().version().to_string(),
    })
}

async fn healthcheck() -> Json<HealthStatus> {
    Json(HealthStatus::healthy())
}

#[instrument(skip(service))]
async fn predict<M: ModelService>(
    State(service): State<InferenceService<M>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, InferenceError> {
    let response = service.predict(request).await.map_err(|e| {
        tracing::error!("Prediction failed: {}", e);
        e
    })?;

    Ok(Json(response))
}

impl IntoResponse for InferenceError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorDetail::new(self.to_string())),
        )
            .into_response()
    }
}
