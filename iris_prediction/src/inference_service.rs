use crate::{
    model_service::{ModelError, ModelService},
    state::ServiceState,
};
use iris_contract::{PredictionRequest, PredictionResponse};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("{0}")]
    Classifier(String),
    #[error("classifier returned unmapped class id {0}")]
    UnmappedClass(i64),
}

impl From<ModelError> for InferenceError {
    fn from(err: ModelError) -> Self {
        InferenceError::Classifier(err.to_string())
    }
}

/// The loaded classifier together with its label mapping. Read-only once built.
pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
    service_state: Arc<ServiceState>,
}

impl<M: ModelService> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
            service_state: self.service_state.clone(),
        }
    }
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(model_service: M, service_state: ServiceState) -> Self {
        Self {
            model_service: Arc::new(model_service),
            service_state: Arc::new(service_state),
        }
    }

    pub fn state(&self) -> &ServiceState {
        &self.service_state
    }

    #[instrument(skip(self))]
    pub async fn predict(
        &self,
        request: PredictionRequest,
    ) -> Result<PredictionResponse, InferenceError> {
        let features = request.features().map(|value| value as f32);
        let model_service = self.model_service.clone();

        let class_id = tokio::task::spawn_blocking(move || model_service.predict(features))
            .await
            .map_err(|e| InferenceError::Classifier(format!("inference task failed: {}", e)))??;

        let flower_name = self
            .service_state
            .labels()
            .get(class_id)
            .ok_or(InferenceError::UnmappedClass(class_id))?;

        tracing::debug!(class_id, flower_name, "Prediction complete");

        Ok(PredictionResponse {
            prediction: class_id,
            flower_name: flower_name.to_string(),
        })
    }
}
