mod inference_service;
mod model_service;
mod ort_service;
mod routes;
mod server;
mod state;

pub mod config;

pub use inference_service::{InferenceError, InferenceService};
pub use model_service::{ModelError, ModelService};
pub use ort_service::OrtModelService;
pub use server::{build_router, start_server, HttpServer};
pub use state::{load_iris_labels, LabelMap, LabelsError, ServiceState};
