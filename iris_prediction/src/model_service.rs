use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to build input tensor: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model output missing: {0}")]
    MissingOutput(String),
    #[error("failed to extract class label: {0}")]
    Extract(String),
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
}

/// A loaded classifier mapping four measurements to a class id.
///
/// Calls are blocking and may run concurrently from several threads.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, features: [f32; 4]) -> Result<i64, ModelError>;
}
