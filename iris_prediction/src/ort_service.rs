use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ModelError, ModelService},
};
use ndarray::Array2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const DEFAULT_INPUT_NAME: &str = "float_input";
const DEFAULT_OUTPUT_NAME: &str = "output_label";

/// Builds the `[1, 4]` model input from one set of measurements.
fn transform_features(features: [f32; 4]) -> Array2<f32> {
    Array2::from_shape_fn((1, 4), |(_, col)| features[col])
}

/// ONNX export of the classifier, served from a small pool of sessions.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input_name: String,
    output_name: String,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_intra_threads(1)?
                    .commit_from_file(model_config.get_path())?;
                Ok(session)
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        // skl2onnx names its tensors float_input / output_label
        let input_name = sessions[0]
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string());
        let output_name = sessions[0]
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .or_else(|| sessions[0].outputs.first())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());

        tracing::info!(
            sessions = num_instances,
            input = %input_name,
            output = %output_name,
            path = %model_config.get_path().display(),
            "Loaded classifier"
        );

        Ok(Self {
            sessions: Arc::new(
                sessions
                    .into_iter()
                    .map(|s| Arc::new(Mutex::new(s)))
                    .collect(),
            ),
            counter: Arc::new(AtomicUsize::new(0)),
            input_name,
            output_name,
        })
    }

    pub fn run_inference(&self, input: &Array2<f32>) -> Result<i64, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| ModelError::MissingOutput(self.output_name.clone()))?;

        let (_, labels) = output
            .try_extract_tensor::<i64>()
            .map_err(|e| ModelError::Extract(e.to_string()))?;

        labels
            .first()
            .copied()
            .ok_or_else(|| ModelError::Extract("empty label tensor".into()))
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, features: [f32; 4]) -> Result<i64, ModelError> {
        let input = transform_features(features);
        self.run_inference(&input)
    }
}
