//! Seams between the pipeline and the model execution backend

use crate::error::{LoadError, ScanResult};
use crate::metadata::ModelMetadata;
use crate::tensor::InputTensor;
use std::sync::Arc;

/// A loaded, ready-to-run image classifier.
///
/// Implementations return one score per class and are expected to apply
/// softmax themselves (Teachable Machine exports end in a softmax layer).
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &InputTensor) -> ScanResult<Vec<f32>>;

    /// Length of the output vector when the graph declares it statically
    fn output_len(&self) -> Option<usize> {
        None
    }
}

/// Builds a [`Classifier`] from raw model bytes
pub trait ModelRuntime: Send + Sync {
    fn build(&self, model: Vec<u8>, metadata: &ModelMetadata)
    -> Result<Arc<dyn Classifier>, LoadError>;
}

/// Fail fast when the graph and the label table cannot line up
pub fn check_label_count(
    classifier: &dyn Classifier,
    metadata: &ModelMetadata,
) -> Result<(), LoadError> {
    match classifier.output_len() {
        Some(outputs) if outputs != metadata.labels.len() => Err(LoadError::Incompatible {
            labels: metadata.labels.len(),
            outputs,
        }),
        Some(_) => Ok(()),
        None => {
            tracing::debug!("Model output length is dynamic, label count checked per scan");
            Ok(())
        }
    }
}
