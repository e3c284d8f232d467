//! Scan orchestration

use crate::error::{ScanError, ScanResult};
use crate::postprocess::{Prediction, TOP_K, postprocess_top_k};
use crate::preprocess::preprocess;
use crate::store::{ModelHandle, ModelStore};
use crate::tensor::{AllocationTracker, InputTensor, OutputScores};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Run one forward pass and extract the per-class scores.
///
/// Consumes the input so both tensors are released before returning.
pub fn infer(input: InputTensor, handle: &ModelHandle) -> ScanResult<Vec<f32>> {
    let values = handle.classifier().classify(&input)?;
    let scores = OutputScores::new(values, input.lease().sibling());
    drop(input);

    if let Some(idx) = scores.values().iter().position(|v| !v.is_finite()) {
        return Err(ScanError::inference(format!(
            "Model produced a non-finite score at index {idx}"
        )));
    }
    Ok(scores.into_vec())
}

/// Image in, ranked predictions out
#[derive(Debug, Clone)]
pub struct ScanEngine {
    store: Arc<ModelStore>,
    tracker: AllocationTracker,
    top_k: usize,
}

impl ScanEngine {
    pub fn new(store: Arc<ModelStore>) -> Self {
        Self {
            store,
            tracker: AllocationTracker::new(),
            top_k: TOP_K,
        }
    }

    /// Clamped to `1..=TOP_K`
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.clamp(1, TOP_K);
        self
    }

    /// Engine backed by the TFLite runtime and the configured asset source
    #[cfg(feature = "tflite")]
    pub fn from_config(
        config: &crate::config::EngineConfig,
    ) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        let loader = crate::store::AssetLoader::new(
            config.assets.to_source()?,
            Arc::new(crate::tflite::TfliteRuntime),
        )
        .with_model_file(&config.model_file)
        .with_metadata_file(&config.metadata_file);

        Ok(Self::new(Arc::new(ModelStore::new(loader))).with_top_k(config.top_k))
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Tensors currently held by in-flight scans
    pub fn live_tensors(&self) -> usize {
        self.tracker.live()
    }

    /// Kick off model loading in the background
    pub fn spawn_warm_up(&self) -> JoinHandle<ScanResult<()>> {
        let store = self.store.clone();
        tokio::spawn(async move { store.warm_up().await.map_err(ScanError::from) })
    }

    /// Classify one image.
    ///
    /// Loads the model on first use, then runs preprocess, infer and
    /// postprocess on the blocking pool. Any stage failure fails the call.
    pub async fn perform_scan(&self, image: Vec<u8>) -> ScanResult<Vec<Prediction>> {
        let handle = self.store.ensure_ready().await?;
        let tracker = self.tracker.clone();
        let top_k = self.top_k;

        let predictions = tokio::task::spawn_blocking(move || {
            let input = preprocess(&image, &handle.input_spec(), &tracker)?;
            tracing::debug!("Preprocessed input {:?}", input.shape());

            let scores = infer(input, &handle)?;
            tracing::debug!("Model produced {} scores", scores.len());

            postprocess_top_k(&scores, handle.labels(), top_k)
        })
        .await
        .map_err(|e| ScanError::inference(format!("Scan task join error: {e}")))??;

        if let Some(best) = predictions.first() {
            tracing::debug!(
                "Top prediction {} ({:.1}%)",
                best.condition,
                best.percentage()
            );
        }
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::metadata::ModelMetadata;
    use crate::runtime::Classifier;
    use crate::store::ModelLoader;
    use async_trait::async_trait;
    use ndarray::Array4;

    struct Fixed(Vec<f32>);

    impl Classifier for Fixed {
        fn classify(&self, _input: &InputTensor) -> ScanResult<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn classify(&self, _input: &InputTensor) -> ScanResult<Vec<f32>> {
            Err(ScanError::inference("backend exploded"))
        }
    }

    fn handle(classifier: impl Classifier + 'static, labels: usize) -> ModelHandle {
        let labels = (0..labels).map(|i| format!("Class {i}")).collect();
        ModelHandle::new(Arc::new(classifier), ModelMetadata::new(labels).with_image_size(4))
    }

    fn input(tracker: &AllocationTracker) -> InputTensor {
        InputTensor::new(Array4::zeros((1, 4, 4, 3)), tracker.lease())
    }

    #[test]
    fn infer_releases_tensors() {
        let tracker = AllocationTracker::new();
        let handle = handle(Fixed(vec![0.2, 0.8]), 2);

        let scores = infer(input(&tracker), &handle).unwrap();
        assert_eq!(scores, vec![0.2, 0.8]);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn infer_rejects_non_finite_scores() {
        let tracker = AllocationTracker::new();
        let handle = handle(Fixed(vec![0.5, f32::NAN]), 2);

        let err = infer(input(&tracker), &handle).unwrap_err();
        assert!(matches!(err, ScanError::Inference { .. }));
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn infer_propagates_backend_failure() {
        let tracker = AllocationTracker::new();
        let handle = handle(Failing, 2);

        assert!(infer(input(&tracker), &handle).is_err());
        assert_eq!(tracker.live(), 0);
    }

    struct Unreachable;

    #[async_trait]
    impl ModelLoader for Unreachable {
        async fn load(&self) -> Result<ModelHandle, LoadError> {
            Err(LoadError::fetch("model.tflite", "offline"))
        }
    }

    #[test]
    fn top_k_is_clamped() {
        let engine = || ScanEngine::new(Arc::new(ModelStore::new(Unreachable)));
        assert_eq!(engine().top_k(), TOP_K);
        assert_eq!(engine().with_top_k(25).top_k(), 3);
        assert_eq!(engine().with_top_k(0).top_k(), 1);
        assert_eq!(engine().with_top_k(2).top_k(), 2);
    }

    #[tokio::test]
    async fn load_failure_fails_the_scan() {
        let engine = ScanEngine::new(Arc::new(ModelStore::new(Unreachable)));
        let err = engine.perform_scan(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, ScanError::Load(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn warm_up_reports_load_failure() {
        let engine = ScanEngine::new(Arc::new(ModelStore::new(Unreachable)));
        let result = engine.spawn_warm_up().await.unwrap();
        assert!(matches!(result, Err(ScanError::Load(_))));
    }
}
