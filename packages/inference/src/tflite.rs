//! TFLite execution via tract
//!
//! Teachable Machine exports a float TFLite graph taking `[1, H, W, 3]`
//! and producing `[1, classes]` softmax scores.

use crate::error::{LoadError, ScanError, ScanResult};
use crate::metadata::ModelMetadata;
use crate::runtime::{Classifier, ModelRuntime, check_label_count};
use crate::tensor::InputTensor;
use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;
use tract_tflite::prelude::*;

type Plan = TypedRunnableModel<TypedModel>;

#[derive(Debug, Default, Clone, Copy)]
pub struct TfliteRuntime;

impl ModelRuntime for TfliteRuntime {
    fn build(
        &self,
        model: Vec<u8>,
        metadata: &ModelMetadata,
    ) -> Result<Arc<dyn Classifier>, LoadError> {
        if model.is_empty() {
            return Err(LoadError::model("Model file is empty"));
        }
        let buffer = find_tflite_slice(&model)
            .ok_or_else(|| LoadError::model("Could not locate TFLite buffer (TFL3 id)"))?;

        let mut cursor = Cursor::new(buffer);
        let graph = tract_tflite::tflite()
            .model_for_read(&mut cursor)
            .map_err(|e| LoadError::model(format!("TFLite parse error: {e}")))?;

        let inlet = graph
            .input_outlets()
            .map_err(LoadError::model)?
            .first()
            .copied()
            .ok_or_else(|| LoadError::model("Model has no inputs"))?;
        let orig = graph.outlet_fact(inlet).map_err(LoadError::model)?;
        if orig.datum_type != DatumType::F32 {
            return Err(LoadError::model(format!(
                "Unsupported input dtype: {:?} (only F32 is supported)",
                orig.datum_type
            )));
        }

        let side = metadata.image_size as usize;
        let fact = TypedFact::dt_shape(f32::datum_type(), tvec!(1, side, side, 3));
        let plan = graph
            .with_input_fact(0, fact)
            .and_then(|g| g.into_optimized())
            .and_then(|g| g.into_runnable())
            .map_err(|e| LoadError::model(format!("Failed to prepare TFLite model: {e}")))?;

        let output_len = plan
            .model()
            .output_fact(0)
            .ok()
            .and_then(|f| f.shape.as_concrete().map(|dims| dims.iter().product()));

        let classifier = TfliteClassifier {
            plan,
            side,
            output_len,
        };
        check_label_count(&classifier, metadata)?;

        tracing::info!(
            "TFLite model ready: {}x{} input, {} classes",
            side,
            side,
            metadata.labels.len()
        );
        Ok(Arc::new(classifier))
    }
}

pub struct TfliteClassifier {
    plan: Plan,
    side: usize,
    output_len: Option<usize>,
}

impl Classifier for TfliteClassifier {
    fn classify(&self, input: &InputTensor) -> ScanResult<Vec<f32>> {
        let expected = [1, self.side, self.side, 3];
        if input.shape() != expected {
            return Err(ScanError::inference(format!(
                "Input shape {:?} does not match model input {:?}",
                input.shape(),
                expected
            )));
        }

        let data: Cow<'_, [f32]> = match input.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(input.view().iter().copied().collect()),
        };
        let tensor = Tensor::from_shape(&expected, &*data)
            .map_err(|e| ScanError::inference(format!("Failed to shape input tensor: {e}")))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| ScanError::inference(format!("Failed to run TFLite model: {e}")))?;

        let out = outputs
            .first()
            .ok_or_else(|| ScanError::inference("Model produced no outputs"))?
            .to_array_view::<f32>()
            .map_err(|e| ScanError::inference(format!("Output is not f32: {e}")))?;

        Ok(out.iter().copied().collect())
    }

    fn output_len(&self) -> Option<usize> {
        self.output_len
    }
}

/// TFLite flatbuffers carry the `TFL3` identifier at offset 4; some exports
/// are wrapped in a container, so scan for it.
pub(crate) fn find_tflite_slice(buf: &[u8]) -> Option<&[u8]> {
    if buf.len() < 8 {
        return None;
    }
    (0..=buf.len() - 8)
        .find(|&i| &buf[i + 4..i + 8] == b"TFL3")
        .map(|i| &buf[i..])
}
