//! Model metadata shipped next to the model graph
//!
//! The metadata file is the single source of truth for the label table and
//! for the per-model preprocessing constants. It follows the Teachable Machine
//! `metadata.json` layout (`labels`, `imageSize`, `modelName`) and accepts two
//! extra keys, `normalization` and `interpolation`, so that swapping models
//! never needs a code change.

use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

/// Teachable Machine image models are exported at 224x224
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Pixel intensity range the model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `x / 255`
    ZeroToOne,
    /// `x / 127.5 - 1`
    #[default]
    MinusOneToOne,
    /// Unscaled `0..=255`, for models that normalize inside the graph
    Raw,
}

impl Normalization {
    /// Scale a channel value in `0.0..=255.0`
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Normalization::ZeroToOne => value / 255.0,
            Normalization::MinusOneToOne => value / 127.5 - 1.0,
            Normalization::Raw => value,
        }
    }

    /// Inclusive output range
    pub fn range(self) -> (f32, f32) {
        match self {
            Normalization::ZeroToOne => (0.0, 1.0),
            Normalization::MinusOneToOne => (-1.0, 1.0),
            Normalization::Raw => (0.0, 255.0),
        }
    }
}

/// Resize sampling, both with tfjs `alignCorners = false` source coordinates
/// (`src = dst * in / out`, no half-pixel offset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// `floor(src)`
    #[default]
    Nearest,
    /// 2-tap linear blend of `floor(src)` and `ceil(src)` on each axis
    Bilinear,
}

/// Everything the preprocessor needs to know about the model input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    /// Side length of the square input
    pub size: u32,
    pub normalization: Normalization,
    pub interpolation: Interpolation,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            size: DEFAULT_IMAGE_SIZE,
            normalization: Normalization::default(),
            interpolation: Interpolation::default(),
        }
    }
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// Class names in model output order
    pub labels: Vec<String>,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default)]
    pub interpolation: Interpolation,
}

fn default_image_size() -> u32 {
    DEFAULT_IMAGE_SIZE
}

impl ModelMetadata {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            image_size: DEFAULT_IMAGE_SIZE,
            model_name: None,
            normalization: Normalization::default(),
            interpolation: Interpolation::default(),
        }
    }

    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Parse and validate a metadata file
    pub fn from_slice(asset: &str, bytes: &[u8]) -> Result<Self, LoadError> {
        let metadata: ModelMetadata =
            serde_json::from_slice(bytes).map_err(|e| LoadError::parse(asset, e))?;
        metadata.validate(asset)?;
        Ok(metadata)
    }

    fn validate(&self, asset: &str) -> Result<(), LoadError> {
        if self.labels.is_empty() {
            return Err(LoadError::parse(asset, "label list is empty"));
        }
        if let Some(idx) = self.labels.iter().position(|l| l.trim().is_empty()) {
            return Err(LoadError::parse(asset, format!("label {idx} is blank")));
        }
        if self.image_size == 0 {
            return Err(LoadError::parse(asset, "imageSize must be positive"));
        }
        Ok(())
    }

    pub fn input_spec(&self) -> InputSpec {
        InputSpec {
            size: self.image_size,
            normalization: self.normalization,
            interpolation: self.interpolation,
        }
    }

    pub fn label_table(&self) -> LabelTable {
        LabelTable::from(self.labels.clone())
    }
}

/// Ordered class names; index `i` names output score `i`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Arc<[String]>,
}

impl LabelTable {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<Vec<String>> for LabelTable {
    fn from(labels: Vec<String>) -> Self {
        Self {
            labels: labels.into(),
        }
    }
}

impl Deref for LabelTable {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_teachable_machine_metadata() {
        let json = br#"{
            "tfjsVersion": "1.3.1",
            "tmVersion": "2.4.10",
            "packageVersion": "0.8.4",
            "packageName": "@teachablemachine/image",
            "timeStamp": "2024-05-01T10:00:00.000Z",
            "userMetadata": {},
            "modelName": "tm-my-image-model",
            "labels": ["Acne And Rosacea Photos", "Heathy", "Vi Shingles"],
            "imageSize": 224
        }"#;

        let metadata = ModelMetadata::from_slice("metadata.json", json).unwrap();
        assert_eq!(metadata.labels.len(), 3);
        assert_eq!(metadata.image_size, 224);
        assert_eq!(metadata.model_name.as_deref(), Some("tm-my-image-model"));
        assert_eq!(metadata.normalization, Normalization::MinusOneToOne);
        assert_eq!(metadata.interpolation, Interpolation::Nearest);
    }

    #[test]
    fn reads_preprocessing_overrides() {
        let json = br#"{
            "labels": ["a", "b"],
            "imageSize": 128,
            "normalization": "zero_to_one",
            "interpolation": "bilinear"
        }"#;

        let spec = ModelMetadata::from_slice("metadata.json", json)
            .unwrap()
            .input_spec();
        assert_eq!(spec.size, 128);
        assert_eq!(spec.normalization, Normalization::ZeroToOne);
        assert_eq!(spec.interpolation, Interpolation::Bilinear);
    }

    #[test]
    fn rejects_missing_or_empty_labels() {
        let missing = ModelMetadata::from_slice("metadata.json", br#"{"imageSize": 224}"#);
        assert!(matches!(missing, Err(LoadError::Parse { .. })));

        let empty = ModelMetadata::from_slice("metadata.json", br#"{"labels": []}"#);
        assert!(matches!(empty, Err(LoadError::Parse { .. })));

        let blank = ModelMetadata::from_slice("metadata.json", br#"{"labels": ["a", " "]}"#);
        assert!(matches!(blank, Err(LoadError::Parse { .. })));
    }

    #[test]
    fn rejects_malformed_json() {
        let result = ModelMetadata::from_slice("metadata.json", b"<html>404</html>");
        match result {
            Err(LoadError::Parse { asset, .. }) => assert_eq!(asset, "metadata.json"),
            other => panic!("Expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn normalization_endpoints() {
        assert_eq!(Normalization::ZeroToOne.apply(0.0), 0.0);
        assert_eq!(Normalization::ZeroToOne.apply(255.0), 1.0);
        assert_eq!(Normalization::MinusOneToOne.apply(0.0), -1.0);
        assert_eq!(Normalization::MinusOneToOne.apply(255.0), 1.0);
        assert!(Normalization::MinusOneToOne.apply(128.0).abs() < 0.01);
        assert_eq!(Normalization::Raw.apply(200.0), 200.0);
        assert_eq!(Normalization::Raw.range(), (0.0, 255.0));
    }

    #[test]
    fn label_table_keeps_order() {
        let table = LabelTable::from(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(table.len(), 2);
        assert_eq!(table[0], "first");
        assert_eq!(table.iter().last().map(String::as_str), Some("second"));
    }
}
