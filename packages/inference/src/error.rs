//! Error types for the scan pipeline

use thiserror::Error;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Shown for every failure except an undecodable image
pub const GENERIC_FAILURE_MESSAGE: &str = "Could not analyze the image, please try again.";

/// Shown when the supplied file is not an image
pub const INVALID_IMAGE_MESSAGE: &str = "Please choose a valid image file (JPEG or PNG).";

/// Errors that can occur while loading the model and its label table.
///
/// Cloneable so that every caller awaiting the same shared load receives
/// the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// An asset could not be fetched from its source
    #[error("Failed to fetch {asset}: {message}")]
    Fetch { asset: String, message: String },

    /// An asset was fetched but could not be parsed
    #[error("Failed to parse {asset}: {message}")]
    Parse { asset: String, message: String },

    /// The runtime rejected the model graph
    #[error("Failed to build model: {message}")]
    Model { message: String },

    /// The metadata label count disagrees with the model output shape
    #[error("Model produces {outputs} scores but metadata lists {labels} labels")]
    Incompatible { labels: usize, outputs: usize },
}

impl LoadError {
    pub fn fetch(asset: impl Into<String>, message: impl ToString) -> Self {
        LoadError::Fetch {
            asset: asset.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(asset: impl Into<String>, message: impl ToString) -> Self {
        LoadError::Parse {
            asset: asset.into(),
            message: message.to_string(),
        }
    }

    pub fn model(message: impl ToString) -> Self {
        LoadError::Model {
            message: message.to_string(),
        }
    }
}

/// Errors surfaced by a scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// Model or label assets failed to load; a later call may retry
    #[error("Model load failed: {0}")]
    Load(#[from] LoadError),

    /// The supplied bytes are not a decodable raster image
    #[error("Could not decode image: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },

    /// Label table and score vector disagree in length
    #[error("Label table has {labels} entries but the model produced {scores} scores")]
    LabelMismatch { labels: usize, scores: usize },

    /// The forward pass failed
    #[error("Inference failed: {message}")]
    Inference { message: String },
}

impl ScanError {
    pub fn decode(message: impl Into<String>) -> Self {
        ScanError::Decode {
            message: message.into(),
            source: None,
        }
    }

    pub fn decode_with_source(source: image::ImageError) -> Self {
        ScanError::Decode {
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        ScanError::Inference {
            message: message.into(),
        }
    }

    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Load(_) | ScanError::Inference { .. })
    }

    /// Message suitable for showing to the person who supplied the image
    pub fn user_message(&self) -> &'static str {
        match self {
            ScanError::Decode { .. } => INVALID_IMAGE_MESSAGE,
            _ => GENERIC_FAILURE_MESSAGE,
        }
    }
}
