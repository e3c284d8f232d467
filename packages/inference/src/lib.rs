//! DermaScan inference
//!
//! On-device skin condition classification for Teachable Machine image
//! models. A [`ScanEngine`] takes raw image bytes and returns the three most
//! likely conditions:
//!
//! ```rust,ignore
//! use dermascan_inference::{EngineConfig, ScanEngine};
//!
//! let config = EngineConfig::load(None)?;
//! let engine = ScanEngine::from_config(&config)?;
//! engine.spawn_warm_up();
//!
//! let predictions = engine.perform_scan(std::fs::read("arm.jpg")?).await?;
//! for p in &predictions {
//!     println!("{} {:.1}% ({})", p.condition, p.percentage(), p.id);
//! }
//! ```
//!
//! The model (`model.tflite`) and its label table (`metadata.json`) are
//! loaded once per [`ModelStore`] and shared by every scan.

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod metadata;
pub mod postprocess;
pub mod preprocess;
pub mod runtime;
pub mod source;
pub mod store;
pub mod tensor;

#[cfg(feature = "tflite")]
pub mod tflite;

pub use config::{AssetLocation, ConfigError, EngineConfig};
pub use engine::{ScanEngine, infer};
pub use error::{LoadError, ScanError, ScanResult};
pub use history::{HistoryError, HistorySink, LocalHistory, ScanImage, ScanRecord};
pub use metadata::{InputSpec, Interpolation, LabelTable, ModelMetadata, Normalization};
pub use postprocess::{ConditionKind, Prediction, TOP_K, condition_id, postprocess};
pub use preprocess::preprocess;
pub use runtime::{Classifier, ModelRuntime};
pub use source::{AssetSource, DirectorySource};
pub use store::{AssetLoader, ModelHandle, ModelLoader, ModelStatus, ModelStore};
pub use tensor::{AllocationTracker, InputTensor};

#[cfg(feature = "http")]
pub use source::HttpSource;

#[cfg(feature = "tflite")]
pub use tflite::TfliteRuntime;
