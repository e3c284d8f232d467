//! Model lifecycle
//!
//! [`ModelStore`] owns a single memoized load. The first caller starts it,
//! every concurrent caller awaits the same shared future, and the resolved
//! [`ModelHandle`] is reused until the store is dropped. A failed load is
//! not cached: all callers awaiting that attempt get the same [`LoadError`]
//! and the next call starts a fresh attempt.

use crate::error::LoadError;
use crate::metadata::{InputSpec, LabelTable, ModelMetadata};
use crate::runtime::{Classifier, ModelRuntime};
use crate::source::AssetSource;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_MODEL_FILE: &str = "model.tflite";
pub const DEFAULT_METADATA_FILE: &str = "metadata.json";

/// The loaded network plus the label table shipped with it
pub struct ModelHandle {
    classifier: Arc<dyn Classifier>,
    labels: LabelTable,
    metadata: ModelMetadata,
}

impl ModelHandle {
    pub fn new(classifier: Arc<dyn Classifier>, metadata: ModelMetadata) -> Self {
        Self {
            classifier,
            labels: metadata.label_table(),
            metadata,
        }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn input_spec(&self) -> InputSpec {
        self.metadata.input_spec()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("labels", &self.labels.len())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Produces a fresh [`ModelHandle`]; called at most once per successful load
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<ModelHandle, LoadError>;
}

/// Loads the model graph and `metadata.json` from an [`AssetSource`]
pub struct AssetLoader {
    source: Arc<dyn AssetSource>,
    runtime: Arc<dyn ModelRuntime>,
    model_file: String,
    metadata_file: String,
}

impl AssetLoader {
    pub fn new(source: Arc<dyn AssetSource>, runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            source,
            runtime,
            model_file: DEFAULT_MODEL_FILE.to_string(),
            metadata_file: DEFAULT_METADATA_FILE.to_string(),
        }
    }

    pub fn with_model_file(mut self, name: impl Into<String>) -> Self {
        self.model_file = name.into();
        self
    }

    pub fn with_metadata_file(mut self, name: impl Into<String>) -> Self {
        self.metadata_file = name.into();
        self
    }
}

#[async_trait]
impl ModelLoader for AssetLoader {
    async fn load(&self) -> Result<ModelHandle, LoadError> {
        tracing::info!(
            "Loading model from {}",
            self.source.locate(&self.model_file)
        );

        let (model_bytes, metadata_bytes) = futures::try_join!(
            self.source.fetch(&self.model_file),
            self.source.fetch(&self.metadata_file)
        )?;
        let metadata = ModelMetadata::from_slice(&self.metadata_file, &metadata_bytes)?;

        let runtime = self.runtime.clone();
        let build_metadata = metadata.clone();
        let classifier =
            tokio::task::spawn_blocking(move || runtime.build(model_bytes, &build_metadata))
                .await
                .map_err(|e| LoadError::model(format!("Model build task join error: {e}")))??;

        tracing::info!(
            "Model loaded: {} labels, {}x{} input",
            metadata.labels.len(),
            metadata.image_size,
            metadata.image_size
        );
        Ok(ModelHandle::new(classifier, metadata))
    }
}

/// Observable state of a [`ModelStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Idle,
    Loading,
    Ready,
    /// Last attempt failed; the next call retries
    Failed(LoadError),
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<ModelHandle>, LoadError>>>;

enum Slot {
    Idle,
    Loading(SharedLoad),
    Ready(Arc<ModelHandle>),
    Failed(LoadError),
}

/// Injectable, process-lifetime model cache
pub struct ModelStore {
    loader: Arc<dyn ModelLoader>,
    slot: Mutex<Slot>,
}

impl ModelStore {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self::from_loader(Arc::new(loader))
    }

    pub fn from_loader(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Resolve the shared model handle, loading it on first use
    pub async fn ensure_ready(&self) -> Result<Arc<ModelHandle>, LoadError> {
        let pending = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Ready(handle) => return Ok(handle.clone()),
                Slot::Loading(pending) => pending.clone(),
                Slot::Idle | Slot::Failed(_) => {
                    let loader = self.loader.clone();
                    let pending = async move { loader.load().await.map(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Slot::Loading(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut slot = self.slot.lock();
        if let Slot::Loading(current) = &*slot
            && current.ptr_eq(&pending)
        {
            *slot = match &result {
                Ok(handle) => Slot::Ready(handle.clone()),
                Err(e) => {
                    tracing::warn!("Model load failed, next request will retry: {}", e);
                    Slot::Failed(e.clone())
                }
            };
        }
        result
    }

    /// Start loading without caring about the handle
    pub async fn warm_up(&self) -> Result<(), LoadError> {
        self.ensure_ready().await.map(|_| ())
    }

    pub fn status(&self) -> ModelStatus {
        match &*self.slot.lock() {
            Slot::Idle => ModelStatus::Idle,
            Slot::Loading(_) => ModelStatus::Loading,
            Slot::Ready(_) => ModelStatus::Ready,
            Slot::Failed(e) => ModelStatus::Failed(e.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// The cached handle, if loading already finished
    pub fn cached(&self) -> Option<Arc<ModelHandle>> {
        match &*self.slot.lock() {
            Slot::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Drop the cached handle so the next call loads again.
    ///
    /// An in-flight load keeps running for its current awaiters but is not
    /// stored once it settles.
    pub fn reset(&self) {
        *self.slot.lock() = Slot::Idle;
    }
}

impl fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStore")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
