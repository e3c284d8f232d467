//! Scoped tensor ownership
//!
//! Every tensor allocated by the pipeline holds a [`TensorLease`]. The lease
//! decrements its tracker when dropped, so any exit path (success, `?`, panic
//! unwinding, a dropped future) releases it. Tests read
//! [`AllocationTracker::live`] to check nothing outlived its stage.

use ndarray::{Array4, ArrayView4};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts tensors that are currently alive
#[derive(Debug, Clone, Default)]
pub struct AllocationTracker {
    live: Arc<AtomicUsize>,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn lease(&self) -> TensorLease {
        self.live.fetch_add(1, Ordering::AcqRel);
        TensorLease {
            live: self.live.clone(),
        }
    }
}

/// Released on drop
#[derive(Debug)]
pub struct TensorLease {
    live: Arc<AtomicUsize>,
}

impl TensorLease {
    /// A second lease on the same tracker
    pub fn sibling(&self) -> TensorLease {
        self.live.fetch_add(1, Ordering::AcqRel);
        TensorLease {
            live: self.live.clone(),
        }
    }
}

impl Drop for TensorLease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Model input in `[1, H, W, 3]` layout
#[derive(Debug)]
pub struct InputTensor {
    data: Array4<f32>,
    lease: TensorLease,
}

impl InputTensor {
    pub fn new(data: Array4<f32>, lease: TensorLease) -> Self {
        Self { data, lease }
    }

    /// `[batch, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        let dims = self.data.dim();
        [dims.0, dims.1, dims.2, dims.3]
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Row-major data, `None` if the array is not contiguous
    pub fn as_slice(&self) -> Option<&[f32]> {
        self.data.as_slice()
    }

    pub fn lease(&self) -> &TensorLease {
        &self.lease
    }
}

/// Raw per-class scores extracted from the model output
#[derive(Debug)]
pub struct OutputScores {
    values: Vec<f32>,
    _lease: TensorLease,
}

impl OutputScores {
    pub fn new(values: Vec<f32>, lease: TensorLease) -> Self {
        Self {
            values,
            _lease: lease,
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Hand the scores to the caller and release the lease
    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }
}
