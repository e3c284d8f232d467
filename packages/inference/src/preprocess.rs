//! Image preprocessing
//!
//! Decode -> resize (no crop) -> drop alpha -> normalize -> add batch dim.
//! The order and every constant come from [`InputSpec`], which is read from
//! the model metadata, so preprocessing always matches the exported model.

use crate::error::{ScanError, ScanResult};
use crate::metadata::{InputSpec, Interpolation};
use crate::tensor::{AllocationTracker, InputTensor};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;

/// Decode JPEG/PNG (or any format the `image` crate recognises)
pub fn decode(bytes: &[u8]) -> ScanResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(ScanError::decode("image is empty"));
    }
    image::load_from_memory(bytes).map_err(ScanError::decode_with_source)
}

/// Turn raw image bytes into a model-ready `[1, H, W, 3]` tensor
pub fn preprocess(
    bytes: &[u8],
    spec: &InputSpec,
    tracker: &AllocationTracker,
) -> ScanResult<InputTensor> {
    let image = decode(bytes)?;
    tracing::debug!(
        "Decoded {}x{} image ({:?})",
        image.width(),
        image.height(),
        image.color()
    );
    to_input_tensor(&image, spec, tracker)
}

/// Resize, strip alpha and normalize an already decoded image
pub fn to_input_tensor(
    image: &DynamicImage,
    spec: &InputSpec,
    tracker: &AllocationTracker,
) -> ScanResult<InputTensor> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ScanError::decode("image has no pixels"));
    }
    let rgb = image.to_rgb8();
    let cols = axis_taps(rgb.width(), spec.size, spec.interpolation);
    let rows = axis_taps(rgb.height(), spec.size, spec.interpolation);

    let lease = tracker.lease();
    let side = spec.size as usize;
    let data = Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
        let value = sample(&rgb, rows[y], cols[x], c);
        spec.normalization.apply(value)
    });
    Ok(InputTensor::new(data, lease))
}

/// Source coordinate of one output pixel along one axis
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    lo: u32,
    hi: u32,
    /// Weight of `hi`
    frac: f32,
}

/// `src = dst * input / output`, computed exactly in integers so the
/// nearest pick is `floor` with no float drift
fn axis_taps(input: u32, output: u32, interpolation: Interpolation) -> Vec<Tap> {
    let last = input.saturating_sub(1);
    (0..output)
        .map(|dst| {
            let scaled = dst as u64 * input as u64;
            let lo = ((scaled / output as u64) as u32).min(last);
            let rem = scaled % output as u64;
            match interpolation {
                Interpolation::Nearest => Tap {
                    lo,
                    hi: lo,
                    frac: 0.0,
                },
                Interpolation::Bilinear => Tap {
                    lo,
                    hi: (lo + 1).min(last),
                    frac: (rem as f64 / output as f64) as f32,
                },
            }
        })
        .collect()
}

fn sample(rgb: &RgbImage, row: Tap, col: Tap, channel: usize) -> f32 {
    let at = |x: u32, y: u32| rgb.get_pixel(x, y)[channel] as f32;
    let top = lerp(at(col.lo, row.lo), at(col.hi, row.lo), col.frac);
    let bottom = lerp(at(col.lo, row.hi), at(col.hi, row.hi), col.frac);
    lerp(top, bottom, row.frac)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
