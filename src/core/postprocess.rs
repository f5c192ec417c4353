use crate::utils::error::{EtlError, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use serde::Serialize;

/// Band positions in the raw stack: B02, B03, B04, B08, B11, B12, SCL.
pub const BLUE: usize = 0;
pub const GREEN: usize = 1;
pub const RED: usize = 2;
pub const NIR: usize = 3;
pub const RAW_BAND_COUNT: usize = 7;

/// SCL classes treated as cloud: shadow, medium, high, cirrus.
pub const CLOUD_CLASSES: [u8; 4] = [3, 8, 9, 10];
pub const TRUE_COLOR_GAIN: f32 = 3.5;

fn band(stack: &Array3<f32>, index: usize) -> Result<ArrayView2<'_, f32>> {
    let bands = stack.dim().2;
    if index >= bands {
        return Err(EtlError::ProcessingError {
            message: format!("band {} requested from a {}-band stack", index, bands),
        });
    }
    Ok(stack.index_axis(Axis(2), index))
}

/// `(NIR - Red) / (NIR + Red)` clipped to `[-1, 1]`; NaN where the
/// denominator is zero or either input is not finite.
pub fn compute_ndvi(stack: &Array3<f32>) -> Result<Array2<f32>> {
    let red = band(stack, RED)?;
    let nir = band(stack, NIR)?;
    Ok(Zip::from(&red).and(&nir).map_collect(|&r, &n| {
        let denom = n + r;
        if !r.is_finite() || !n.is_finite() || denom == 0.0 || !denom.is_finite() {
            f32::NAN
        } else {
            ((n - r) / denom).clamp(-1.0, 1.0)
        }
    }))
}

/// Cloud mask from the SCL band (last band), `None` for stacks without one.
pub fn cloud_mask(stack: &Array3<f32>) -> Option<Array2<bool>> {
    let bands = stack.dim().2;
    if bands < RAW_BAND_COUNT {
        return None;
    }
    let scl = stack.index_axis(Axis(2), bands - 1);
    Some(scl.mapv(|v| v.is_finite() && CLOUD_CLASSES.contains(&(v.round() as u8))))
}

pub fn apply_cloud_mask(ndvi: &Array2<f32>, mask: &Array2<bool>) -> Result<Array2<f32>> {
    if ndvi.dim() != mask.dim() {
        return Err(EtlError::ProcessingError {
            message: format!(
                "cloud mask {:?} does not match NDVI {:?}",
                mask.dim(),
                ndvi.dim()
            ),
        });
    }
    Ok(Zip::from(ndvi)
        .and(mask)
        .map_collect(|&v, &cloudy| if cloudy { f32::NAN } else { v }))
}

/// `(B04, B03, B02) * gain`, clipped to `[0, 1]`. Non-finite inputs become 0.
pub fn rasterize_true_color(stack: &Array3<f32>) -> Result<Array3<f32>> {
    let rgb = ndarray::stack(
        Axis(2),
        &[band(stack, RED)?, band(stack, GREEN)?, band(stack, BLUE)?],
    )?;
    Ok(rgb.mapv(|v| {
        if v.is_finite() {
            (v * TRUE_COLOR_GAIN).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NdviStats {
    pub valid_pixels: usize,
    pub total_pixels: usize,
    pub mean: Option<f64>,
    pub min: Option<f32>,
    pub max: Option<f32>,
}

/// Statistics over the finite pixels.
pub fn ndvi_stats(ndvi: &Array2<f32>) -> NdviStats {
    let mut valid = 0usize;
    let mut sum = 0.0f64;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in ndvi.iter().filter(|v| v.is_finite()) {
        valid += 1;
        sum += v as f64;
        min = min.min(v);
        max = max.max(v);
    }
    NdviStats {
        valid_pixels: valid,
        total_pixels: ndvi.len(),
        mean: (valid > 0).then(|| sum / valid as f64),
        min: (valid > 0).then_some(min),
        max: (valid > 0).then_some(max),
    }
}
