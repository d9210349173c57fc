use crate::core::raster::{Mask, Raster};
use crate::types::{SiError, SiResult};
use ndarray::{Array2, Zip};
use num_traits::Float;

/// Upper/lower percentile reduction of one raster over a reference region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileStats {
    /// Requested upper percentile (0-100)
    pub upper: f64,
    /// Requested lower percentile (0-100)
    pub lower: f64,
    pub upper_value: f32,
    pub lower_value: f32,
    /// Number of valid samples reduced
    pub count: usize,
}

/// Percentile of sorted samples with linear interpolation between order statistics
fn percentile_of_sorted<T: Float>(sorted: &[T], p: f64) -> T {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = T::from(rank - lo as f64).unwrap_or_else(T::zero);
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Reduce the valid samples of `raster` inside `region` to two percentiles
pub fn percentiles(raster: &Raster, region: &Mask, upper: f64, lower: f64) -> SiResult<PercentileStats> {
    raster.grid().ensure_aligned(region.grid(), "percentile region")?;

    let mut samples: Vec<f64> = raster
        .data()
        .iter()
        .zip(region.data().iter())
        .filter(|(v, &m)| m != 0 && !v.is_nan())
        .map(|(&v, _)| v as f64)
        .collect();

    if samples.is_empty() {
        return Err(SiError::EmptyReduction(
            "No valid samples inside the reference region".to_string(),
        ));
    }
    samples.sort_by(|a, b| a.total_cmp(b));

    Ok(PercentileStats {
        upper,
        lower,
        upper_value: percentile_of_sorted(&samples, upper) as f32,
        lower_value: percentile_of_sorted(&samples, lower) as f32,
        count: samples.len(),
    })
}

/// Pixelwise mean over a stack of aligned rasters, ignoring `NaN`
///
/// A pixel with no valid sample in any layer stays `NaN`.
pub fn nan_mean(stack: &[Raster]) -> SiResult<Raster> {
    let first = stack
        .first()
        .ok_or_else(|| SiError::EmptyReduction("Mean of an empty raster stack".to_string()))?;
    let grid = *first.grid();

    let mut sum = Array2::<f64>::zeros(grid.shape());
    let mut count = Array2::<u32>::zeros(grid.shape());
    for layer in stack {
        grid.ensure_aligned(layer.grid(), "mean stack")?;
        Zip::from(&mut sum)
            .and(&mut count)
            .and(layer.data())
            .par_for_each(|s, c, &v| {
                if !v.is_nan() {
                    *s += v as f64;
                    *c += 1;
                }
            });
    }

    let mut mean = Array2::<f32>::from_elem(grid.shape(), f32::NAN);
    Zip::from(&mut mean)
        .and(&sum)
        .and(&count)
        .par_for_each(|m, &s, &c| {
            if c > 0 {
                *m = (s / c as f64) as f32;
            }
        });

    Raster::new(grid, mean)
}
