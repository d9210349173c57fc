//! Euclidean distance transform and mask erosion

use crate::core::raster::{Mask, Raster};
use crate::types::SiResult;
use ndarray::Array2;

// Neighbour offsets: the first four are visited on the forward pass, the
// last four on the backward pass
const D_COL: [isize; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];
const D_ROW: [isize; 8] = [0, -1, -1, -1, 0, 1, 1, 1];
const G_COL: [f64; 8] = [1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0];
const G_ROW: [f64; 8] = [0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0];

/// Squared distance, in pixels, from each cell to the nearest feature cell
///
/// Two-pass vector propagation. Cells with no feature anywhere in the grid
/// stay at `f64::INFINITY`.
pub fn squared_distance_to_features(features: &Array2<bool>) -> Array2<f64> {
    let (rows, cols) = features.dim();
    let mut dist = features.mapv(|f| if f { 0.0 } else { f64::INFINITY });
    let mut r_col = Array2::<f64>::zeros((rows, cols));
    let mut r_row = Array2::<f64>::zeros((rows, cols));

    let mut relax = |row: usize, col: usize, neighbours: std::ops::Range<usize>,
                     dist: &mut Array2<f64>| {
        let z = dist[[row, col]];
        if z == 0.0 {
            return;
        }
        let mut z_min = f64::INFINITY;
        let mut which = None;
        for n in neighbours {
            let y = row as isize + D_ROW[n];
            let x = col as isize + D_COL[n];
            if y < 0 || x < 0 || y >= rows as isize || x >= cols as isize {
                continue;
            }
            let (y, x) = (y as usize, x as usize);
            let z2 = dist[[y, x]];
            if z2.is_infinite() {
                continue;
            }
            let h = if G_COL[n] == 0.0 {
                2.0 * r_row[[y, x]] + 1.0
            } else if G_ROW[n] == 0.0 {
                2.0 * r_col[[y, x]] + 1.0
            } else {
                2.0 * (r_col[[y, x]] + r_row[[y, x]] + 1.0)
            };
            if z2 + h < z_min {
                z_min = z2 + h;
                which = Some((n, y, x));
            }
        }
        if let Some((n, y, x)) = which {
            if z_min < z {
                dist[[row, col]] = z_min;
                r_col[[row, col]] = r_col[[y, x]] + G_COL[n];
                r_row[[row, col]] = r_row[[y, x]] + G_ROW[n];
            }
        }
    };

    for row in 0..rows {
        for col in 0..cols {
            relax(row, col, 0..4, &mut dist);
        }
    }
    for row in (0..rows).rev() {
        for col in (0..cols).rev() {
            relax(row, col, 4..8, &mut dist);
        }
    }

    dist
}

/// Ground distance in metres from each pixel to the nearest invalid (0) pixel of `mask`
///
/// Pixel distances are scaled by the square root of the pixel area.
pub fn distance_to_invalid(mask: &Mask) -> SiResult<Raster> {
    let features = mask.data().mapv(|v| v == 0);
    let scale = mask.grid().pixel_area_m2().sqrt();
    let dist = squared_distance_to_features(&features).mapv(|d| (d.sqrt() * scale) as f32);
    Raster::new(*mask.grid(), dist)
}

/// Shrink the valid region: keep only pixels farther than `distance_m` from any invalid pixel
pub fn erode(mask: &Mask, distance_m: f64) -> SiResult<Mask> {
    if distance_m <= 0.0 {
        return Ok(mask.clone());
    }
    log::debug!("Eroding mask by {:.1} m", distance_m);
    let dist = distance_to_invalid(mask)?;
    let far = dist.threshold(|d| d as f64 > distance_m);
    mask.and(&far)
}
