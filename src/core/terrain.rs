use crate::core::raster::Raster;
use crate::types::{SiError, SiResult};
use ndarray::{Array2, Zip};
use std::f32::consts::PI;

/// First derivatives of a surface in metres per metre
#[derive(Debug, Clone)]
pub struct Gradient {
    /// d/dx, positive towards east
    pub x: Raster,
    /// d/dy, positive towards north
    pub y: Raster,
}

/// Slope and aspect in radians
#[derive(Debug, Clone)]
pub struct SlopeAspect {
    pub slope: Raster,
    /// Azimuth of the downslope direction, 0 = north, clockwise, in [0, 2π)
    pub aspect: Raster,
}

/// Compute x/y gradients using central differences
///
/// Border pixels use one-sided differences. `NaN` neighbours propagate.
pub fn gradient(surface: &Raster) -> SiResult<Gradient> {
    let (rows, cols) = surface.data().dim();
    if rows < 2 || cols < 2 {
        return Err(SiError::Processing(format!(
            "Raster too small for gradient computation: {}x{}",
            rows, cols
        )));
    }

    let (dx_scale, dy_scale) = surface.grid().pixel_spacing_m();
    let (dx_scale, dy_scale) = (dx_scale as f32, dy_scale as f32);
    let z = surface.data();

    let mut gx = Array2::<f32>::zeros((rows, cols));
    let mut gy = Array2::<f32>::zeros((rows, cols));

    Zip::indexed(&mut gx).and(&mut gy).par_for_each(|(i, j), gx, gy| {
        let (j0, j1) = (j.saturating_sub(1), (j + 1).min(cols - 1));
        let (i0, i1) = (i.saturating_sub(1), (i + 1).min(rows - 1));

        *gx = (z[[i, j1]] - z[[i, j0]]) / ((j1 - j0) as f32 * dx_scale);
        // Rows increase southward
        *gy = (z[[i0, j]] - z[[i1, j]]) / ((i1 - i0) as f32 * dy_scale);
    });

    Ok(Gradient {
        x: Raster::new(*surface.grid(), gx)?,
        y: Raster::new(*surface.grid(), gy)?,
    })
}

/// Compute slope and aspect from an elevation surface
pub fn slope_aspect(surface: &Raster) -> SiResult<SlopeAspect> {
    let grad = gradient(surface)?;

    let mut slope = Array2::<f32>::zeros(surface.data().dim());
    let mut aspect = Array2::<f32>::zeros(surface.data().dim());

    Zip::from(&mut slope)
        .and(&mut aspect)
        .and(grad.x.data())
        .and(grad.y.data())
        .par_for_each(|s, a, &dz_dx, &dz_dy| {
            *s = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan();
            *a = downslope_azimuth(dz_dx, dz_dy);
        });

    Ok(SlopeAspect {
        slope: Raster::new(*surface.grid(), slope)?,
        aspect: Raster::new(*surface.grid(), aspect)?,
    })
}

/// Azimuth of steepest descent for the given east/north gradients
fn downslope_azimuth(dz_dx: f32, dz_dy: f32) -> f32 {
    if dz_dx.is_nan() || dz_dy.is_nan() {
        return f32::NAN;
    }
    if dz_dx == 0.0 && dz_dy == 0.0 {
        return 0.0;
    }
    let azimuth = (-dz_dx).atan2(-dz_dy);
    if azimuth < 0.0 {
        azimuth + 2.0 * PI
    } else {
        azimuth
    }
}

/// Normalized Gaussian kernel with radius and sigma in ground metres
pub fn gaussian_kernel(radius_m: f64, sigma_m: f64, pixel_spacing: (f64, f64)) -> SiResult<Array2<f32>> {
    if radius_m <= 0.0 || sigma_m <= 0.0 {
        return Err(SiError::Config(format!(
            "Gaussian radius and sigma must be positive (radius={}, sigma={})",
            radius_m, sigma_m
        )));
    }
    let (sx, sy) = pixel_spacing;
    let half_x = (radius_m / sx).floor() as usize;
    let half_y = (radius_m / sy).floor() as usize;

    let mut kernel = Array2::<f32>::zeros((2 * half_y + 1, 2 * half_x + 1));
    for ((i, j), w) in kernel.indexed_iter_mut() {
        let dy = (i as f64 - half_y as f64) * sy;
        let dx = (j as f64 - half_x as f64) * sx;
        *w = (-(dx * dx + dy * dy) / (2.0 * sigma_m * sigma_m)).exp() as f32;
    }

    let total: f32 = kernel.sum();
    kernel.mapv_inplace(|w| w / total);
    Ok(kernel)
}

/// Convolve with a kernel, renormalizing over valid in-bounds neighbours
pub fn convolve(surface: &Raster, kernel: &Array2<f32>) -> SiResult<Raster> {
    let (rows, cols) = surface.data().dim();
    let (krows, kcols) = kernel.dim();
    let (half_y, half_x) = (krows / 2, kcols / 2);
    let z = surface.data();

    let mut out = Array2::<f32>::from_elem((rows, cols), f32::NAN);
    Zip::indexed(&mut out).par_for_each(|(i, j), o| {
        let mut sum = 0.0f64;
        let mut weight = 0.0f64;
        for ki in 0..krows {
            let ii = i as isize + ki as isize - half_y as isize;
            if ii < 0 || ii >= rows as isize {
                continue;
            }
            for kj in 0..kcols {
                let jj = j as isize + kj as isize - half_x as isize;
                if jj < 0 || jj >= cols as isize {
                    continue;
                }
                let v = z[[ii as usize, jj as usize]];
                if v.is_nan() {
                    continue;
                }
                let w = kernel[[ki, kj]] as f64;
                sum += w * v as f64;
                weight += w;
            }
        }
        if weight > 0.0 {
            *o = (sum / weight) as f32;
        }
    });

    Raster::new(*surface.grid(), out)
}

/// Sum of second partials along x and y (negative over peaks, positive over valleys)
pub fn curvature(surface: &Raster) -> SiResult<Raster> {
    let first = gradient(surface)?;
    let dxx = gradient(&first.x)?.x;
    let dyy = gradient(&first.y)?.y;
    dxx.zip_with(&dyy, |a, b| a + b)
}
