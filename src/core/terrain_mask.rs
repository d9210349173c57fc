use crate::core::raster::{Mask, Raster};
use crate::core::terrain::{convolve, curvature, gaussian_kernel, slope_aspect};
use crate::types::{SiError, SiResult};
use serde::{Deserialize, Serialize};

/// Parameters for the static terrain exclusion mask
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainMaskParams {
    /// Keep hillslopes at or above this angle (degrees)
    pub slope_threshold_deg: f32,
    /// Keep curvature at or above this value (m/m²); negative values are peaks
    pub curvature_threshold: f32,
    /// Re-include concave terrain at or above this curvature (m/m²)
    pub valley_threshold: f32,
    /// Gaussian smoothing radius (metres)
    pub smoothing_radius_m: f64,
    /// Gaussian smoothing sigma (metres)
    pub smoothing_sigma_m: f64,
}

impl Default for TerrainMaskParams {
    fn default() -> Self {
        Self {
            slope_threshold_deg: 5.0,
            curvature_threshold: -0.005,
            valley_threshold: 0.003,
            smoothing_radius_m: 60.0,
            smoothing_sigma_m: 30.0,
        }
    }
}

/// Elevation and surface-water classification on a common grid
#[derive(Debug, Clone)]
pub struct ElevationModel {
    pub elevation: Raster,
    /// Surface water body classification, 0 = land
    pub water_body: Raster,
}

impl ElevationModel {
    pub fn new(elevation: Raster, water_body: Raster) -> SiResult<Self> {
        elevation
            .grid()
            .ensure_aligned(water_body.grid(), "elevation/water body bands")?;
        Ok(Self {
            elevation,
            water_body,
        })
    }

    /// Elevation-only model where every pixel is land
    pub fn land_only(elevation: Raster) -> Self {
        let water_body = Raster::constant(*elevation.grid(), 0.0);
        Self {
            elevation,
            water_body,
        }
    }
}

/// Pixel counts of each mask component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerrainMaskStats {
    pub total_pixels: usize,
    pub land_pixels: usize,
    pub steep_pixels: usize,
    pub valley_pixels: usize,
    pub below_curvature_pixels: usize,
    pub valid_pixels: usize,
}

/// Mask together with the intermediate products it was built from
#[derive(Debug, Clone)]
pub struct TerrainMaskResult {
    pub mask: Mask,
    pub slope_deg: Raster,
    pub curvature: Raster,
    pub stats: TerrainMaskStats,
}

/// Builds the land / slope / curvature mask from an elevation model
pub struct TerrainMaskBuilder {
    params: TerrainMaskParams,
}

impl TerrainMaskBuilder {
    pub fn new(params: TerrainMaskParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(TerrainMaskParams::default())
    }

    pub fn params(&self) -> &TerrainMaskParams {
        &self.params
    }

    /// Build the mask: land × (steep OR valley) × not-too-convex
    pub fn build(&self, model: &ElevationModel) -> SiResult<TerrainMaskResult> {
        let p = &self.params;
        if p.curvature_threshold > p.valley_threshold {
            log::warn!(
                "Curvature threshold {} exceeds valley threshold {}; valleys can never be re-included",
                p.curvature_threshold,
                p.valley_threshold
            );
        }
        log::info!("Building terrain mask");
        log::debug!("Terrain mask parameters: {:?}", p);

        let water_mask = model.water_body.threshold(|v| v == 0.0);

        let slope_deg = slope_aspect(&model.elevation)?.slope.map(f32::to_degrees);
        let slope_mask = slope_deg.threshold(|s| s >= p.slope_threshold_deg);

        let spacing = model.elevation.grid().pixel_spacing_m();
        let kernel = gaussian_kernel(p.smoothing_radius_m, p.smoothing_sigma_m, spacing)?;
        let smoothed = convolve(&model.elevation, &kernel)?;
        let curv = curvature(&smoothed)?;

        let curvature_mask = curv.threshold(|c| c >= p.curvature_threshold);
        let valley_mask = curv.threshold(|c| c >= p.valley_threshold);

        let mask = water_mask
            .and(&slope_mask.or(&valley_mask)?)?
            .and(&curvature_mask)?;

        let stats = TerrainMaskStats {
            total_pixels: mask.data().len(),
            land_pixels: water_mask.count(),
            steep_pixels: slope_mask.count(),
            valley_pixels: valley_mask.count(),
            below_curvature_pixels: curvature_mask.not().count(),
            valid_pixels: mask.count(),
        };
        log::info!(
            "Terrain mask keeps {} of {} pixels ({:.1}%)",
            stats.valid_pixels,
            stats.total_pixels,
            100.0 * mask.coverage()
        );

        Ok(TerrainMaskResult {
            mask,
            slope_deg,
            curvature: curv,
            stats,
        })
    }
}

impl TerrainMaskParams {
    pub fn validate(&self) -> SiResult<()> {
        if !(0.0..=90.0).contains(&self.slope_threshold_deg) {
            return Err(SiError::Config(format!(
                "Slope threshold must be within [0, 90] degrees, got {}",
                self.slope_threshold_deg
            )));
        }
        if self.smoothing_radius_m <= 0.0 || self.smoothing_sigma_m <= 0.0 {
            return Err(SiError::Config(
                "Smoothing radius and sigma must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
