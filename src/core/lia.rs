use crate::core::collection::Scene;
use crate::core::distance::erode;
use crate::core::raster::{Mask, Raster, RasterGrid};
use crate::core::terrain::slope_aspect;
use crate::core::terrain_mask::ElevationModel;
use crate::types::{SiError, SiResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Band name of the local incidence angle output (degrees)
pub const LIA_BAND: &str = "LIA";

/// Band name of the layover/shadow validity mask output
pub const NO_DATA_MASK_BAND: &str = "no_data_mask";

/// Parameters for local incidence angle computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiaParams {
    /// Erode the valid region by this ground distance (metres), 0 disables
    pub buffer_m: f64,
    /// Name of the per-pixel viewing angle band (degrees)
    pub angle_band: String,
}

impl Default for LiaParams {
    fn default() -> Self {
        Self {
            buffer_m: 0.0,
            angle_band: "angle".to_string(),
        }
    }
}

/// Output of correcting one scene
#[derive(Debug, Clone)]
pub struct LiaResult {
    /// Input scene plus `LIA` and `no_data_mask` bands
    pub scene: Scene,
    /// Ground-to-sensor azimuth used, degrees clockwise from north
    pub heading_deg: f64,
    pub layover_pixels: usize,
    pub shadow_pixels: usize,
    pub valid_pixels: usize,
}

/// Terrain slope and aspect (radians) on a given grid
#[derive(Debug, Clone)]
struct TerrainGeometry {
    slope: Raster,
    aspect: Raster,
}

impl TerrainGeometry {
    /// Resample onto `target`; aspect goes through its sine/cosine to avoid wrap-around
    fn resample(&self, target: &RasterGrid) -> SiResult<TerrainGeometry> {
        if self.slope.grid().is_aligned_with(target) {
            return Ok(self.clone());
        }
        log::debug!("Resampling terrain geometry onto scene grid");
        let slope = self.slope.resample_bilinear(target)?;
        let sin = self.aspect.map(f32::sin).resample_bilinear(target)?;
        let cos = self.aspect.map(f32::cos).resample_bilinear(target)?;
        let aspect = sin.zip_with(&cos, |s, c| {
            let a = s.atan2(c);
            if a < 0.0 {
                a + 2.0 * PI
            } else {
                a
            }
        })?;
        Ok(TerrainGeometry { slope, aspect })
    }
}

/// Local incidence angle and layover/shadow mask processor
pub struct LiaCorrector {
    params: LiaParams,
    terrain: TerrainGeometry,
}

impl LiaCorrector {
    /// Create a corrector; slope and aspect are derived once from the elevation model
    pub fn new(params: LiaParams, elevation: &ElevationModel) -> SiResult<Self> {
        if params.buffer_m < 0.0 {
            return Err(SiError::Config(format!(
                "LIA buffer must be non-negative, got {}",
                params.buffer_m
            )));
        }
        log::debug!("Computing terrain slope and aspect for LIA correction");
        let sa = slope_aspect(&elevation.elevation)?;
        Ok(Self {
            params,
            terrain: TerrainGeometry {
                slope: sa.slope,
                aspect: sa.aspect,
            },
        })
    }

    pub fn standard(elevation: &ElevationModel) -> SiResult<Self> {
        Self::new(LiaParams::default(), elevation)
    }

    pub fn params(&self) -> &LiaParams {
        &self.params
    }

    /// Corrector with its terrain geometry already resampled onto `grid`
    pub fn on_grid(&self, grid: &RasterGrid) -> SiResult<LiaCorrector> {
        Ok(LiaCorrector {
            params: self.params.clone(),
            terrain: self.terrain.resample(grid)?,
        })
    }

    /// Estimate the look heading as the mean aspect (degrees) of the viewing angle band
    ///
    /// The angle falls towards near range, so its downslope azimuth points from
    /// the ground to the sensor. Pixels where the angle surface is flat carry no
    /// direction and are ignored.
    pub fn estimate_heading(angle: &Raster) -> SiResult<f64> {
        let sa = slope_aspect(angle)?;
        let (sum, count) = sa
            .slope
            .data()
            .iter()
            .zip(sa.aspect.data().iter())
            .filter(|(s, a)| s.is_finite() && **s > 0.0 && a.is_finite())
            .fold((0.0f64, 0usize), |(sum, n), (_, &a)| {
                (sum + (a as f64).to_degrees(), n + 1)
            });
        if count == 0 {
            return Err(SiError::EmptyReduction(
                "Viewing angle band has no gradient to derive a heading from".to_string(),
            ));
        }
        Ok(sum / count as f64)
    }

    /// Azimuth from ground to sensor for a right-looking platform with the given heading
    pub fn look_azimuth_from_heading(platform_heading_deg: f64) -> f64 {
        (platform_heading_deg + 270.0).rem_euclid(360.0)
    }

    fn heading_for(&self, scene: &Scene, angle: &Raster) -> SiResult<f64> {
        match Self::estimate_heading(angle) {
            Ok(h) => Ok(h),
            Err(e) => match scene.metadata().heading_deg {
                Some(platform) => {
                    let h = Self::look_azimuth_from_heading(platform);
                    log::debug!(
                        "Scene {}: {}; using metadata platform heading {:.2}° (look azimuth {:.2}°)",
                        scene.id(),
                        e,
                        platform,
                        h
                    );
                    Ok(h)
                }
                None => Err(e),
            },
        }
    }

    /// Compute LIA and the layover/shadow mask for one scene
    pub fn correct(&self, scene: &Scene) -> SiResult<LiaResult> {
        log::debug!("Computing local incidence angle for scene {}", scene.id());
        let angle = scene.band(&self.params.angle_band)?;

        // Step 1: look heading
        let heading_deg = self.heading_for(scene, angle)?;
        let phi_i = (heading_deg as f32).to_radians();

        // Step 2: terrain geometry on the scene grid
        let terrain = self.terrain.resample(scene.grid())?;

        // Steps 3-5: range-projected slope, LIA and masks
        let shape = scene.grid().shape();
        let mut lia = Array2::<f32>::from_elem(shape, f32::NAN);
        let mut no_layover = Array2::<u8>::zeros(shape);
        let mut no_shadow = Array2::<u8>::zeros(shape);

        Zip::from(&mut lia)
            .and(&mut no_layover)
            .and(&mut no_shadow)
            .and(angle.data())
            .and(terrain.slope.data())
            .and(terrain.aspect.data())
            .par_for_each(|lia, no_layover, no_shadow, &theta_deg, &alpha_s, &phi_s| {
                if theta_deg.is_nan() || alpha_s.is_nan() || phi_s.is_nan() {
                    return;
                }
                let theta_i = theta_deg.to_radians();
                let phi_r = phi_i - phi_s;
                let alpha_r = (alpha_s.tan() * phi_r.cos()).atan();

                *lia = (theta_i - alpha_r).to_degrees();
                // Foreslope steeper than the viewing angle folds over
                *no_layover = u8::from(alpha_r < theta_i);
                // Backslope steeper than the grazing angle is hidden from the sensor
                *no_shadow = u8::from(alpha_r > -(FRAC_PI_2 - theta_i));
            });

        let grid = *scene.grid();
        let layover_pixels = no_layover.iter().zip(lia.iter()).filter(|(&m, l)| m == 0 && !l.is_nan()).count();
        let shadow_pixels = no_shadow.iter().zip(lia.iter()).filter(|(&m, l)| m == 0 && !l.is_nan()).count();

        let mask = Mask::new(grid, no_layover)?.and(&Mask::new(grid, no_shadow)?)?;

        // Step 6: optional inward buffer
        let mask = erode(&mask, self.params.buffer_m)?;
        let valid_pixels = mask.count();

        log::debug!(
            "Scene {}: heading {:.2}°, {} layover, {} shadow, {} valid pixels",
            scene.id(),
            heading_deg,
            layover_pixels,
            shadow_pixels,
            valid_pixels
        );

        let scene = scene.add_bands(vec![
            (LIA_BAND.to_string(), Raster::new(grid, lia)?),
            (NO_DATA_MASK_BAND.to_string(), mask.to_raster()),
        ])?;

        Ok(LiaResult {
            scene,
            heading_deg,
            layover_pixels,
            shadow_pixels,
            valid_pixels,
        })
    }

    /// Scene with `LIA` and `no_data_mask` bands added
    pub fn apply(&self, scene: &Scene) -> SiResult<Scene> {
        self.correct(scene).map(|r| r.scene)
    }
}

/// Read a `no_data_mask` band back as a binary mask
pub fn no_data_mask(scene: &Scene) -> SiResult<Mask> {
    Ok(scene.band(NO_DATA_MASK_BAND)?.threshold(|v| v != 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collection::tests::{metadata, test_grid};
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;

    fn flat_model() -> ElevationModel {
        ElevationModel::land_only(Raster::constant(test_grid(), 50.0))
    }

    fn angle_scene(theta: f32, heading: Option<f64>) -> Scene {
        let mut meta = metadata("s1", 1, 39);
        meta.heading_deg = heading;
        Scene::new(
            meta,
            vec![
                ("VH".to_string(), Raster::constant(test_grid(), -15.0)),
                ("angle".to_string(), Raster::constant(test_grid(), theta)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_flat_terrain_lia_equals_viewing_angle() {
        let corrector = LiaCorrector::standard(&flat_model()).unwrap();
        let result = corrector.correct(&angle_scene(30.0, Some(100.0))).unwrap();
        let lia = result.scene.band(LIA_BAND).unwrap();
        assert!(lia.data().iter().all(|&v| (v - 30.0).abs() < 1e-4));
        assert_eq!(result.valid_pixels, 16);
        assert_eq!(result.scene.metadata(), angle_scene(30.0, Some(100.0)).metadata());
    }

    #[test]
    fn test_missing_heading_is_recoverable() {
        let corrector = LiaCorrector::standard(&flat_model()).unwrap();
        let err = corrector.correct(&angle_scene(30.0, None)).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_heading_from_angle_gradient() {
        // Angle increases towards east, so it decreases (faces) towards west: 270°
        let mut data = Array2::<f32>::zeros((4, 4));
        for ((_, j), v) in data.indexed_iter_mut() {
            *v = 30.0 + j as f32 * 0.01;
        }
        let angle = Raster::new(test_grid(), data).unwrap();
        let heading = LiaCorrector::estimate_heading(&angle).unwrap();
        assert_relative_eq!(heading, 270.0, epsilon = 1e-3);
    }

    fn ramp_model(rise_per_m: f32) -> ElevationModel {
        let grid = RasterGrid::new(GeoTransform::north_up(0.0, 100.0, 10.0), 32654, 10, 10);
        let mut data = Array2::<f32>::zeros((10, 10));
        for ((_, j), v) in data.indexed_iter_mut() {
            *v = j as f32 * 10.0 * rise_per_m;
        }
        ElevationModel::land_only(Raster::new(grid, data).unwrap())
    }

    /// Flat angle band, so the look direction comes from the platform heading
    fn ramp_scene(theta: f32, platform_heading: f64) -> Scene {
        let grid = RasterGrid::new(GeoTransform::north_up(0.0, 100.0, 10.0), 32654, 10, 10);
        let mut meta = metadata("ramp", 1, 39);
        meta.heading_deg = Some(platform_heading);
        Scene::new(meta, vec![("angle".to_string(), Raster::constant(grid, theta))]).unwrap()
    }

    #[test]
    fn test_foreslope_layover_masked() {
        // 60° slope facing west, northbound platform looking east from the west
        let model = ramp_model(60f32.to_radians().tan());
        let corrector = LiaCorrector::standard(&model).unwrap();
        let result = corrector.correct(&ramp_scene(35.0, 0.0)).unwrap();
        assert_eq!(result.valid_pixels, 0);
        assert_eq!(result.layover_pixels, 100);
        let lia = result.scene.band(LIA_BAND).unwrap();
        assert_relative_eq!(lia.get(5, 5), -25.0, epsilon = 1e-3);
    }

    #[test]
    fn test_backslope_shadow_masked() {
        // Same slope seen by a southbound platform from the east is a steep backslope
        let model = ramp_model(70f32.to_radians().tan());
        let corrector = LiaCorrector::standard(&model).unwrap();
        let result = corrector.correct(&ramp_scene(35.0, 180.0)).unwrap();
        assert_eq!(result.shadow_pixels, 100);
        assert_eq!(result.layover_pixels, 0);
        assert_eq!(result.valid_pixels, 0);
    }

    #[test]
    fn test_gentle_slope_valid() {
        let model = ramp_model(10f32.to_radians().tan());
        let corrector = LiaCorrector::standard(&model).unwrap();
        let result = corrector.correct(&ramp_scene(35.0, 0.0)).unwrap();
        assert_eq!(result.valid_pixels, 100);
        let lia = result.scene.band(LIA_BAND).unwrap();
        assert_relative_eq!(lia.get(5, 5), 25.0, epsilon = 1e-3);
    }

    #[test]
    fn test_platform_heading_matches_angle_band_direction() {
        assert_relative_eq!(LiaCorrector::look_azimuth_from_heading(0.0), 270.0);
        assert_relative_eq!(LiaCorrector::look_azimuth_from_heading(190.0), 100.0);
        assert_relative_eq!(LiaCorrector::look_azimuth_from_heading(350.0), 260.0);

        // Same slope, looked at once via a graded angle band and once via metadata
        let model = ramp_model(30f32.to_radians().tan());
        let corrector = LiaCorrector::standard(&model).unwrap();
        let grid = RasterGrid::new(GeoTransform::north_up(0.0, 100.0, 10.0), 32654, 10, 10);
        let mut data = Array2::<f32>::zeros((10, 10));
        for ((_, j), v) in data.indexed_iter_mut() {
            *v = 35.0 + j as f32 * 0.01;
        }
        let graded = Scene::new(
            metadata("graded", 1, 39),
            vec![("angle".to_string(), Raster::new(grid, data).unwrap())],
        )
        .unwrap();

        let from_band = corrector.correct(&graded).unwrap();
        let from_metadata = corrector.correct(&ramp_scene(35.0, 0.0)).unwrap();
        assert_relative_eq!(from_band.heading_deg, from_metadata.heading_deg, epsilon = 1e-3);
        assert_eq!(from_band.valid_pixels, from_metadata.valid_pixels);

        let band_angle = graded.band("angle").unwrap();
        let a = from_band.scene.band(LIA_BAND).unwrap();
        let b = from_metadata.scene.band(LIA_BAND).unwrap();
        for i in 0..10 {
            for j in 0..10 {
                assert_relative_eq!(a.get(i, j) - band_angle.get(i, j), b.get(i, j) - 35.0, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_zero_buffer_equals_unbuffered() {
        let model = ramp_model(10f32.to_radians().tan());
        let plain = LiaCorrector::standard(&model).unwrap();
        let buffered = LiaCorrector::new(
            LiaParams {
                buffer_m: 0.0,
                ..LiaParams::default()
            },
            &model,
        )
        .unwrap();
        let scene = ramp_scene(35.0, 0.0);
        let a = no_data_mask(&plain.apply(&scene).unwrap()).unwrap();
        let b = no_data_mask(&buffered.apply(&scene).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_buffer_rejected() {
        let params = LiaParams {
            buffer_m: -1.0,
            ..LiaParams::default()
        };
        assert!(LiaCorrector::new(params, &flat_model()).is_err());
    }
}
