//! End-to-end change-detection run
//!
//! Stages: analysis grid and reference region from the AOI, terrain mask,
//! per-scene LIA correction and masking, pre/post split, SI, export.

use crate::config::PipelineConfig;
use crate::core::change_detection::{SiComputer, SiOutput};
use crate::core::collection::{CancellationToken, ImageCollection, Scene, SkipPolicy};
use crate::core::lia::{no_data_mask, LiaCorrector};
use crate::core::raster::{Mask, RasterGrid};
use crate::core::terrain_mask::{ElevationModel, TerrainMaskBuilder, TerrainMaskStats};
use crate::io::catalog::{CatalogQuery, SceneCatalog};
use crate::io::dem::DemReader;
use crate::io::geotiff::write_raster;
use crate::types::{SiError, SiResult};
use std::path::PathBuf;
use std::time::Instant;

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub output_path: Option<PathBuf>,
    pub scenes_selected: usize,
    pub pre_scenes: usize,
    pub post_scenes: usize,
    /// Post-event scenes with at least one same-path pre-event pair
    pub contributing_post: usize,
    pub terrain: TerrainMaskStats,
    pub si_valid_pixels: usize,
    pub si_mean: Option<f64>,
}

/// SI processor result before export
#[derive(Debug, Clone)]
pub struct ProcessedSi {
    pub output: SiOutput,
    pub grid: RasterGrid,
    pub terrain: TerrainMaskStats,
    pub pre_scenes: usize,
    pub post_scenes: usize,
}

/// Batch change-detection pipeline
pub struct SiPipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl SiPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an externally controlled cancellation flag
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Analysis grid over the AOI bounding box and the polygon mask on it
    pub fn analysis_grid(&self) -> SiResult<(RasterGrid, Mask)> {
        let grid = self.config.analysis_grid()?;
        let region = self.config.aoi.rasterize(&grid)?;
        log::debug!(
            "Analysis grid {}x{} at {} (EPSG:{}), {} pixels inside the AOI",
            grid.rows,
            grid.cols,
            self.config.export.resolution_m,
            grid.epsg,
            region.count()
        );
        Ok((grid, region))
    }

    /// Terrain mask built on the elevation grid, moved onto `grid` by nearest neighbour
    pub fn terrain_mask(
        &self,
        model: &ElevationModel,
        grid: &RasterGrid,
    ) -> SiResult<(Mask, TerrainMaskStats)> {
        let result = TerrainMaskBuilder::new(self.config.terrain.clone()).build(model)?;
        let mask = result.mask.resample_nearest(grid)?;
        Ok((mask, result.stats))
    }

    /// LIA-correct one scene, mask edges, terrain and layover/shadow, keep the polarization band
    fn prepare_scene(
        &self,
        scene: &Scene,
        corrector: &LiaCorrector,
        terrain: &Mask,
        grid: &RasterGrid,
    ) -> SiResult<Scene> {
        let band = self.config.polarization.band_name();
        let angle_band = corrector.params().angle_band.as_str();
        let scene = scene.select(&[band, angle_band])?;
        let scene = if scene.grid().is_aligned_with(grid) {
            scene
        } else {
            let mut resampled = Vec::with_capacity(2);
            for name in [band, angle_band] {
                resampled.push((name.to_string(), scene.band(name)?.resample_bilinear(grid)?));
            }
            Scene::new(scene.metadata().clone(), resampled)?
        };

        let corrected = corrector.apply(&scene)?;

        let threshold = self.config.edge_threshold_db;
        let backscatter = corrected.band(band)?;
        let edge = backscatter.threshold(|v| v >= threshold);
        let valid = edge.and(terrain)?.and(&no_data_mask(&corrected)?)?;
        let masked = backscatter.update_mask(&valid)?;

        Scene::new(corrected.metadata().clone(), vec![(band.to_string(), masked)])
    }

    /// Run every processing stage on in-memory inputs
    ///
    /// `scenes` may be on any grid in the AOI CRS; bands are resampled onto the
    /// analysis grid. Scenes that fail with a recoverable error are skipped.
    pub fn process(&self, model: &ElevationModel, scenes: &ImageCollection) -> SiResult<ProcessedSi> {
        let (grid, region) = self.analysis_grid()?;
        self.cancel.check()?;

        log::info!("Stage 1/4: terrain mask");
        let (terrain, terrain_stats) = self.terrain_mask(model, &grid)?;
        self.cancel.check()?;

        log::info!("Stage 2/4: LIA correction of {} scenes", scenes.len());
        let corrector = LiaCorrector::new(self.config.lia.clone(), model)?.on_grid(&grid)?;
        let prepared = scenes
            .filter_polarization(self.config.polarization)
            .filter_mode(self.config.instrument_mode)
            .try_map(
                |s| self.prepare_scene(s, &corrector, &terrain, &grid),
                SkipPolicy::Warn,
                &self.cancel,
            )?
            .sort_by_time();
        self.cancel.check()?;

        log::info!("Stage 3/4: pre/post split");
        let (pre_start, pre_end) = self.config.time.pre_range();
        let (post_start, post_end) = self.config.time.post_range();
        let pre = prepared.filter_date(pre_start, pre_end);
        let post = prepared.filter_date(post_start, post_end);
        log::info!(
            "{} pre-event scenes on paths {:?}, {} post-event scenes on paths {:?}",
            pre.len(),
            pre.paths(),
            post.len(),
            post.paths()
        );
        if pre.is_empty() {
            return Err(SiError::MissingData(format!(
                "No pre-event scenes between {} and {}",
                pre_start, pre_end
            )));
        }
        if post.is_empty() {
            return Err(SiError::MissingData(format!(
                "No post-event scenes between {} and {}",
                post_start, post_end
            )));
        }

        log::info!("Stage 4/4: SI");
        let computer = SiComputer::new(self.config.si.clone(), self.config.polarization.band_name());
        let mut output = computer.compute(&pre, &post, &region, &self.cancel)?;
        output.si = output.si.update_mask(&region)?;

        Ok(ProcessedSi {
            output,
            grid,
            terrain: terrain_stats,
            pre_scenes: pre.len(),
            post_scenes: post.len(),
        })
    }

    /// Read inputs from disk, process and export the SI raster once
    pub fn run(&self) -> SiResult<PipelineReport> {
        let start = Instant::now();
        let (grid, _) = self.analysis_grid()?;

        let inputs = &self.config.inputs;
        let model = DemReader::read_elevation_model(&inputs.dem, &inputs.elevation_band, &inputs.water_band)?;
        self.cancel.check()?;

        let catalog = SceneCatalog::from_file(&inputs.catalog)?;
        let query = CatalogQuery {
            polarization: Some(self.config.polarization),
            instrument_mode: Some(self.config.instrument_mode),
            date_range: Some(self.config.time.full_range()),
            bounds: Some((self.config.aoi.bounds(), self.config.aoi.epsg)),
        };
        let entries = catalog.query(&query)?;
        let bands = [
            self.config.polarization.band_name(),
            self.config.lia.angle_band.as_str(),
        ];
        let scenes = SceneCatalog::load(&entries, &bands, &grid, SkipPolicy::Warn, &self.cancel)?;
        self.cancel.check()?;

        let processed = self.process(&model, &scenes)?;
        self.cancel.check()?;

        let output_path = self.config.export.output_path();
        write_raster(
            &processed.output.si,
            &self.config.export.description,
            &output_path,
            &self.config.export.format,
        )?;

        let report = PipelineReport {
            output_path: Some(output_path),
            scenes_selected: entries.len(),
            pre_scenes: processed.pre_scenes,
            post_scenes: processed.post_scenes,
            contributing_post: processed.output.contributing(),
            terrain: processed.terrain,
            si_valid_pixels: processed.output.si.valid_count(),
            si_mean: processed.output.si.mean(),
        };
        log::info!(
            "SI export complete in {:.1}s: {} valid pixels, mean {:?}",
            start.elapsed().as_secs_f64(),
            report.si_valid_pixels,
            report.si_mean
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aoi::Aoi;
    use crate::core::collection::tests::metadata;
    use crate::core::raster::Raster;
    use crate::types::{BoundingBox, GeoTransform};
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.aoi = Aoi::rectangle(
            32654,
            &BoundingBox {
                min_x: 0.0,
                max_x: 200.0,
                min_y: 0.0,
                max_y: 200.0,
            },
        );
        config.time.event = Utc.with_ymd_and_hms(2018, 6, 10, 0, 0, 0).unwrap();
        config.time.post_offset_days = 5;
        config.time.post_duration_days = 10;
        config
    }

    /// Steep east-facing ramp (every pixel passes the slope test)
    fn hillside() -> ElevationModel {
        let grid = RasterGrid::new(GeoTransform::north_up(0.0, 200.0, 10.0), 32654, 20, 20);
        let mut data = Array2::<f32>::zeros((20, 20));
        for ((_, j), v) in data.indexed_iter_mut() {
            *v = 400.0 - j as f32 * 2.0;
        }
        ElevationModel::land_only(Raster::new(grid, data).unwrap())
    }

    fn scene(id: &str, day: u32, path: u32, vh: f32) -> Scene {
        let grid = RasterGrid::new(GeoTransform::north_up(0.0, 200.0, 10.0), 32654, 20, 20);
        let mut meta = metadata(id, day, path);
        meta.heading_deg = Some(190.0);
        let mut data = Array2::<f32>::zeros((20, 20));
        for ((i, j), v) in data.indexed_iter_mut() {
            *v = vh + ((i * 7 + j * 3) % 11) as f32 * 0.1;
        }
        Scene::new(
            meta,
            vec![
                ("VH".to_string(), Raster::new(grid, data).unwrap()),
                ("angle".to_string(), Raster::constant(grid, 39.0)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_process_outputs_bounded_si() {
        let scenes = ImageCollection::new(vec![
            scene("pre1", 1, 39, -12.0),
            scene("pre2", 3, 39, -12.2),
            scene("post", 20, 39, -18.0),
        ]);
        let processed = SiPipeline::new(config()).process(&hillside(), &scenes).unwrap();
        assert_eq!(processed.pre_scenes, 2);
        assert_eq!(processed.post_scenes, 1);
        let si = &processed.output.si;
        assert_eq!(si.grid().shape(), (20, 20));
        assert!(si.valid_count() > 0);
        assert!(si.data().iter().filter(|v| !v.is_nan()).all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_edge_values_masked() {
        let scenes = ImageCollection::new(vec![
            scene("pre1", 1, 39, -12.0),
            scene("post", 20, 39, -45.0),
        ]);
        let result = SiPipeline::new(config()).process(&hillside(), &scenes);
        // Every post pixel is below the edge threshold, leaving no samples to reduce
        assert!(matches!(result, Err(SiError::MissingData(_))));
    }

    #[test]
    fn test_empty_post_window_is_fatal() {
        let scenes = ImageCollection::new(vec![scene("pre1", 1, 39, -12.0)]);
        let result = SiPipeline::new(config()).process(&hillside(), &scenes);
        assert!(matches!(result, Err(SiError::MissingData(_))));
    }

    #[test]
    fn test_single_pixel_aoi_is_config_error() {
        let scenes = ImageCollection::new(vec![scene("pre1", 1, 39, -12.0), scene("post", 20, 39, -12.0)]);
        let mut config = config();
        config.export.resolution_m = 500.0;
        let result = SiPipeline::new(config).process(&hillside(), &scenes);
        assert!(matches!(result, Err(SiError::Config(_))));
    }

    #[test]
    fn test_cancelled_run_stops() {
        let scenes = ImageCollection::new(vec![scene("pre1", 1, 39, -12.0), scene("post", 20, 39, -12.0)]);
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = SiPipeline::new(config()).with_cancellation(token);
        assert!(matches!(pipeline.process(&hillside(), &scenes), Err(SiError::Cancelled)));
    }
}
