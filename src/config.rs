//! Batch configuration
//!
//! A single JSON document describes the area of interest, the event time
//! window, input datasets and every algorithm parameter. Missing sections
//! fall back to the defaults below.

use crate::core::aoi::Aoi;
use crate::core::change_detection::SiParams;
use crate::core::lia::LiaParams;
use crate::core::raster::RasterGrid;
use crate::core::terrain_mask::TerrainMaskParams;
use crate::types::{AcquisitionMode, Polarization, SiError, SiResult};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Event date and the pre/post acquisition windows around it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWindowConfig {
    pub event: DateTime<Utc>,
    /// Pre-event window length before the event (days)
    pub pre_lookback_days: i64,
    /// Start of the post-event window after the event (days)
    pub post_offset_days: i64,
    /// Length of the post-event window (days)
    pub post_duration_days: i64,
}

impl Default for TimeWindowConfig {
    fn default() -> Self {
        Self {
            event: Utc
                .with_ymd_and_hms(2018, 6, 28, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            pre_lookback_days: 10_000,
            post_offset_days: 10,
            post_duration_days: 4,
        }
    }
}

impl TimeWindowConfig {
    /// `[event - lookback, event)`
    pub fn pre_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.event - Duration::days(self.pre_lookback_days), self.event)
    }

    /// `[event + offset, event + offset + duration)`
    pub fn post_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.event + Duration::days(self.post_offset_days);
        (start, start + Duration::days(self.post_duration_days))
    }

    /// Range covering both windows, used to query the catalog
    pub fn full_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.pre_range().0, self.post_range().1)
    }

    pub fn validate(&self) -> SiResult<()> {
        if self.pre_lookback_days <= 0 {
            return Err(SiError::Config("Pre-event lookback must be positive".to_string()));
        }
        if self.post_offset_days < 0 || self.post_duration_days <= 0 {
            return Err(SiError::Config(
                "Post-event window must start at or after the event and have a positive duration"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Output raster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output resolution in metres per pixel (grid units for geographic AOIs)
    pub resolution_m: f64,
    /// GDAL driver short name
    pub format: String,
    pub folder: PathBuf,
    pub description: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            resolution_m: 10.0,
            format: "GTiff".to_string(),
            folder: PathBuf::from("S1Export"),
            description: "SI".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn output_path(&self) -> PathBuf {
        let ext = match self.format.as_str() {
            "GTiff" | "COG" => "tif",
            "HFA" => "img",
            "netCDF" => "nc",
            _ => "dat",
        };
        self.folder.join(format!("{}.{}", self.description, ext))
    }
}

/// Input dataset locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Elevation + surface water raster
    pub dem: PathBuf,
    /// Scene catalog manifest (JSON)
    pub catalog: PathBuf,
    pub elevation_band: String,
    pub water_band: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dem: PathBuf::from("nasadem.tif"),
            catalog: PathBuf::from("scenes.json"),
            elevation_band: "elevation".to_string(),
            water_band: "swb".to_string(),
        }
    }
}

/// Complete configuration of one change-detection run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub aoi: Aoi,
    pub time: TimeWindowConfig,
    pub polarization: Polarization,
    pub instrument_mode: AcquisitionMode,
    /// Backscatter below this value (dB) is treated as swath-edge noise
    pub edge_threshold_db: f32,
    pub terrain: TerrainMaskParams,
    pub lia: LiaParams,
    pub si: SiParams,
    pub export: ExportConfig,
    pub inputs: InputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            aoi: Aoi::default(),
            time: TimeWindowConfig::default(),
            polarization: Polarization::VH,
            instrument_mode: AcquisitionMode::IW,
            edge_threshold_db: -30.0,
            terrain: TerrainMaskParams::default(),
            lia: LiaParams::default(),
            si: SiParams::default(),
            export: ExportConfig::default(),
            inputs: InputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; relative paths resolve against the file's directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> SiResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let mut config: PipelineConfig = serde_json::from_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.inputs.dem);
        resolve(&mut self.inputs.catalog);
        resolve(&mut self.export.folder);
    }

    /// AOI bounding box gridded at the export resolution
    ///
    /// Slope, aspect and heading need central differences, so at least 2x2 pixels are required.
    pub fn analysis_grid(&self) -> SiResult<RasterGrid> {
        let grid = self.aoi.grid(self.export.resolution_m)?;
        if grid.rows < 2 || grid.cols < 2 {
            return Err(SiError::Config(format!(
                "AOI covers only {}x{} pixels at resolution {}; at least 2x2 is required",
                grid.rows, grid.cols, self.export.resolution_m
            )));
        }
        Ok(grid)
    }

    pub fn validate(&self) -> SiResult<()> {
        self.aoi.validate()?;
        self.time.validate()?;
        self.terrain.validate()?;
        self.si.validate()?;
        if !(self.export.resolution_m > 0.0 && self.export.resolution_m.is_finite()) {
            return Err(SiError::Config(format!(
                "Export resolution must be positive, got {}",
                self.export.resolution_m
            )));
        }
        self.analysis_grid()?;
        if self.lia.buffer_m < 0.0 {
            return Err(SiError::Config("LIA buffer must be non-negative".to_string()));
        }
        if self.export.description.is_empty() {
            return Err(SiError::Config("Export description must not be empty".to_string()));
        }
        Ok(())
    }
}
