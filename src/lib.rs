//! sarslide: Sentinel-1 change detection for landslide and flood damage mapping
//!
//! Builds a terrain mask from an elevation model, corrects each scene for the
//! local incidence angle and layover/shadow, and reduces pre/post-event
//! backscatter to a per-pixel change statistic (SI) in `[0, 1]`.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionMode, BoundingBox, GeoTransform, OrbitPass, Polarization, SceneMetadata, SiError,
    SiResult,
};

pub use config::PipelineConfig;
pub use crate::core::{
    Aoi, CancellationToken, ElevationModel, ImageCollection, LiaCorrector, Mask, Raster,
    RasterGrid, Scene, SiComputer, SiPipeline, TerrainMaskBuilder,
};
pub use io::{DemReader, SceneCatalog};
