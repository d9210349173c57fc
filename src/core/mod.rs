//! Core change-detection processing modules

pub mod aoi;
pub mod change_detection;
pub mod collection;
pub mod distance;
pub mod lia;
pub mod pipeline;
pub mod raster;
pub mod statistics;
pub mod terrain;
pub mod terrain_mask;

// Re-export main types
pub use aoi::Aoi;
pub use change_detection::{PostImageReport, SiComputer, SiOutput, SiParams};
pub use collection::{CancellationToken, ImageCollection, Scene, SkipPolicy};
pub use lia::{no_data_mask, LiaCorrector, LiaParams, LiaResult, LIA_BAND, NO_DATA_MASK_BAND};
pub use pipeline::{PipelineReport, ProcessedSi, SiPipeline};
pub use raster::{Mask, Raster, RasterGrid};
pub use statistics::{nan_mean, percentiles, PercentileStats};
pub use terrain_mask::{
    ElevationModel, TerrainMaskBuilder, TerrainMaskParams, TerrainMaskResult, TerrainMaskStats,
};
