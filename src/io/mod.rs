//! Input/output modules for raster files and scene catalogs

pub mod catalog;
pub mod dem;
pub mod geotiff;

pub use catalog::{CatalogEntry, CatalogQuery, SceneCatalog};
pub use dem::DemReader;
pub use geotiff::{read_raster, write_raster, BandSelector};
