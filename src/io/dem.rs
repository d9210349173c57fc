use crate::core::terrain_mask::ElevationModel;
use crate::io::geotiff::{read_bands, BandSelector};
use crate::types::{SiError, SiResult};
use std::path::Path;

/// Elevation dataset reader
pub struct DemReader;

impl DemReader {
    /// Read the elevation and surface water bands of a DEM GeoTIFF
    ///
    /// Bands are looked up by description first and fall back to band 1
    /// (elevation) and band 2 (water). A file without a water band is treated
    /// as all land.
    pub fn read_elevation_model<P: AsRef<Path>>(
        dem_path: P,
        elevation_band: &str,
        water_band: &str,
    ) -> SiResult<ElevationModel> {
        let path = dem_path.as_ref();
        log::info!("Reading elevation model from: {}", path.display());

        let mut bands = read_bands(
            path,
            &[
                BandSelector::Name(elevation_band.to_string()),
                BandSelector::Name(water_band.to_string()),
                BandSelector::Index(1),
                BandSelector::Index(2),
            ],
        )?
        .into_iter();
        let (by_name_elev, by_name_water, first, second) =
            (bands.next().flatten(), bands.next().flatten(), bands.next().flatten(), bands.next().flatten());

        let named = by_name_elev.is_some();
        let elevation = by_name_elev.or(first).ok_or_else(|| {
            SiError::MissingData(format!("{} has no elevation band", path.display()))
        })?;
        let water = match by_name_water {
            Some(w) => Some(w),
            // Positional fallback only when the file is not described by name
            None if !named => second,
            None => None,
        };

        let grid = elevation.grid();
        log::debug!(
            "DEM size: {}x{}, EPSG:{}, geotransform: {:?}",
            grid.cols,
            grid.rows,
            grid.epsg,
            grid.transform
        );

        match water {
            Some(water) => ElevationModel::new(elevation, water),
            None => {
                log::warn!(
                    "No '{}' band in {}; treating every pixel as land",
                    water_band,
                    path.display()
                );
                Ok(ElevationModel::land_only(elevation))
            }
        }
    }
}
