use crate::core::raster::{Raster, RasterGrid};
use crate::types::{GeoTransform, SiError, SiResult};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::Path;

/// Band of a multi-band raster file, by description or 1-based index
#[derive(Debug, Clone, PartialEq)]
pub enum BandSelector {
    Name(String),
    Index(isize),
}

fn epsg_of(dataset: &Dataset) -> SiResult<u32> {
    let mut srs = dataset.spatial_ref()?;
    let code = match srs.auth_code() {
        Ok(code) => code,
        Err(_) => {
            srs.auto_identify_epsg()?;
            srs.auth_code()?
        }
    };
    u32::try_from(code).map_err(|_| SiError::Alignment(format!("Invalid EPSG code {}", code)))
}

/// Grid (transform, CRS, shape) of a raster file without reading pixels
pub fn read_grid<P: AsRef<Path>>(path: P) -> SiResult<RasterGrid> {
    let dataset = Dataset::open(path.as_ref())?;
    grid_of(&dataset)
}

fn grid_of(dataset: &Dataset) -> SiResult<RasterGrid> {
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    Ok(RasterGrid::new(transform, epsg_of(dataset)?, height, width))
}

/// Descriptions of all bands, in file order
pub fn band_names<P: AsRef<Path>>(path: P) -> SiResult<Vec<String>> {
    let dataset = Dataset::open(path.as_ref())?;
    let mut names = Vec::new();
    for index in 1..=dataset.raster_count() {
        names.push(dataset.rasterband(index)?.description()?);
    }
    Ok(names)
}

fn find_band(dataset: &Dataset, selector: &BandSelector) -> SiResult<Option<isize>> {
    match selector {
        BandSelector::Index(i) => Ok((*i >= 1 && *i <= dataset.raster_count()).then_some(*i)),
        BandSelector::Name(name) => {
            for index in 1..=dataset.raster_count() {
                if dataset.rasterband(index)?.description()?.eq_ignore_ascii_case(name) {
                    return Ok(Some(index));
                }
            }
            Ok(None)
        }
    }
}

fn read_band_data(dataset: &Dataset, index: isize, grid: &RasterGrid) -> SiResult<Raster> {
    let rasterband = dataset.rasterband(index)?;
    let nodata = rasterband.no_data_value();
    let (width, height) = (grid.cols, grid.rows);
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let mut array = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| SiError::Processing(format!("Failed to reshape band data: {}", e)))?;
    if let Some(nd) = nodata {
        if !nd.is_nan() {
            let nd = nd as f32;
            array.mapv_inplace(|v| if v == nd { f32::NAN } else { v });
        }
    }
    Raster::new(*grid, array)
}

/// Read selected bands; `None` entries mark bands the file does not have
pub fn read_bands<P: AsRef<Path>>(
    path: P,
    selectors: &[BandSelector],
) -> SiResult<Vec<Option<Raster>>> {
    log::debug!("Reading {} band(s) from {}", selectors.len(), path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let grid = grid_of(&dataset)?;
    selectors
        .iter()
        .map(|selector| match find_band(&dataset, selector)? {
            Some(index) => read_band_data(&dataset, index, &grid).map(Some),
            None => Ok(None),
        })
        .collect()
}

/// Read the first band of a raster file
pub fn read_raster<P: AsRef<Path>>(path: P) -> SiResult<Raster> {
    read_bands(path.as_ref(), &[BandSelector::Index(1)])?
        .pop()
        .flatten()
        .ok_or_else(|| SiError::MissingData(format!("{} has no bands", path.as_ref().display())))
}

/// Write aligned rasters as named bands of one `f32` file, `NaN` as no-data
pub fn write_bands<P: AsRef<Path>>(
    bands: &[(&str, &Raster)],
    output_path: P,
    driver_name: &str,
) -> SiResult<()> {
    let path = output_path.as_ref();
    let grid = match bands.first() {
        Some((_, raster)) => *raster.grid(),
        None => return Err(SiError::Export("No bands to write".to_string())),
    };
    for (name, raster) in bands {
        grid.ensure_aligned(raster.grid(), name)?;
    }
    log::info!("Writing {} band(s) to {} ({})", bands.len(), path.display(), driver_name);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SiError::Export(format!("Cannot create {}: {}", parent.display(), e)))?;
        }
    }

    let export_err = |e: gdal::errors::GdalError| SiError::Export(format!("{}: {}", path.display(), e));

    let driver = DriverManager::get_driver_by_name(driver_name).map_err(export_err)?;
    let mut dataset = driver
        .create_with_band_type::<f32, _>(path, grid.cols as isize, grid.rows as isize, bands.len() as isize)
        .map_err(export_err)?;

    dataset.set_geo_transform(&grid.transform.to_gdal()).map_err(export_err)?;
    dataset
        .set_spatial_ref(&SpatialRef::from_epsg(grid.epsg).map_err(export_err)?)
        .map_err(export_err)?;

    for (i, (name, raster)) in bands.iter().enumerate() {
        let mut rasterband = dataset.rasterband(i as isize + 1).map_err(export_err)?;
        let flat_data: Vec<f32> = raster.data().iter().cloned().collect();
        let buffer = Buffer::new((grid.cols, grid.rows), flat_data);
        rasterband.write((0, 0), (grid.cols, grid.rows), &buffer).map_err(export_err)?;
        rasterband.set_no_data_value(Some(f32::NAN as f64)).map_err(export_err)?;
        rasterband.set_description(name).map_err(export_err)?;
    }

    Ok(())
}

/// Write a single-band raster
pub fn write_raster<P: AsRef<Path>>(
    raster: &Raster,
    description: &str,
    output_path: P,
    driver_name: &str,
) -> SiResult<()> {
    write_bands(&[(description, raster)], output_path, driver_name)
}
