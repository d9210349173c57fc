//! In-memory raster algebra on a shared georeferenced grid
//!
//! Every operation returns a new raster; inputs are never modified. Binary
//! operations require both operands to be pixel-aligned (same transform, CRS
//! and shape) and fail with [`SiError::Alignment`] otherwise.

use crate::types::{
    BoundingBox, GeoTransform, MaskImage, SarRealImage, SiError, SiResult, EPSG_WGS84,
    METRES_PER_DEGREE,
};
use ndarray::{Array2, Zip};

/// Tolerance, in pixels, when comparing two grids
const GRID_TOLERANCE: f64 = 1e-9;

/// Spatial reference and shape shared by aligned rasters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterGrid {
    pub transform: GeoTransform,
    pub epsg: u32,
    pub rows: usize,
    pub cols: usize,
}

impl RasterGrid {
    pub fn new(transform: GeoTransform, epsg: u32, rows: usize, cols: usize) -> Self {
        Self {
            transform,
            epsg,
            rows,
            cols,
        }
    }

    /// Smallest north-up grid at `resolution` that covers `bbox`
    pub fn covering(bbox: &BoundingBox, resolution: f64, epsg: u32) -> SiResult<Self> {
        if resolution <= 0.0 || !resolution.is_finite() {
            return Err(SiError::Config(format!(
                "Grid resolution must be positive, got {}",
                resolution
            )));
        }
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(SiError::Config(format!("Degenerate bounding box: {:?}", bbox)));
        }

        // Round before ceil so exact multiples don't gain a spurious column
        let cols = ((bbox.width() / resolution * 1e6).round() / 1e6).ceil() as usize;
        let rows = ((bbox.height() / resolution * 1e6).round() / 1e6).ceil() as usize;

        Ok(Self::new(
            GeoTransform::north_up(bbox.min_x, bbox.max_y, resolution),
            epsg,
            rows.max(1),
            cols.max(1),
        ))
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    pub fn is_geographic(&self) -> bool {
        self.epsg == EPSG_WGS84
    }

    /// Pixel spacing (x, y) in metres
    ///
    /// Geographic grids are converted at the latitude of the grid centre.
    pub fn pixel_spacing_m(&self) -> (f64, f64) {
        let dx = self.transform.pixel_width.abs();
        let dy = self.transform.pixel_height.abs();
        if self.is_geographic() {
            let b = self.bounds();
            let lat = ((b.min_y + b.max_y) / 2.0).to_radians();
            (dx * METRES_PER_DEGREE * lat.cos(), dy * METRES_PER_DEGREE)
        } else {
            (dx, dy)
        }
    }

    /// Ground area of one pixel in square metres
    pub fn pixel_area_m2(&self) -> f64 {
        let (dx, dy) = self.pixel_spacing_m();
        dx * dy
    }

    pub fn is_aligned_with(&self, other: &RasterGrid) -> bool {
        if self.epsg != other.epsg || self.rows != other.rows || self.cols != other.cols {
            return false;
        }
        let a = &self.transform;
        let b = &other.transform;
        let px = a.pixel_width.abs().max(f64::MIN_POSITIVE);
        let py = a.pixel_height.abs().max(f64::MIN_POSITIVE);
        ((a.top_left_x - b.top_left_x) / px).abs() < GRID_TOLERANCE
            && ((a.top_left_y - b.top_left_y) / py).abs() < GRID_TOLERANCE
            && ((a.pixel_width - b.pixel_width) / px).abs() < GRID_TOLERANCE
            && ((a.pixel_height - b.pixel_height) / py).abs() < GRID_TOLERANCE
            && a.rotation_x == b.rotation_x
            && a.rotation_y == b.rotation_y
    }

    pub fn ensure_aligned(&self, other: &RasterGrid, context: &str) -> SiResult<()> {
        if self.is_aligned_with(other) {
            Ok(())
        } else {
            Err(SiError::Alignment(format!(
                "{}: grid {}x{} (EPSG:{}) does not match {}x{} (EPSG:{})",
                context, self.rows, self.cols, self.epsg, other.rows, other.cols, other.epsg
            )))
        }
    }

    fn ensure_same_crs(&self, other: &RasterGrid) -> SiResult<()> {
        if self.epsg != other.epsg {
            return Err(SiError::Alignment(format!(
                "Cannot resample between EPSG:{} and EPSG:{}",
                self.epsg, other.epsg
            )));
        }
        if self.transform.rotation_x != 0.0
            || self.transform.rotation_y != 0.0
            || other.transform.rotation_x != 0.0
            || other.transform.rotation_y != 0.0
        {
            return Err(SiError::Alignment("Rotated grids are not supported".to_string()));
        }
        Ok(())
    }
}

/// Single-band floating point raster, `NaN` marks no-data
#[derive(Debug, Clone)]
pub struct Raster {
    grid: RasterGrid,
    data: SarRealImage,
}

impl Raster {
    pub fn new(grid: RasterGrid, data: SarRealImage) -> SiResult<Self> {
        if data.dim() != grid.shape() {
            return Err(SiError::Alignment(format!(
                "Data shape {:?} does not match grid shape {:?}",
                data.dim(),
                grid.shape()
            )));
        }
        Ok(Self { grid, data })
    }

    pub fn constant(grid: RasterGrid, value: f32) -> Self {
        Self {
            grid,
            data: Array2::from_elem(grid.shape(), value),
        }
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    pub fn data(&self) -> &SarRealImage {
        &self.data
    }

    pub fn into_data(self) -> SarRealImage {
        self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[[row, col]]
    }

    /// Apply a function to every sample
    pub fn map<F>(&self, f: F) -> Raster
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        Raster {
            grid: self.grid,
            data: self.data.mapv(f),
        }
    }

    /// Combine two aligned rasters sample by sample
    pub fn zip_with<F>(&self, other: &Raster, f: F) -> SiResult<Raster>
    where
        F: Fn(f32, f32) -> f32 + Sync + Send,
    {
        self.grid.ensure_aligned(&other.grid, "zip_with")?;
        let mut out = Array2::<f32>::zeros(self.grid.shape());
        Zip::from(&mut out)
            .and(&self.data)
            .and(&other.data)
            .par_for_each(|o, &a, &b| *o = f(a, b));
        Ok(Raster {
            grid: self.grid,
            data: out,
        })
    }

    pub fn subtract(&self, other: &Raster) -> SiResult<Raster> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Binary mask where `predicate` holds; `NaN` samples yield 0
    pub fn threshold<F>(&self, predicate: F) -> Mask
    where
        F: Fn(f32) -> bool,
    {
        Mask {
            grid: self.grid,
            data: self
                .data
                .mapv(|v| if !v.is_nan() && predicate(v) { 1 } else { 0 }),
        }
    }

    /// Samples that carry data
    pub fn valid_mask(&self) -> Mask {
        self.threshold(|_| true)
    }

    /// Mark samples as no-data where the mask is 0
    pub fn update_mask(&self, mask: &Mask) -> SiResult<Raster> {
        self.grid.ensure_aligned(&mask.grid, "update_mask")?;
        let mut out = self.data.clone();
        Zip::from(&mut out).and(&mask.data).for_each(|v, &m| {
            if m == 0 {
                *v = f32::NAN;
            }
        });
        Ok(Raster {
            grid: self.grid,
            data: out,
        })
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Mean of the valid samples, `None` when every sample is no-data
    pub fn mean(&self) -> Option<f64> {
        let (sum, count) = self
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Bilinear resampling onto `target`; samples outside the source extent become `NaN`
    pub fn resample_bilinear(&self, target: &RasterGrid) -> SiResult<Raster> {
        if self.grid.is_aligned_with(target) {
            return Ok(self.clone());
        }
        self.grid.ensure_same_crs(target)?;
        log::debug!(
            "Bilinear resampling {}x{} -> {}x{}",
            self.grid.rows,
            self.grid.cols,
            target.rows,
            target.cols
        );

        let src = &self.grid.transform;
        let (src_rows, src_cols) = self.data.dim();
        let mut out = Array2::<f32>::from_elem(target.shape(), f32::NAN);

        Zip::indexed(&mut out).par_for_each(|(i, j), o| {
            let (x, y) = target.transform.pixel_center(i, j);
            let (r, c) = src.map_to_pixel(x, y);
            // Shift to pixel-centre coordinates
            let r = r - 0.5;
            let c = c - 0.5;
            if r < -0.5 || c < -0.5 || r > src_rows as f64 - 0.5 || c > src_cols as f64 - 0.5 {
                return;
            }
            let r = r.clamp(0.0, (src_rows - 1) as f64);
            let c = c.clamp(0.0, (src_cols - 1) as f64);
            *o = bilinear_interpolate(&self.data, r, c);
        });

        Ok(Raster {
            grid: *target,
            data: out,
        })
    }
}

/// Bilinear interpolation at fractional (row, col) in pixel-centre coordinates
fn bilinear_interpolate(image: &Array2<f32>, row: f64, col: f64) -> f32 {
    let (rows, cols) = image.dim();
    let y1 = row.floor() as usize;
    let x1 = col.floor() as usize;
    let y2 = (y1 + 1).min(rows - 1);
    let x2 = (x1 + 1).min(cols - 1);

    let dy = row - y1 as f64;
    let dx = col - x1 as f64;

    let v11 = image[[y1, x1]] as f64;
    let v12 = image[[y2, x1]] as f64;
    let v21 = image[[y1, x2]] as f64;
    let v22 = image[[y2, x2]] as f64;

    let interpolated = v11 * (1.0 - dx) * (1.0 - dy)
        + v21 * dx * (1.0 - dy)
        + v12 * (1.0 - dx) * dy
        + v22 * dx * dy;

    interpolated as f32
}

/// Binary mask raster (1 = valid, 0 = invalid)
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    grid: RasterGrid,
    data: MaskImage,
}

impl Mask {
    pub fn new(grid: RasterGrid, data: MaskImage) -> SiResult<Self> {
        if data.dim() != grid.shape() {
            return Err(SiError::Alignment(format!(
                "Mask shape {:?} does not match grid shape {:?}",
                data.dim(),
                grid.shape()
            )));
        }
        Ok(Self {
            grid,
            data: data.mapv(|v| u8::from(v != 0)),
        })
    }

    pub fn ones(grid: RasterGrid) -> Self {
        Self {
            grid,
            data: Array2::ones(grid.shape()),
        }
    }

    pub fn zeros(grid: RasterGrid) -> Self {
        Self {
            grid,
            data: Array2::zeros(grid.shape()),
        }
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    pub fn data(&self) -> &MaskImage {
        &self.data
    }

    pub fn is_set(&self, row: usize, col: usize) -> bool {
        self.data[[row, col]] != 0
    }

    /// Pixelwise multiply
    pub fn and(&self, other: &Mask) -> SiResult<Mask> {
        self.grid.ensure_aligned(&other.grid, "mask and")?;
        Ok(Mask {
            grid: self.grid,
            data: &self.data * &other.data,
        })
    }

    /// Pixelwise max
    pub fn or(&self, other: &Mask) -> SiResult<Mask> {
        self.grid.ensure_aligned(&other.grid, "mask or")?;
        let mut out = self.data.clone();
        Zip::from(&mut out)
            .and(&other.data)
            .for_each(|a, &b| *a = (*a).max(b));
        Ok(Mask {
            grid: self.grid,
            data: out,
        })
    }

    pub fn not(&self) -> Mask {
        Mask {
            grid: self.grid,
            data: self.data.mapv(|v| 1 - v),
        }
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Fraction of pixels set
    pub fn coverage(&self) -> f64 {
        let total = self.data.len();
        if total == 0 {
            0.0
        } else {
            self.count() as f64 / total as f64
        }
    }

    pub fn to_raster(&self) -> Raster {
        Raster {
            grid: self.grid,
            data: self.data.mapv(f32::from),
        }
    }

    /// Nearest-neighbour resampling onto `target`; pixels outside the source extent are 0
    pub fn resample_nearest(&self, target: &RasterGrid) -> SiResult<Mask> {
        if self.grid.is_aligned_with(target) {
            return Ok(self.clone());
        }
        self.grid.ensure_same_crs(target)?;

        let src = &self.grid.transform;
        let (src_rows, src_cols) = self.data.dim();
        let mut out = Array2::<u8>::zeros(target.shape());

        Zip::indexed(&mut out).par_for_each(|(i, j), o| {
            let (x, y) = target.transform.pixel_center(i, j);
            let (r, c) = src.map_to_pixel(x, y);
            if r < 0.0 || c < 0.0 {
                return;
            }
            let (r, c) = (r.floor() as usize, c.floor() as usize);
            if r < src_rows && c < src_cols {
                *o = self.data[[r, c]];
            }
        });

        Ok(Mask {
            grid: *target,
            data: out,
        })
    }
}
