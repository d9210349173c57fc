use crate::core::raster::{Mask, RasterGrid};
use crate::types::{BoundingBox, SiError, SiResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Area of interest polygon in projected (or geographic) map coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aoi {
    /// CRS of the vertices, also used for the analysis grid
    pub epsg: u32,
    /// Exterior ring as (x, y) pairs; closing vertex optional
    pub vertices: Vec<[f64; 2]>,
}

impl Default for Aoi {
    fn default() -> Self {
        Self {
            epsg: 32653,
            vertices: Vec::new(),
        }
    }
}

impl Aoi {
    pub fn new(epsg: u32, vertices: Vec<[f64; 2]>) -> Self {
        Self { epsg, vertices }
    }

    /// Axis-aligned rectangle
    pub fn rectangle(epsg: u32, bbox: &BoundingBox) -> Self {
        Self::new(
            epsg,
            vec![
                [bbox.min_x, bbox.min_y],
                [bbox.max_x, bbox.min_y],
                [bbox.max_x, bbox.max_y],
                [bbox.min_x, bbox.max_y],
            ],
        )
    }

    pub fn validate(&self) -> SiResult<()> {
        let distinct = self.ring().len();
        if distinct < 3 {
            return Err(SiError::Config(format!(
                "AOI polygon needs at least 3 vertices, got {}",
                distinct
            )));
        }
        if self.vertices.iter().flatten().any(|v| !v.is_finite()) {
            return Err(SiError::Config("AOI contains non-finite coordinates".to_string()));
        }
        let b = self.bounds();
        if b.width() <= 0.0 || b.height() <= 0.0 {
            return Err(SiError::Config(format!("AOI has zero area: {:?}", b)));
        }
        Ok(())
    }

    /// Vertices without a duplicated closing vertex
    fn ring(&self) -> &[[f64; 2]] {
        match (self.vertices.first(), self.vertices.last()) {
            (Some(first), Some(last)) if self.vertices.len() > 1 && first == last => {
                &self.vertices[..self.vertices.len() - 1]
            }
            _ => &self.vertices,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut b = BoundingBox {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for [x, y] in &self.vertices {
            b.min_x = b.min_x.min(*x);
            b.max_x = b.max_x.max(*x);
            b.min_y = b.min_y.min(*y);
            b.max_y = b.max_y.max(*y);
        }
        b
    }

    /// Even-odd point-in-polygon test
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let ring = self.ring();
        let mut inside = false;
        let mut j = ring.len().wrapping_sub(1);
        for i in 0..ring.len() {
            let [xi, yi] = ring[i];
            let [xj, yj] = ring[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Analysis grid covering the AOI bounding box
    pub fn grid(&self, resolution: f64) -> SiResult<RasterGrid> {
        self.validate()?;
        RasterGrid::covering(&self.bounds(), resolution, self.epsg)
    }

    /// Pixels whose centre falls inside the polygon
    pub fn rasterize(&self, grid: &RasterGrid) -> SiResult<Mask> {
        if grid.epsg != self.epsg {
            return Err(SiError::Alignment(format!(
                "AOI is in EPSG:{} but grid is EPSG:{}",
                self.epsg, grid.epsg
            )));
        }
        let mut data = Array2::<u8>::zeros(grid.shape());
        Zip::indexed(&mut data).par_for_each(|(i, j), v| {
            let (x, y) = grid.transform.pixel_center(i, j);
            *v = u8::from(self.contains(x, y));
        });
        Mask::new(*grid, data)
    }
}
