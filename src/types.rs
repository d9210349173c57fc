use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued backscatter, angle or elevation samples
pub type SarReal = f32;

/// 2D real-valued grid (rows x cols), `NaN` marks no-data
pub type SarRealImage = Array2<SarReal>;

/// 2D binary mask (1 = valid, 0 = invalid)
pub type MaskImage = Array2<u8>;

/// EPSG code of WGS84 geographic coordinates
pub const EPSG_WGS84: u32 = 4326;

/// Metres per degree of latitude on the WGS84 ellipsoid (mean)
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    #[default]
    VH,
    HV,
    HH,
}

impl Polarization {
    /// Band name used for this polarization in scene files
    pub fn band_name(&self) -> &'static str {
        match self {
            Polarization::VV => "VV",
            Polarization::VH => "VH",
            Polarization::HV => "HV",
            Polarization::HH => "HH",
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.band_name())
    }
}

impl std::str::FromStr for Polarization {
    type Err = SiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SiError::Config(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionMode {
    #[default]
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

/// Orbit direction at acquisition time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbitPass {
    Ascending,
    Descending,
}

/// Geospatial bounding box in grid CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map coordinate, pixel centres at integer + 0.5
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.top_left_y) / self.pixel_height,
            (x - self.top_left_x) / self.pixel_width,
        )
    }
}

/// Per-scene attributes carried alongside the raster bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    pub acquired: DateTime<Utc>,
    /// Relative orbit number (acquisition path)
    pub relative_orbit: u32,
    pub polarizations: Vec<Polarization>,
    pub instrument_mode: AcquisitionMode,
    pub orbit_pass: Option<OrbitPass>,
    /// Platform heading in degrees clockwise from north, if known
    pub heading_deg: Option<f64>,
}

/// Error types for change-detection processing
#[derive(Debug, thiserror::Error)]
pub enum SiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Missing band '{band}' in scene {scene}")]
    MissingBand { scene: String, band: String },

    #[error("Grid alignment error: {0}")]
    Alignment(String),

    #[error("Empty reduction: {0}")]
    EmptyReduction(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Processing error: {0}")]
    Processing(String),
}

impl SiError {
    /// Errors that only invalidate a single scene or image and may be skipped
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SiError::MissingBand { .. } | SiError::EmptyReduction(_) | SiError::Alignment(_)
        )
    }
}

/// Result type for change-detection operations
pub type SiResult<T> = Result<T, SiError>;
