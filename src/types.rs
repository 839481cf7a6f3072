use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued surface reflectance data
pub type Reflectance = f32;

/// 2D reflectance raster (rows x columns)
pub type BandImage = Array2<Reflectance>;

/// Per-pixel validity mask sharing the band grid
pub type MaskImage = Array2<bool>;

/// The six reflectance bands shared by Landsat and Sentinel-2 products,
/// in the order used by harmonization and topographic correction.
pub const STANDARD_BANDS: [&str; 6] = ["blue", "green", "red", "nir", "swir1", "swir2"];

/// Supported optical sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    Landsat7,
    Landsat8,
    Sentinel2,
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensor::Landsat7 => write!(f, "Landsat-7"),
            Sensor::Landsat8 => write!(f, "Landsat-8"),
            Sensor::Sentinel2 => write!(f, "Sentinel-2"),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Geospatial transformation parameters (grid to world)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up grid with square pixels and no rotation terms
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

    /// World coordinates of a (fractional) pixel center
    pub fn pixel_to_geo(&self, row: f64, col: f64) -> (f64, f64) {
        let cx = col + 0.5;
        let cy = row + 0.5;
        let x = self.top_left_x + cx * self.pixel_width + cy * self.rotation_x;
        let y = self.top_left_y + cx * self.rotation_y + cy * self.pixel_height;
        (x, y)
    }

    /// Fractional (row, col) of a world coordinate
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> CorrResult<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return Err(CorrectionError::Geometry(
                "geotransform is not invertible".to_string(),
            ));
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det - 0.5;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det - 0.5;
        Ok((row, col))
    }
}

/// Corner indices of a scene footprint quadrilateral
pub const UPPER_LEFT: usize = 0;
pub const LOWER_LEFT: usize = 1;
pub const LOWER_RIGHT: usize = 2;
pub const UPPER_RIGHT: usize = 3;

/// Non-axis-aligned scene outline: four corners ordered
/// upper-left, lower-left, lower-right, upper-right.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Footprint {
    corners: [[f64; 2]; 4],
}

impl Footprint {
    /// Build a footprint from a coordinate ring; the first four coordinates
    /// are used and must be present.
    pub fn from_coords(coords: &[[f64; 2]]) -> CorrResult<Self> {
        if coords.len() < 4 {
            return Err(CorrectionError::Geometry(format!(
                "footprint needs 4 corner coordinates, got {}",
                coords.len()
            )));
        }
        Ok(Self {
            corners: [coords[0], coords[1], coords[2], coords[3]],
        })
    }

    pub fn corner(&self, index: usize) -> [f64; 2] {
        self.corners[index]
    }

    pub fn upper_left(&self) -> [f64; 2] {
        self.corners[UPPER_LEFT]
    }

    pub fn lower_left(&self) -> [f64; 2] {
        self.corners[LOWER_LEFT]
    }

    pub fn lower_right(&self) -> [f64; 2] {
        self.corners[LOWER_RIGHT]
    }

    pub fn upper_right(&self) -> [f64; 2] {
        self.corners[UPPER_RIGHT]
    }

    /// Point-in-polygon test (ray casting) against the corner quadrilateral
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        let n = self.corners.len();
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.corners[i];
            let [xj, yj] = self.corners[j];
            if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Per-scene metadata carried through every correction stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    /// Shared scene identifier, also the join key for companion rasters
    pub scene_id: String,
    pub sensor: Sensor,
    /// Acquisition timestamp (UTC)
    pub acquired: DateTime<Utc>,
    pub footprint: Footprint,
    /// Coordinate reference system (EPSG code)
    pub epsg: u32,
    /// Pixel size in CRS units (meters)
    pub pixel_size: f64,
    pub geo_transform: GeoTransform,
    /// Sensor-reported mean solar zenith angle (degrees), when available
    pub sun_zenith_deg: Option<f64>,
    /// Sensor-reported mean solar azimuth angle (degrees), when available
    pub sun_azimuth_deg: Option<f64>,
}

/// A multispectral scene: named reflectance bands over one grid, an
/// explicit validity mask, and an optional integer QA raster.
///
/// Correction stages never mutate in place; each produces a new image with
/// replaced bands and a possibly narrowed mask.
#[derive(Debug, Clone)]
pub struct RasterImage {
    names: Vec<String>,
    bands: Vec<BandImage>,
    mask: MaskImage,
    qa: Option<Array2<u16>>,
    pub metadata: SceneMetadata,
}

impl RasterImage {
    /// Create an image from named bands; all bands must share one grid.
    pub fn new(metadata: SceneMetadata, bands: Vec<(String, BandImage)>) -> CorrResult<Self> {
        let (names, data): (Vec<_>, Vec<_>) = bands.into_iter().unzip();
        let dim = data
            .first()
            .map(|b| b.dim())
            .ok_or_else(|| CorrectionError::MissingInput("image has no bands".to_string()))?;
        for (name, band) in names.iter().zip(&data) {
            if band.dim() != dim {
                return Err(CorrectionError::ShapeMismatch(format!(
                    "band '{}' is {:?}, expected {:?}",
                    name,
                    band.dim(),
                    dim
                )));
            }
        }
        Ok(Self {
            names,
            bands: data,
            mask: Array2::from_elem(dim, true),
            qa: None,
            metadata,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn band_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Look up a band by name; a missing band is a per-scene failure,
    /// never silently skipped.
    pub fn band(&self, name: &str) -> CorrResult<&BandImage> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.bands[i])
            .ok_or_else(|| {
                CorrectionError::MissingInput(format!("required band '{}' is absent", name))
            })
    }

    pub fn iter_bands(&self) -> impl Iterator<Item = (&str, &BandImage)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.bands.iter())
    }

    pub fn mask(&self) -> &MaskImage {
        &self.mask
    }

    pub fn qa(&self) -> CorrResult<&Array2<u16>> {
        self.qa.as_ref().ok_or_else(|| {
            CorrectionError::MissingInput("required QA raster is absent".to_string())
        })
    }

    pub fn has_qa(&self) -> bool {
        self.qa.is_some()
    }

    /// Attach an integer QA raster sharing the band grid
    pub fn with_qa(mut self, qa: Array2<u16>) -> CorrResult<Self> {
        if qa.dim() != self.dim() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "QA raster is {:?}, expected {:?}",
                qa.dim(),
                self.dim()
            )));
        }
        self.qa = Some(qa);
        Ok(self)
    }

    /// New image with the same metadata, mask and QA but replaced bands
    pub fn with_bands(&self, bands: Vec<(String, BandImage)>) -> CorrResult<Self> {
        let mut out = Self::new(self.metadata.clone(), bands)?;
        if out.dim() != self.dim() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "replacement bands are {:?}, expected {:?}",
                out.dim(),
                self.dim()
            )));
        }
        out.mask = self.mask.clone();
        out.qa = self.qa.clone();
        Ok(out)
    }

    /// New image with the validity mask narrowed by AND with `other`.
    /// A pixel excluded here stays excluded downstream.
    pub fn and_mask(&self, other: &MaskImage) -> CorrResult<Self> {
        if other.dim() != self.dim() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "mask is {:?}, expected {:?}",
                other.dim(),
                self.dim()
            )));
        }
        let mut out = self.clone();
        ndarray::Zip::from(&mut out.mask)
            .and(other)
            .for_each(|m, &o| *m = *m && o);
        Ok(out)
    }

    /// Replace the mask wholesale. Used by stages that resample or warp the
    /// grid and therefore rebuild validity from scratch.
    pub fn with_mask(&self, mask: MaskImage) -> CorrResult<Self> {
        if mask.dim() != self.dim() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "mask is {:?}, expected {:?}",
                mask.dim(),
                self.dim()
            )));
        }
        let mut out = self.clone();
        out.mask = mask;
        Ok(out)
    }

    /// Select input bands and rename them in one step, preserving the QA
    /// raster, mask and metadata. Input and output name lists must pair up.
    pub fn select_rename(&self, input: &[&str], output: &[&str]) -> CorrResult<Self> {
        if input.len() != output.len() {
            return Err(CorrectionError::ShapeMismatch(format!(
                "{} input names vs {} output names",
                input.len(),
                output.len()
            )));
        }
        let mut bands = Vec::with_capacity(input.len());
        for (src, dst) in input.iter().zip(output) {
            bands.push((dst.to_string(), self.band(src)?.clone()));
        }
        self.with_bands(bands)
    }

    /// Count of pixels currently valid
    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Error types for reflectance correction
#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("degenerate fit for band '{band}': {reason}")]
    DegenerateFit { band: String, reason: String },

    #[error("alignment failure: {0}")]
    Alignment(String),

    #[error("processing error: {0}")]
    Processing(String),
}

/// Result type for correction operations
pub type CorrResult<T> = Result<T, CorrectionError>;
