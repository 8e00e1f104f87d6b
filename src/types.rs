use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Real-valued pixel type used for every band after loading
pub type Pixel = f32;

/// Band-sequential raster stack (band x row x col)
pub type BandStack = Array3<Pixel>;

/// Geospatial bounding box (EPSG:4326 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Whether two boxes share any area (touching edges count)
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// STAC ordering: `[west, south, east, north]`
    pub fn to_stac(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn from_stac(bbox: &[f64]) -> Option<Self> {
        match bbox.len() {
            4 => Some(Self {
                min_lon: bbox[0],
                min_lat: bbox[1],
                max_lon: bbox[2],
                max_lat: bbox[3],
            }),
            // 3D bbox: [west, south, min_z, east, north, max_z]
            6 => Some(Self {
                min_lon: bbox[0],
                min_lat: bbox[1],
                max_lon: bbox[3],
                max_lat: bbox[4],
            }),
            _ => None,
        }
    }
}

/// Geospatial transformation parameters
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

    /// World coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let px = col as f64 + 0.5;
        let py = row as f64 + 0.5;
        (
            self.top_left_x + px * self.pixel_width + py * self.rotation_x,
            self.top_left_y + px * self.rotation_y + py * self.pixel_height,
        )
    }

    /// Fractional (col, row) for a world coordinate, north-up grids only
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }
}

/// Pixel grid every band is resampled onto before any computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisGrid {
    pub epsg: u32,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    /// Nominal pixel size in meters, used for terrain-style derivatives
    pub cell_size_m: f64,
}

impl AnalysisGrid {
    pub fn pixel_count(&self) -> u64 {
        (self.width as u64).saturating_mul(self.height as u64)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

/// Where a single band of an image lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSource {
    pub href: String,
    /// 1-based band index inside the asset
    pub band_index: usize,
}

/// Catalog metadata of one image (nothing is read from disk yet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub collection: String,
    pub acquired: DateTime<Utc>,
    pub bbox: Option<BoundingBox>,
    /// Band name -> asset, in catalog band order
    pub bands: BTreeMap<String, AssetSource>,
    /// Band names in their declared order
    pub band_order: Vec<String>,
}

impl ImageRecord {
    pub fn band_names(&self) -> &[String] {
        &self.band_order
    }

    pub fn source(&self, band: &str) -> Option<&AssetSource> {
        self.bands.get(band)
    }
}

/// A primary record with the temporally matched secondary record attached
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedRecord {
    pub primary: ImageRecord,
    pub secondary: ImageRecord,
    /// Bands copied over from the secondary collection
    pub linked_bands: Vec<String>,
    /// |primary.acquired - secondary.acquired| in seconds
    pub offset_seconds: i64,
}

impl LinkedRecord {
    /// Band names of the linked image: primary bands then linked bands
    pub fn band_names(&self) -> Vec<String> {
        let mut names = self.primary.band_order.clone();
        names.extend(self.linked_bands.iter().cloned());
        names
    }

    /// Resolve a band of the linked image to its asset
    pub fn source(&self, band: &str) -> Option<&AssetSource> {
        if self.linked_bands.iter().any(|b| b == band) {
            self.secondary.source(band)
        } else {
            self.primary.source(band)
        }
    }
}

/// Pixel data of an image materialised on an analysis grid
#[derive(Debug, Clone)]
pub struct Image {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub band_names: Vec<String>,
    pub data: BandStack,
    pub grid: AnalysisGrid,
}

impl Image {
    pub fn new(
        id: impl Into<String>,
        acquired: DateTime<Utc>,
        band_names: Vec<String>,
        data: BandStack,
        grid: AnalysisGrid,
    ) -> CompareResult<Self> {
        let (bands, rows, cols) = data.dim();
        if bands != band_names.len() {
            return Err(CompareError::InvalidFormat(format!(
                "image has {} bands but {} band names",
                bands,
                band_names.len()
            )));
        }
        if (rows, cols) != grid.shape() {
            return Err(CompareError::InvalidFormat(format!(
                "image shape {}x{} does not match grid {}x{}",
                rows, cols, grid.height, grid.width
            )));
        }
        Ok(Self {
            id: id.into(),
            acquired,
            band_names,
            data,
            grid,
        })
    }

    pub fn band_index(&self, name: &str) -> CompareResult<usize> {
        self.band_names
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| {
                CompareError::InvalidFormat(format!(
                    "band '{}' not found in image {} (bands: {:?})",
                    name, self.id, self.band_names
                ))
            })
    }

    pub fn band(&self, name: &str) -> CompareResult<ArrayView2<'_, Pixel>> {
        let idx = self.band_index(name)?;
        Ok(self.data.slice(s![idx, .., ..]))
    }

    /// Copy of the named bands, in the order requested
    pub fn select(&self, names: &[&str]) -> CompareResult<BandStack> {
        let (_, rows, cols) = self.data.dim();
        let mut out = Array3::<Pixel>::zeros((names.len(), rows, cols));
        for (i, name) in names.iter().enumerate() {
            let band = self.band(name)?;
            out.slice_mut(s![i, .., ..]).assign(&band);
        }
        Ok(out)
    }

    pub fn band_owned(&self, name: &str) -> CompareResult<Array2<Pixel>> {
        Ok(self.band(name)?.to_owned())
    }
}

/// Error types for comparison processing
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Export limit exceeded: {0}")]
    ExportLimit(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

/// Result type for comparison operations
pub type CompareResult<T> = Result<T, CompareError>;
