//! Run configuration.
//!
//! Defaults: a 2-day window starting
//! 2021-04-02, Dynamic World linked to harmonized Sentinel-2, analysis at
//! 10 m in EPSG:4326.

use crate::core::composite::VisParams;
use crate::core::export::ExportSettings;
use crate::core::filter::TimeWindow;
use crate::core::link::LinkStrategy;
use crate::core::palette::CLASS_NAMES;
use crate::core::shading::ShadingParams;
use crate::io::catalog::{CatalogSource, CollectionSpec, HttpOptions};
use crate::io::raster::parse_epsg;
use crate::io::stac::BandMapping;
use crate::types::{CompareError, CompareResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DYNAMIC_WORLD_COLLECTION: &str = "GOOGLE/DYNAMICWORLD/V1";
pub const SENTINEL2_COLLECTION: &str = "COPERNICUS/S2_HARMONIZED";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "DWCOMPARE_CACHE_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub crs: String,
    /// Pixel size in meters
    pub scale: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            crs: "EPSG:4326".to_string(),
            scale: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub true_color: VisParams,
    pub shaded_label: VisParams,
    /// Wipe divider of the preview, fraction from the left
    pub divider: f64,
    /// Write the wipe preview GeoTIFF into the output directory
    pub write_preview: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            true_color: VisParams::reflectance(),
            shaded_label: VisParams::shaded_label(),
            divider: 0.5,
            write_preview: true,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Window start, `YYYY-MM-DD` or RFC 3339
    pub start: String,
    /// Window length in days
    pub days: i64,
    /// GeoJSON file holding the AOI polygon
    pub aoi_path: Option<PathBuf>,
    pub classification: CollectionSpec,
    pub reflectance: CollectionSpec,
    /// Label band of the classification collection
    pub label_band: String,
    pub link: LinkStrategy,
    pub grid: GridConfig,
    pub shading: ShadingParams,
    pub display: DisplayConfig,
    pub http: HttpOptions,
    pub exports: Vec<ExportSettings>,
    /// Where previews and exports go; defaults to the cache directory
    pub output_dir: Option<PathBuf>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        let mut dw_bands: Vec<BandMapping> = CLASS_NAMES
            .iter()
            .map(|name| BandMapping::new(name, name, 1))
            .collect();
        dw_bands.push(BandMapping::new("label", "label", 1));

        Self {
            start: "2021-04-02".to_string(),
            days: 2,
            aoi_path: None,
            classification: CollectionSpec {
                id: DYNAMIC_WORLD_COLLECTION.to_string(),
                source: CatalogSource::Local {
                    path: PathBuf::from("dynamic_world_items.json"),
                },
                bands: dw_bands,
            },
            reflectance: CollectionSpec {
                id: SENTINEL2_COLLECTION.to_string(),
                source: CatalogSource::Local {
                    path: PathBuf::from("sentinel2_items.json"),
                },
                bands: vec![
                    BandMapping::new("B2", "B02", 1),
                    BandMapping::new("B3", "B03", 1),
                    BandMapping::new("B4", "B04", 1),
                    BandMapping::new("B8", "B08", 1),
                ],
            },
            label_band: "label".to_string(),
            link: LinkStrategy::default(),
            grid: GridConfig::default(),
            shading: ShadingParams::default(),
            display: DisplayConfig::default(),
            http: HttpOptions::default(),
            exports: Vec::new(),
            output_dir: None,
        }
    }
}

impl CompareConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> CompareResult<Self> {
        log::info!("Loading configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_json::from_str(&content).map_err(|e| {
            CompareError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        if let Some(dir) = path.as_ref().parent() {
            config.rebase(dir);
        }
        Ok(config)
    }

    /// Resolve relative file paths against `dir` (the config file's directory)
    pub fn rebase(&mut self, dir: &Path) {
        let rebase_path = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        if let Some(aoi) = self.aoi_path.as_mut() {
            rebase_path(aoi);
        }
        for collection in [&mut self.classification, &mut self.reflectance] {
            if let CatalogSource::Local { path } = &mut collection.source {
                rebase_path(path);
            }
        }
    }

    pub fn window(&self) -> CompareResult<TimeWindow> {
        TimeWindow::from_date_str(&self.start, self.days)
    }

    pub fn epsg(&self) -> CompareResult<u32> {
        parse_epsg(&self.grid.crs)
    }

    /// Output directory: explicit, then `$DWCOMPARE_CACHE_DIR`, then the
    /// platform cache directory
    pub fn output_dir(&self) -> CompareResult<PathBuf> {
        if let Some(dir) = &self.output_dir {
            return Ok(dir.clone());
        }
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        dirs::cache_dir()
            .map(|d| d.join("dwcompare"))
            .ok_or_else(|| CompareError::Config("no output directory and no platform cache directory".to_string()))
    }

    /// Check everything that can be checked before touching a catalog
    pub fn validate(&self) -> CompareResult<()> {
        self.window()?;
        self.epsg()?;
        if !(self.grid.scale > 0.0 && self.grid.scale.is_finite()) {
            return Err(CompareError::Config(format!("grid scale {} must be positive", self.grid.scale)));
        }
        self.shading.validate()?;
        VisParams::new(self.display.true_color.min, self.display.true_color.max)?;
        VisParams::new(self.display.shaded_label.min, self.display.shaded_label.max)?;
        if !(0.0..=1.0).contains(&self.display.divider) {
            return Err(CompareError::Config(format!("divider {} outside [0, 1]", self.display.divider)));
        }
        if self.label_band.is_empty() {
            return Err(CompareError::Config("label band name is empty".to_string()));
        }
        if !self.classification.bands.is_empty() {
            let names: Vec<&str> = self.classification.bands.iter().map(|b| b.band.as_str()).collect();
            for required in CLASS_NAMES.iter().copied().chain(std::iter::once(self.label_band.as_str())) {
                if !names.contains(&required) {
                    return Err(CompareError::Config(format!(
                        "classification collection does not map band '{}'",
                        required
                    )));
                }
            }
        }
        for collection in [&self.classification, &self.reflectance] {
            if collection.id.trim().is_empty() {
                return Err(CompareError::Config("collection id is empty".to_string()));
            }
            if let CatalogSource::Stac { url } = &collection.source {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(CompareError::Config(format!("STAC url '{}' is not http(s)", url)));
                }
            }
        }
        Ok(())
    }
}
