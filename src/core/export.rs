use crate::core::filter::Aoi;
use crate::io::raster::{grid_for_region, parse_epsg, region_pixel_count, GeoTiffWriter};
use crate::types::{AnalysisGrid, BandStack, CompareError, CompareResult, Image};
use ndarray::Axis;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Allowed characters and length of an export description
const DESCRIPTION_PATTERN: &str = r"^[A-Za-z0-9_\-.,:;]{1,100}$";

/// Nodata value of the raw label export
pub const LABEL_NODATA: u8 = 255;

/// What gets exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportTarget {
    /// Shaded classification RGB (3 x float32)
    Visualization,
    /// Integer class labels (1 x uint8)
    RawLabel,
}

/// Export parameters as configured by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub description: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_crs")]
    pub crs: String,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: f64,
    pub target: ExportTarget,
}

fn default_folder() -> String {
    "EarthEngine_Exports".to_string()
}

fn default_scale() -> f64 {
    10.0
}

fn default_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_max_pixels() -> f64 {
    1e13
}

impl ExportSettings {
    pub fn new(description: &str, target: ExportTarget) -> Self {
        Self {
            description: description.to_string(),
            folder: default_folder(),
            scale: default_scale(),
            crs: default_crs(),
            max_pixels: default_max_pixels(),
            target,
        }
    }

    /// Validate against a region; nothing is read or written yet
    pub fn request(&self, region: &Aoi) -> CompareResult<ExportRequest> {
        let pattern = Regex::new(DESCRIPTION_PATTERN)
            .map_err(|e| CompareError::Processing(format!("Invalid description pattern: {}", e)))?;
        if !pattern.is_match(&self.description) {
            return Err(CompareError::Config(format!(
                "export description '{}' must be 1-100 characters of [A-Za-z0-9_-.,:;]",
                self.description
            )));
        }
        if self.folder.trim().is_empty() {
            return Err(CompareError::Config("export folder is empty".to_string()));
        }
        // Exports stay below the output directory
        let escapes = Path::new(&self.folder)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(CompareError::Config(format!(
                "export folder '{}' must be a relative path without '..'",
                self.folder
            )));
        }
        if !(self.max_pixels >= 1.0) {
            return Err(CompareError::Config(format!("max_pixels {} must be at least 1", self.max_pixels)));
        }

        let epsg = parse_epsg(&self.crs)?;
        let pixels = region_pixel_count(region, epsg, self.scale)?;
        if !(pixels <= self.max_pixels) {
            return Err(CompareError::ExportLimit(format!(
                "'{}' needs {:.0} pixels at {} m in {}, above max_pixels {:e}",
                self.description, pixels, self.scale, self.crs, self.max_pixels
            )));
        }
        let grid = grid_for_region(region, epsg, self.scale)?;

        log::debug!("Export '{}' validated: {} pixels", self.description, grid.pixel_count());
        Ok(ExportRequest {
            settings: self.clone(),
            grid,
        })
    }
}

/// A validated export, bound to its output grid
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub settings: ExportSettings,
    pub grid: AnalysisGrid,
}

impl ExportRequest {
    pub fn output_path(&self, root: &Path) -> PathBuf {
        root.join(&self.settings.folder)
            .join(format!("{}.tif", self.settings.description))
    }

    pub fn pixel_count(&self) -> u64 {
        self.grid.pixel_count()
    }
}

/// Writes validated exports under a root directory
pub struct Exporter {
    root: PathBuf,
}

impl Exporter {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Write the shaded RGB or the label band, depending on the target.
    ///
    /// `image` must be the linked image on the request's grid.
    pub fn run(
        &self,
        request: &ExportRequest,
        image: &Image,
        shaded_rgb: &BandStack,
        label_band: &str,
    ) -> CompareResult<PathBuf> {
        if image.grid != request.grid {
            return Err(CompareError::Processing(format!(
                "export '{}' grid differs from the processed image grid",
                request.settings.description
            )));
        }
        let path = request.output_path(&self.root);
        log::info!(
            "Exporting {:?} '{}' ({} pixels) to {}",
            request.settings.target,
            request.settings.description,
            request.pixel_count(),
            path.display()
        );

        match request.settings.target {
            ExportTarget::Visualization => {
                GeoTiffWriter::write::<f32, _>(shaded_rgb, &request.grid, f32::NAN, &path)?;
            }
            ExportTarget::RawLabel => {
                let labels = image.band_owned(label_band)?.insert_axis(Axis(0));
                GeoTiffWriter::write::<u8, _>(&labels, &request.grid, LABEL_NODATA, &path)?;
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aoi() -> Aoi {
        Aoi::from_ring(vec![(10.0, 45.0), (10.01, 45.0), (10.01, 45.01), (10.0, 45.01)]).unwrap()
    }

    #[test]
    fn test_default_request() {
        let settings = ExportSettings::new("DynamicWorld_LabelHillshade_2021_04_02", ExportTarget::Visualization);
        let request = settings.request(&aoi()).unwrap();
        assert_eq!(request.pixel_count(), 112 * 112);
        assert_eq!(
            request.output_path(Path::new("/tmp/out")),
            PathBuf::from("/tmp/out/EarthEngine_Exports/DynamicWorld_LabelHillshade_2021_04_02.tif")
        );
    }

    #[test]
    fn test_pixel_ceiling() {
        let mut settings = ExportSettings::new("too_big", ExportTarget::RawLabel);
        settings.max_pixels = 1000.0;
        match settings.request(&aoi()) {
            Err(CompareError::ExportLimit(msg)) => assert!(msg.contains("12544")),
            other => panic!("expected export limit error, got {:?}", other),
        }
    }

    #[test]
    fn test_tiny_scale_hits_the_pixel_ceiling() {
        let mut settings = ExportSettings::new("tiny", ExportTarget::RawLabel);
        settings.scale = 1e-12;
        assert!(matches!(settings.request(&aoi()), Err(CompareError::ExportLimit(_))));

        // A ceiling above what any grid may hold still refuses to build it
        settings.max_pixels = f64::MAX;
        assert!(matches!(settings.request(&aoi()), Err(CompareError::Config(_))));
    }

    #[test]
    fn test_folder_must_stay_below_the_output_root() {
        for folder in ["../outside", "/etc", "exports/../../x", ".."] {
            let mut settings = ExportSettings::new("ok", ExportTarget::RawLabel);
            settings.folder = folder.to_string();
            assert!(
                matches!(settings.request(&aoi()), Err(CompareError::Config(_))),
                "accepted folder {}",
                folder
            );
        }

        let mut nested = ExportSettings::new("ok", ExportTarget::RawLabel);
        nested.folder = "exports/2021".to_string();
        let request = nested.request(&aoi()).unwrap();
        assert_eq!(request.output_path(Path::new("/tmp/out")), PathBuf::from("/tmp/out/exports/2021/ok.tif"));
    }

    #[test]
    fn test_description_rules() {
        let bad = ExportSettings::new("has spaces", ExportTarget::RawLabel);
        assert!(matches!(bad.request(&aoi()), Err(CompareError::Config(_))));
        let long = ExportSettings::new(&"x".repeat(101), ExportTarget::RawLabel);
        assert!(long.request(&aoi()).is_err());
        let mut bad_crs = ExportSettings::new("ok", ExportTarget::RawLabel);
        bad_crs.crs = "WGS84".to_string();
        assert!(bad_crs.request(&aoi()).is_err());
    }
}
