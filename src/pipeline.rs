//! End-to-end comparison: filter, search, link, load, compose, export.

use crate::config::CompareConfig;
use crate::core::composite::{CompositeBuilder, MapLayer};
use crate::core::export::{ExportRequest, Exporter};
use crate::core::filter::{Aoi, CollectionFilter};
use crate::core::link::CollectionLinker;
use crate::core::palette::Palette;
use crate::core::shading::ConfidenceShader;
use crate::core::view::SplitView;
use crate::io::catalog::Catalog;
use crate::io::raster::{grid_for_region, region_pixel_count, GeoTiffWriter, RasterReader};
use crate::types::{AnalysisGrid, CompareError, CompareResult, Image, ImageRecord, LinkedRecord};
use ndarray::Array3;
use std::path::PathBuf;
use std::time::Instant;

/// File name of the wipe preview inside the output directory
pub const PREVIEW_FILE: &str = "split_view_preview.tif";

/// Largest analysis grid a run holds in memory (about 20 000 x 20 000)
pub const MAX_ANALYSIS_PIXELS: f64 = 4e8;

/// Everything a comparison run produces
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub linked: LinkedRecord,
    pub image: Image,
    pub left: MapLayer,
    pub right: MapLayer,
    pub view: SplitView,
    pub preview: Option<PathBuf>,
    pub exports: Vec<PathBuf>,
}

/// Runs one comparison for an AOI under a configuration
pub struct ComparisonPipeline {
    config: CompareConfig,
    aoi: Aoi,
}

impl ComparisonPipeline {
    /// Validates the configuration before anything is fetched
    pub fn new(config: CompareConfig, aoi: Aoi) -> CompareResult<Self> {
        config.validate()?;
        Ok(Self { config, aoi })
    }

    /// AOI from `config.aoi_path`
    pub fn from_config(config: CompareConfig) -> CompareResult<Self> {
        let path = config
            .aoi_path
            .clone()
            .ok_or_else(|| CompareError::Config("no AOI given".to_string()))?;
        log::info!("Reading AOI: {}", path.display());
        let aoi = Aoi::from_geojson_str(&std::fs::read_to_string(&path)?)?;
        Self::new(config, aoi)
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    pub fn aoi(&self) -> &Aoi {
        &self.aoi
    }

    pub fn filter(&self) -> CompareResult<CollectionFilter> {
        Ok(CollectionFilter::new(self.aoi.clone(), self.config.window()?))
    }

    /// Filtered records of the classification and reflectance collections
    pub fn search(&self, filter: &CollectionFilter) -> CompareResult<(Vec<ImageRecord>, Vec<ImageRecord>)> {
        let classification = search_one(
            self.config.classification.open(&self.config.http)?.as_ref(),
            filter,
        )?;
        let reflectance = search_one(
            self.config.reflectance.open(&self.config.http)?.as_ref(),
            filter,
        )?;
        if classification.is_empty() || reflectance.is_empty() {
            return Err(CompareError::NoData(format!(
                "no imagery found for given date/region ({} classification, {} reflectance image(s) in {})",
                classification.len(),
                reflectance.len(),
                filter.window.to_stac_interval()
            )));
        }
        Ok((classification, reflectance))
    }

    pub fn link(&self, classification: &[ImageRecord], reflectance: &[ImageRecord]) -> CompareResult<LinkedRecord> {
        CollectionLinker::new(self.config.link).link_first(classification, reflectance)
    }

    pub fn grid(&self) -> CompareResult<AnalysisGrid> {
        let epsg = self.config.epsg()?;
        let pixels = region_pixel_count(&self.aoi, epsg, self.config.grid.scale)?;
        if !(pixels <= MAX_ANALYSIS_PIXELS) {
            return Err(CompareError::Config(format!(
                "analysis grid of {:.0} pixels at {} m exceeds {:e}; use a coarser scale or a smaller AOI",
                pixels, self.config.grid.scale, MAX_ANALYSIS_PIXELS
            )));
        }
        grid_for_region(&self.aoi, epsg, self.config.grid.scale)
    }

    pub fn composite_builder(&self) -> CompareResult<CompositeBuilder> {
        let shader = ConfidenceShader::new(self.config.shading.clone())?;
        Ok(CompositeBuilder::new(Palette::dynamic_world()?, shader)
            .with_label_band(self.config.label_band.clone())
            .with_vis(self.config.display.true_color, self.config.display.shaded_label))
    }

    /// Export requests, checked against the AOI before any pixel is read
    pub fn export_requests(&self) -> CompareResult<Vec<ExportRequest>> {
        self.config
            .exports
            .iter()
            .map(|settings| settings.request(&self.aoi))
            .collect()
    }

    pub fn run(&self) -> CompareResult<ComparisonResult> {
        let started = Instant::now();
        let requests = self.export_requests()?;

        let filter = self.filter()?;
        log::info!(
            "Comparing {} and {} over {}",
            self.config.classification.id,
            self.config.reflectance.id,
            filter.window.to_stac_interval()
        );
        let (classification, reflectance) = self.search(&filter)?;
        let linked = self.link(&classification, &reflectance)?;
        log::info!(
            "Using {} linked to {} ({} s apart)",
            linked.primary.id,
            linked.secondary.id,
            linked.offset_seconds
        );

        let grid = self.grid()?;
        log::info!("Analysis grid: {}x{} in EPSG:{}", grid.width, grid.height, grid.epsg);
        let image = RasterReader::load_linked(&linked, &grid)?;

        let builder = self.composite_builder()?;
        let (left, right) = builder.layers(&image)?;
        let view = SplitView::new(&left, &right, &self.aoi).with_divider(self.config.display.divider)?;

        let output_dir = self.config.output_dir()?;
        let preview = if self.config.display.write_preview {
            let path = output_dir.join(PREVIEW_FILE);
            let rendered = view.render(&left, &right)?;
            write_preview(&rendered, &grid, &path)?;
            Some(path)
        } else {
            None
        };

        let exporter = Exporter::new(&output_dir);
        let mut exports = Vec::with_capacity(requests.len());
        for request in &requests {
            let path = if request.grid == grid {
                exporter.run(request, &image, &right.rgb, &self.config.label_band)?
            } else {
                // Different scale or CRS: resample the sources onto the export grid
                log::info!("Export '{}' needs its own grid, reloading", request.settings.description);
                let export_image = RasterReader::load_linked(&linked, &request.grid)?;
                let shaded = builder.shaded_classification(&export_image)?;
                exporter.run(request, &export_image, &shaded.rgb, &self.config.label_band)?
            };
            exports.push(path);
        }

        log::info!("Comparison finished in {:.2?}", started.elapsed());
        Ok(ComparisonResult {
            linked,
            image,
            left,
            right,
            view,
            preview,
            exports,
        })
    }
}

fn search_one(catalog: &dyn Catalog, filter: &CollectionFilter) -> CompareResult<Vec<ImageRecord>> {
    let records = catalog.search(filter)?;
    log::info!("{}: {} image(s) in window", catalog.describe(), records.len());
    Ok(records)
}

/// Rendered [0, 1] RGB to an 8-bit three-band GeoTIFF
fn write_preview(rendered: &Array3<f32>, grid: &AnalysisGrid, path: &std::path::Path) -> CompareResult<()> {
    let bytes = rendered.mapv(|v| (v * 255.0).round());
    GeoTiffWriter::write::<u8, _>(&bytes, grid, 0, path)
}
