use approx::assert_relative_eq;
use dwcompare::config::CompareConfig;
use dwcompare::core::composite::{SHADED_LABEL_LAYER, TRUE_COLOR_LAYER};
use dwcompare::core::export::{ExportSettings, ExportTarget};
use dwcompare::core::filter::Aoi;
use dwcompare::core::palette::CLASS_NAMES;
use dwcompare::io::raster::{GeoTiffWriter, RasterReader};
use dwcompare::io::catalog::CatalogSource;
use dwcompare::io::stac::BandMapping;
use dwcompare::pipeline::{ComparisonPipeline, PREVIEW_FILE};
use dwcompare::types::{AnalysisGrid, AssetSource, CompareError};
use ndarray::{s, Array3};
use serde_json::json;
use std::path::Path;

const DW: &str = "GOOGLE/DYNAMICWORLD/V1";
const S2: &str = "COPERNICUS/S2_HARMONIZED";

// Left half trees at 0.8, right half built area at 0.6
const TREES: usize = 1;
const BUILT: usize = 6;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// About 1.1 km x 1.1 km north of Milan
fn aoi() -> Aoi {
    Aoi::from_geojson(&json!({
        "type": "Polygon",
        "coordinates": [[[9.19, 45.46], [9.20, 45.46], [9.20, 45.47], [9.19, 45.47], [9.19, 45.46]]]
    }))
    .unwrap()
}

fn write_dynamic_world(grid: &AnalysisGrid, path: &Path) {
    let (rows, cols) = grid.shape();
    let mut stack = Array3::<f32>::from_elem((10, rows, cols), 0.025);
    let half = cols / 2;
    stack.slice_mut(s![TREES, .., ..half]).fill(0.8);
    stack.slice_mut(s![BUILT, .., half..]).fill(0.6);
    stack.slice_mut(s![9, .., ..half]).fill(TREES as f32);
    stack.slice_mut(s![9, .., half..]).fill(BUILT as f32);
    GeoTiffWriter::write::<f32, _>(&stack, grid, -9999.0, path).unwrap();
}

fn write_sentinel2(grid: &AnalysisGrid, dir: &Path) {
    let (rows, cols) = grid.shape();
    for (name, value) in [("B02", 0.0), ("B03", 3000.0), ("B04", 1500.0), ("B08", 2000.0)] {
        let band = Array3::<f32>::from_elem((1, rows, cols), value);
        GeoTiffWriter::write::<u16, _>(&band, grid, 65535, dir.join(format!("{}.tif", name))).unwrap();
    }
}

fn item(id: &str, collection: &str, datetime: &str, assets: serde_json::Value) -> serde_json::Value {
    json!({
        "type": "Feature",
        "id": id,
        "collection": collection,
        "bbox": [9.0, 45.3, 9.4, 45.6],
        "properties": { "datetime": datetime },
        "assets": assets
    })
}

/// Writes rasters plus one ItemCollection holding both collections
fn fixture(dir: &Path) -> CompareConfig {
    let mut config = CompareConfig::default();
    let grid = ComparisonPipeline::new(config.clone(), aoi()).unwrap().grid().unwrap();

    write_dynamic_world(&grid, &dir.join("dw.tif"));
    write_sentinel2(&grid, dir);

    let dw_assets = json!({
        "probabilities": { "href": "dw.tif", "type": "image/tiff; application=geotiff" },
        "label": { "href": "dw.tif", "type": "image/tiff; application=geotiff" }
    });
    let s2_assets = json!({
        "B02": { "href": "B02.tif" },
        "B03": { "href": "B03.tif" },
        "B04": { "href": "B04.tif" },
        "B08": { "href": "B08.tif" }
    });
    let items = json!({
        "type": "FeatureCollection",
        "features": [
            item("dw_b", DW, "2021-04-03T10:30:00Z", dw_assets.clone()),
            item("dw_a", DW, "2021-04-02T10:20:00Z", dw_assets.clone()),
            item("dw_late", DW, "2021-04-10T10:20:00Z", dw_assets),
            item("s2_far", S2, "2021-04-03T10:29:00Z", s2_assets.clone()),
            item("s2_near", S2, "2021-04-02T10:19:50Z", s2_assets)
        ]
    });
    let catalog = dir.join("items.json");
    std::fs::write(&catalog, items.to_string()).unwrap();

    let mut bands: Vec<BandMapping> = CLASS_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| BandMapping::new(name, "probabilities", i + 1))
        .collect();
    bands.push(BandMapping::new("label", "label", 10));

    config.classification.source = CatalogSource::Local { path: catalog.clone() };
    config.classification.bands = bands;
    config.reflectance.source = CatalogSource::Local { path: catalog };
    config.output_dir = Some(dir.join("out"));
    config
}

#[test]
fn test_end_to_end_comparison() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture(dir.path());
    config.exports.push(ExportSettings::new("DW_LabelHillshade_2021_04_02", ExportTarget::Visualization));
    config.exports.push(ExportSettings::new("DW_Label_2021_04_02", ExportTarget::RawLabel));

    let pipeline = ComparisonPipeline::new(config, aoi()).unwrap();
    let result = pipeline.run().unwrap();

    // Only the first classification in the window is used, paired with the closest scene
    assert_eq!(result.linked.primary.id, "dw_a");
    assert_eq!(result.linked.secondary.id, "s2_near");
    assert_eq!(result.linked.offset_seconds, 10);
    assert_eq!(result.image.band_names.len(), 14);
    assert_eq!(&result.image.band_names[10..], &["B2", "B3", "B4", "B8"]);

    assert_eq!(result.view.left_layer, TRUE_COLOR_LAYER);
    assert_eq!(result.view.right_layer, SHADED_LABEL_LAYER);
    assert_eq!(result.left.shape(), result.right.shape());
    let (rows, cols) = result.left.shape();
    assert_eq!((rows, cols), (112, 112));

    // True color: R = B4 / 3000, G = B3 / 3000, B = B2 / 3000
    assert_relative_eq!(result.left.rgb[[0, 50, 10]], 0.5, epsilon = 1e-6);
    assert_relative_eq!(result.left.rgb[[1, 50, 10]], 1.0, epsilon = 1e-6);
    assert_relative_eq!(result.left.rgb[[2, 50, 10]], 0.0, epsilon = 1e-6);

    // Flat confidence away from the class boundary shades to color x confidence
    assert_relative_eq!(result.right.rgb[[0, 50, 10]], 0x39 as f32 / 255.0 * 0.8, epsilon = 1e-4);
    assert_relative_eq!(result.right.rgb[[0, 50, 100]], 0xc4 as f32 / 255.0 * 0.6, epsilon = 1e-4);

    let preview = result.preview.clone().unwrap();
    assert_eq!(preview, dir.path().join("out").join(PREVIEW_FILE));
    assert!(preview.exists());

    assert_eq!(result.exports.len(), 2);
    for path in &result.exports {
        assert!(path.exists(), "missing export {}", path.display());
        assert!(path.starts_with(dir.path().join("out").join("EarthEngine_Exports")));
    }

    let grid = pipeline.grid().unwrap();
    let labels = RasterReader::read_band_on_grid(
        &AssetSource { href: result.exports[1].to_string_lossy().to_string(), band_index: 1 },
        &grid,
    )
    .unwrap();
    assert_eq!(labels[[0, 0]], TREES as f32);
    assert_eq!(labels[[rows - 1, cols - 1]], BUILT as f32);

    let shaded_red = RasterReader::read_band_on_grid(
        &AssetSource { href: result.exports[0].to_string_lossy().to_string(), band_index: 1 },
        &grid,
    )
    .unwrap();
    assert_relative_eq!(shaded_red[[50, 10]], result.right.rgb[[0, 50, 10]], epsilon = 1e-6);
}

#[test]
fn test_empty_window_reports_no_data() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture(dir.path());
    config.start = "2022-01-01".to_string();

    let pipeline = ComparisonPipeline::new(config, aoi()).unwrap();
    match pipeline.run() {
        Err(CompareError::NoData(msg)) => assert!(msg.contains("no imagery found")),
        other => panic!("expected NoData, got {:?}", other.map(|r| r.linked.primary.id)),
    }
}

#[test]
fn test_aoi_outside_footprints_reports_no_data() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path());
    let far_away = Aoi::from_ring(vec![(-70.0, -30.0), (-69.99, -30.0), (-69.99, -29.99)]).unwrap();

    let pipeline = ComparisonPipeline::new(config, far_away).unwrap();
    let filter = pipeline.filter().unwrap();
    assert!(matches!(pipeline.search(&filter), Err(CompareError::NoData(_))));
}

#[test]
fn test_search_and_link_steps() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path());
    let pipeline = ComparisonPipeline::new(config, aoi()).unwrap();

    let filter = pipeline.filter().unwrap();
    let (classification, reflectance) = pipeline.search(&filter).unwrap();
    let ids: Vec<&str> = classification.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["dw_a", "dw_b"]);
    assert_eq!(reflectance.len(), 2);

    let linked = pipeline.link(&classification, &reflectance).unwrap();
    assert_eq!(linked.secondary.id, "s2_near");
    assert_eq!(linked.band_names().len(), 14);
}

#[test]
fn test_preview_can_be_disabled() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture(dir.path());
    config.display.write_preview = false;

    let result = ComparisonPipeline::new(config, aoi()).unwrap().run().unwrap();
    assert!(result.preview.is_none());
    assert!(!dir.path().join("out").join(PREVIEW_FILE).exists());
}
