//! Python bindings (`dwcompare._core`)

use crate::config::CompareConfig;
use crate::core::palette::Palette;
use crate::core::shading::{ConfidenceShader, ShadingParams};
use crate::pipeline::ComparisonPipeline;
use crate::types::CompareError;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray3};
use pyo3::prelude::*;
use pyo3::types::PyDict;

impl From<CompareError> for PyErr {
    fn from(err: CompareError) -> PyErr {
        match err {
            CompareError::Config(_) | CompareError::InvalidDate(_) | CompareError::InvalidGeometry(_) => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", err))
            }
            CompareError::Io(_) => PyErr::new::<pyo3::exceptions::PyIOError, _>(format!("{}", err)),
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", err)),
        }
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(run_comparison, m)?)?;
    m.add_function(wrap_pyfunction!(palette, m)?)?;
    m.add_function(wrap_pyfunction!(shade_confidence, m)?)?;
    Ok(())
}

/// Run the full comparison from a JSON config file and return a summary dict
#[pyfunction]
fn run_comparison(py: Python, config_path: String) -> PyResult<PyObject> {
    let config = CompareConfig::from_file(&config_path)?;
    let result = py.allow_threads(|| ComparisonPipeline::from_config(config)?.run())?;

    let summary = PyDict::new(py);
    summary.set_item("classification_id", &result.linked.primary.id)?;
    summary.set_item("reflectance_id", &result.linked.secondary.id)?;
    summary.set_item("offset_seconds", result.linked.offset_seconds)?;
    summary.set_item("bands", result.image.band_names.clone())?;
    summary.set_item("left_layer", &result.view.left_layer)?;
    summary.set_item("right_layer", &result.view.right_layer)?;
    summary.set_item("center", result.view.center)?;
    summary.set_item("zoom", result.view.zoom)?;
    summary.set_item(
        "preview",
        result.preview.map(|p| p.to_string_lossy().to_string()),
    )?;
    summary.set_item(
        "exports",
        result
            .exports
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect::<Vec<_>>(),
    )?;
    Ok(summary.into())
}

/// Dynamic World classes as (name, hex color) pairs, in label order
#[pyfunction]
fn palette() -> PyResult<Vec<(String, String)>> {
    Ok(Palette::dynamic_world()?
        .entries()
        .iter()
        .map(|e| (e.name.clone(), e.color.to_hex()))
        .collect())
}

/// Shading raster for a (classes, rows, cols) probability stack
#[pyfunction]
#[pyo3(signature = (probabilities, cell_size, azimuth=270.0, elevation=45.0))]
fn shade_confidence<'py>(
    py: Python<'py>,
    probabilities: PyReadonlyArray3<f32>,
    cell_size: f64,
    azimuth: f64,
    elevation: f64,
) -> PyResult<&'py PyArray2<f32>> {
    let shader = ConfidenceShader::new(ShadingParams {
        azimuth,
        elevation,
        ..Default::default()
    })?;
    let shading = shader.shade_probabilities(probabilities.as_array(), cell_size)?;
    Ok(shading.into_pyarray(py))
}
