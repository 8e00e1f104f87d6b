use crate::core::palette::Palette;
use crate::core::shading::ConfidenceShader;
use crate::types::{CompareError, CompareResult, Image, Pixel};
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

pub const TRUE_COLOR_LAYER: &str = "Sentinel-2 (True Color)";
pub const SHADED_LABEL_LAYER: &str = "Dynamic World (Label + Hillshade)";

/// Bands of the true-color composite (red, green, blue)
pub const TRUE_COLOR_BANDS: [&str; 3] = ["B4", "B3", "B2"];

/// Linear display stretch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub min: f64,
    pub max: f64,
}

impl VisParams {
    pub fn new(min: f64, max: f64) -> CompareResult<Self> {
        if !(min.is_finite() && max.is_finite()) || max <= min {
            return Err(CompareError::Config(format!(
                "display range [{}, {}] is empty",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// Reflectance stretch used for Sentinel-2 L1C digital numbers
    pub fn reflectance() -> Self {
        Self { min: 0.0, max: 3000.0 }
    }

    /// Stretch for the shaded classification
    pub fn shaded_label() -> Self {
        Self { min: 0.0, max: 0.65 }
    }

    /// Map a value into [0, 1]; NaN stays NaN
    pub fn stretch(&self, value: Pixel) -> Pixel {
        let t = (value as f64 - self.min) / (self.max - self.min);
        t.clamp(0.0, 1.0) as Pixel
    }

    pub fn apply(&self, data: &Array3<Pixel>) -> Array3<Pixel> {
        data.mapv(|v| if v.is_nan() { v } else { self.stretch(v) })
    }
}

/// A named RGB layer ready for display (3 x rows x cols, values in [0, 1]
/// before the display stretch)
#[derive(Debug, Clone)]
pub struct MapLayer {
    pub name: String,
    pub rgb: Array3<Pixel>,
    pub vis: VisParams,
}

impl MapLayer {
    pub fn new(name: impl Into<String>, rgb: Array3<Pixel>, vis: VisParams) -> CompareResult<Self> {
        if rgb.len_of(Axis(0)) != 3 {
            return Err(CompareError::InvalidFormat(format!(
                "layer needs 3 bands, got {}",
                rgb.len_of(Axis(0))
            )));
        }
        Ok(Self {
            name: name.into(),
            rgb,
            vis,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.rgb.dim();
        (rows, cols)
    }

    /// Display-stretched pixels, NaN rendered black
    pub fn rendered(&self) -> Array3<Pixel> {
        self.vis.apply(&self.rgb).mapv(|v| if v.is_nan() { 0.0 } else { v })
    }
}

/// Builds the two comparison layers from a linked image
pub struct CompositeBuilder {
    palette: Palette,
    shader: ConfidenceShader,
    label_band: String,
    true_color: VisParams,
    shaded: VisParams,
}

impl CompositeBuilder {
    pub fn new(palette: Palette, shader: ConfidenceShader) -> Self {
        Self {
            palette,
            shader,
            label_band: "label".to_string(),
            true_color: VisParams::reflectance(),
            shaded: VisParams::shaded_label(),
        }
    }

    pub fn with_label_band(mut self, band: impl Into<String>) -> Self {
        self.label_band = band.into();
        self
    }

    pub fn with_vis(mut self, true_color: VisParams, shaded: VisParams) -> Self {
        self.true_color = true_color;
        self.shaded = shaded;
        self
    }

    /// B4/B3/B2 composite; the stretch is applied so the layer is in [0, 1]
    pub fn true_color(&self, image: &Image) -> CompareResult<MapLayer> {
        let rgb = image.select(&TRUE_COLOR_BANDS)?;
        let stretched = self.true_color.apply(&rgb);
        MapLayer::new(TRUE_COLOR_LAYER, stretched, VisParams { min: 0.0, max: 1.0 })
    }

    /// Palette-colored labels in [0, 1]
    pub fn label_rgb(&self, image: &Image) -> CompareResult<Array3<Pixel>> {
        let labels = image.band(&self.label_band)?;
        self.palette.colorize(labels)
    }

    /// Shading raster from the class-probability bands
    pub fn shading(&self, image: &Image) -> CompareResult<Array2<Pixel>> {
        let classes = self.palette.class_names();
        let probabilities = image.select(&classes)?;
        self.shader
            .shade_probabilities(probabilities.view(), image.grid.cell_size_m)
    }

    /// Label colors multiplied by the confidence shading
    pub fn shaded_classification(&self, image: &Image) -> CompareResult<MapLayer> {
        let mut rgb = self.label_rgb(image)?;
        let shading = self.shading(image)?;
        for mut channel in rgb.axis_iter_mut(Axis(0)) {
            channel *= &shading;
        }
        MapLayer::new(SHADED_LABEL_LAYER, rgb, self.shaded)
    }

    /// Both layers, left (true color) then right (shaded classification)
    pub fn layers(&self, image: &Image) -> CompareResult<(MapLayer, MapLayer)> {
        log::info!("Building comparison layers for {}", image.id);
        let left = self.true_color(image)?;
        let right = self.shaded_classification(image)?;
        Ok((left, right))
    }
}
