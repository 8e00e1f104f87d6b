use crate::core::composite::MapLayer;
use crate::core::filter::Aoi;
use crate::types::{CompareError, CompareResult, Pixel};
use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};

/// Divider orientation between the two panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Panels side by side, vertical divider
    Horizontal,
    /// Panels stacked, horizontal divider
    Vertical,
}

/// Description of the linked two-panel comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitView {
    pub left_layer: String,
    pub right_layer: String,
    pub orientation: Orientation,
    pub wipe: bool,
    /// Divider position as a fraction of the panel extent
    pub divider: f64,
    /// (lon, lat) both panels are centred on
    pub center: (f64, f64),
    pub zoom: u8,
}

impl SplitView {
    pub fn new(left: &MapLayer, right: &MapLayer, aoi: &Aoi) -> Self {
        Self {
            left_layer: left.name.clone(),
            right_layer: right.name.clone(),
            orientation: Orientation::Horizontal,
            wipe: true,
            divider: 0.5,
            center: aoi.centroid(),
            zoom: 12,
        }
    }

    pub fn with_divider(mut self, divider: f64) -> CompareResult<Self> {
        check_divider(divider)?;
        self.divider = divider;
        Ok(self)
    }

    /// Static wipe preview of both layers at the current divider
    pub fn render(&self, left: &MapLayer, right: &MapLayer) -> CompareResult<Array3<Pixel>> {
        render_wipe(left, right, self.divider, self.orientation)
    }
}

fn check_divider(divider: f64) -> CompareResult<()> {
    if !(0.0..=1.0).contains(&divider) {
        return Err(CompareError::Processing(format!(
            "wipe divider {} outside [0, 1]",
            divider
        )));
    }
    Ok(())
}

/// Left (or top) part from `left`, the rest from `right`, both display-stretched
pub fn render_wipe(
    left: &MapLayer,
    right: &MapLayer,
    divider: f64,
    orientation: Orientation,
) -> CompareResult<Array3<Pixel>> {
    check_divider(divider)?;
    if left.shape() != right.shape() {
        return Err(CompareError::Processing(format!(
            "cannot wipe layers of shapes {:?} and {:?}",
            left.shape(),
            right.shape()
        )));
    }
    let (rows, cols) = left.shape();
    let mut out = left.rendered();
    let right_px = right.rendered();

    match orientation {
        Orientation::Horizontal => {
            let split = (cols as f64 * divider).round() as usize;
            out.slice_mut(s![.., .., split..])
                .assign(&right_px.slice(s![.., .., split..]));
        }
        Orientation::Vertical => {
            let split = (rows as f64 * divider).round() as usize;
            out.slice_mut(s![.., split.., ..])
                .assign(&right_px.slice(s![.., split.., ..]));
        }
    }
    Ok(out)
}
