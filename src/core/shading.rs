use crate::types::{CompareError, CompareResult, Pixel};
use ndarray::{Array2, ArrayView2, ArrayView3, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use ndarray::parallel::prelude::*;

/// Storage scale of class-probability bands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityScale {
    /// Probabilities in [0, 1]
    Unit,
    /// Probabilities in [0, 100]
    Percent,
}

impl ProbabilityScale {
    pub fn divisor(&self) -> Pixel {
        match self {
            ProbabilityScale::Unit => 1.0,
            ProbabilityScale::Percent => 100.0,
        }
    }
}

/// What the shading raster represents
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadingMode {
    /// Relief normalised to flat ground, then scaled by the confidence
    ConfidenceWeighted,
    /// Plain hillshade of the confidence surface
    Hillshade,
}

/// Parameters for confidence shading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingParams {
    /// Sun azimuth in degrees (0 = North, clockwise)
    pub azimuth: f64,
    /// Sun elevation above the horizon in degrees
    pub elevation: f64,
    /// Confidence -> pseudo-elevation multiplier
    pub elevation_scale: f64,
    pub mode: ShadingMode,
    pub probability_scale: ProbabilityScale,
}

impl Default for ShadingParams {
    fn default() -> Self {
        Self {
            azimuth: 270.0,
            elevation: 45.0,
            elevation_scale: 100.0,
            mode: ShadingMode::ConfidenceWeighted,
            probability_scale: ProbabilityScale::Unit,
        }
    }
}

impl ShadingParams {
    pub fn validate(&self) -> CompareResult<()> {
        if !self.azimuth.is_finite() {
            return Err(CompareError::Config("sun azimuth must be finite".to_string()));
        }
        if !(self.elevation > 0.0 && self.elevation <= 90.0) {
            return Err(CompareError::Config(format!(
                "sun elevation {} outside (0, 90]",
                self.elevation
            )));
        }
        if !(self.elevation_scale > 0.0 && self.elevation_scale.is_finite()) {
            return Err(CompareError::Config(format!(
                "elevation scale {} must be positive",
                self.elevation_scale
            )));
        }
        Ok(())
    }
}

/// Turns class probabilities into a shading raster in [0, 1]
pub struct ConfidenceShader {
    params: ShadingParams,
}

impl ConfidenceShader {
    pub fn new(params: ShadingParams) -> CompareResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Shader with the hosted backend's hillshade defaults
    pub fn standard() -> Self {
        Self {
            params: ShadingParams::default(),
        }
    }

    pub fn params(&self) -> &ShadingParams {
        &self.params
    }

    /// Per-pixel maximum over the class bands, rescaled to [0, 1].
    ///
    /// NaN bands are skipped; a pixel with no valid band stays NaN.
    pub fn top1_confidence(&self, probabilities: ArrayView3<'_, Pixel>) -> CompareResult<Array2<Pixel>> {
        let (bands, rows, cols) = probabilities.dim();
        if bands == 0 {
            return Err(CompareError::Processing("no probability bands to reduce".to_string()));
        }
        let divisor = self.params.probability_scale.divisor();

        let mut confidence = Array2::<Pixel>::from_elem((rows, cols), Pixel::NAN);
        for band in probabilities.axis_iter(Axis(0)) {
            ndarray::Zip::from(&mut confidence).and(&band).for_each(|c, &p| {
                if !p.is_nan() && (c.is_nan() || p > *c) {
                    *c = p;
                }
            });
        }
        confidence.mapv_inplace(|c| if c.is_nan() { c } else { (c / divisor).clamp(0.0, 1.0) });
        Ok(confidence)
    }

    /// Hillshade of `surface` (already in elevation units) in [0, 1].
    ///
    /// Horn's 3x3 gradient; out-of-grid and NaN neighbours take the centre
    /// value. NaN centres stay NaN.
    pub fn hillshade(&self, surface: ArrayView2<'_, Pixel>, cell_size: f64) -> CompareResult<Array2<Pixel>> {
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            return Err(CompareError::Processing(format!("invalid cell size {}", cell_size)));
        }
        let (rows, cols) = surface.dim();
        let illumination = Illumination::new(self.params.azimuth, self.params.elevation, cell_size);
        let mut shade = Array2::<Pixel>::zeros((rows, cols));

        #[cfg(feature = "parallel")]
        shade
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, line)| hillshade_row(&surface, row, line, &illumination));

        #[cfg(not(feature = "parallel"))]
        shade
            .axis_iter_mut(Axis(0))
            .enumerate()
            .for_each(|(row, line)| hillshade_row(&surface, row, line, &illumination));

        Ok(shade)
    }

    /// Shading raster for a top-1 confidence surface in [0, 1]
    pub fn shade(&self, confidence: ArrayView2<'_, Pixel>, cell_size: f64) -> CompareResult<Array2<Pixel>> {
        log::debug!(
            "Shading {:?} confidence surface (mode {:?}, cell {} m)",
            confidence.dim(),
            self.params.mode,
            cell_size
        );
        let scale = self.params.elevation_scale as Pixel;
        let surface = confidence.mapv(|c| c * scale);
        let relief = self.hillshade(surface.view(), cell_size)?;

        let shading = match self.params.mode {
            ShadingMode::Hillshade => relief.mapv(|h| if h.is_nan() { 0.0 } else { h }),
            ShadingMode::ConfidenceWeighted => {
                let flat = self.params.elevation.to_radians().sin() as Pixel;
                let mut weighted = relief;
                ndarray::Zip::from(&mut weighted).and(&confidence).for_each(|h, &c| {
                    *h = if h.is_nan() || c.is_nan() {
                        0.0
                    } else {
                        (*h / flat).clamp(0.0, 1.0) * c
                    };
                });
                weighted
            }
        };
        Ok(shading)
    }

    /// Probability bands straight to shading
    pub fn shade_probabilities(
        &self,
        probabilities: ArrayView3<'_, Pixel>,
        cell_size: f64,
    ) -> CompareResult<Array2<Pixel>> {
        let confidence = self.top1_confidence(probabilities)?;
        self.shade(confidence.view(), cell_size)
    }
}

/// Precomputed sun geometry
struct Illumination {
    cos_zenith: f64,
    sin_zenith: f64,
    azimuth_math: f64,
    eight_cell: f64,
}

impl Illumination {
    fn new(azimuth: f64, elevation: f64, cell_size: f64) -> Self {
        let zenith = (90.0 - elevation).to_radians();
        Self {
            cos_zenith: zenith.cos(),
            sin_zenith: zenith.sin(),
            azimuth_math: (360.0 - azimuth + 90.0).rem_euclid(360.0).to_radians(),
            eight_cell: 8.0 * cell_size,
        }
    }
}

fn hillshade_row(
    surface: &ArrayView2<'_, Pixel>,
    row: usize,
    mut line: ArrayViewMut1<'_, Pixel>,
    sun: &Illumination,
) {
    let (rows, cols) = surface.dim();
    for col in 0..cols {
        let center = surface[[row, col]];
        if center.is_nan() {
            line[col] = Pixel::NAN;
            continue;
        }
        let z = |dr: isize, dc: isize| -> f64 {
            let r = (row as isize + dr).clamp(0, rows as isize - 1) as usize;
            let c = (col as isize + dc).clamp(0, cols as isize - 1) as usize;
            let v = surface[[r, c]];
            if v.is_nan() { center as f64 } else { v as f64 }
        };

        let (a, b, c) = (z(-1, -1), z(-1, 0), z(-1, 1));
        let (d, f) = (z(0, -1), z(0, 1));
        let (g, h, i) = (z(1, -1), z(1, 0), z(1, 1));

        let dz_dx = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / sun.eight_cell;
        let dz_dy = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / sun.eight_cell;

        let slope = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan();
        let aspect = if dz_dx == 0.0 && dz_dy == 0.0 {
            0.0
        } else {
            dz_dy.atan2(-dz_dx).rem_euclid(2.0 * std::f64::consts::PI)
        };

        let value = sun.cos_zenith * slope.cos()
            + sun.sin_zenith * slope.sin() * (sun.azimuth_math - aspect).cos();
        line[col] = value.clamp(0.0, 1.0) as Pixel;
    }
}
