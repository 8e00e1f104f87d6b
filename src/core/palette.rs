//! Dynamic World class palette and label colorization

use crate::types::{CompareError, CompareResult, Pixel};
use ndarray::{Array3, ArrayView2};

/// Dynamic World class names, in label-id order
pub const CLASS_NAMES: [&str; 9] = [
    "water",
    "trees",
    "grass",
    "flooded_vegetation",
    "crops",
    "shrub_and_scrub",
    "built",
    "bare",
    "snow_and_ice",
];

/// Visualization colors matching `CLASS_NAMES`
pub const VIS_PALETTE: [&str; 9] = [
    "419bdf", "397d49", "88b053", "7a87c6", "e49635", "dfc35a", "c4281b", "a59b8f", "b39fe1",
];

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `rrggbb`, with or without a leading `#`
    pub fn from_hex(hex: &str) -> CompareResult<Self> {
        let digits = hex.trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CompareError::InvalidFormat(format!("bad hex color '{}'", hex)));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| CompareError::InvalidFormat(format!("bad hex color '{}': {}", hex, e)))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Channels scaled to [0, 1]
    pub fn to_unit(&self) -> [Pixel; 3] {
        [
            self.r as Pixel / 255.0,
            self.g as Pixel / 255.0,
            self.b as Pixel / 255.0,
        ]
    }

    pub fn to_hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// One palette entry
#[derive(Debug, Clone, PartialEq)]
pub struct ClassEntry {
    pub name: String,
    pub color: Rgb,
}

/// Ordered label palette; entry `i` colors label id `i`
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    entries: Vec<ClassEntry>,
}

impl Palette {
    pub fn new(pairs: &[(&str, &str)]) -> CompareResult<Self> {
        if pairs.is_empty() {
            return Err(CompareError::InvalidFormat("palette has no classes".to_string()));
        }
        let entries = pairs
            .iter()
            .map(|(name, hex)| {
                Ok(ClassEntry {
                    name: name.to_string(),
                    color: Rgb::from_hex(hex)?,
                })
            })
            .collect::<CompareResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// The 9-class Dynamic World palette, from `CLASS_NAMES` and `VIS_PALETTE`
    pub fn dynamic_world() -> CompareResult<Self> {
        let pairs: Vec<(&str, &str)> = CLASS_NAMES.iter().copied().zip(VIS_PALETTE.iter().copied()).collect();
        Self::new(&pairs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ClassEntry] {
        &self.entries
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn color(&self, label: usize) -> Option<Rgb> {
        self.entries.get(label).map(|e| e.color)
    }

    /// Label raster -> RGB stack in [0, 1] (3 x rows x cols).
    ///
    /// NaN pixels are masked and come out black; every other value must be
    /// an integral class id.
    pub fn colorize(&self, labels: ArrayView2<'_, Pixel>) -> CompareResult<Array3<Pixel>> {
        let (rows, cols) = labels.dim();
        let lut: Vec<[Pixel; 3]> = self.entries.iter().map(|e| e.color.to_unit()).collect();
        let mut rgb = Array3::<Pixel>::zeros((3, rows, cols));

        for ((row, col), &value) in labels.indexed_iter() {
            if value.is_nan() {
                continue;
            }
            let id = label_id(value, lut.len())?;
            let color = lut[id];
            for c in 0..3 {
                rgb[[c, row, col]] = color[c];
            }
        }
        Ok(rgb)
    }
}

fn label_id(value: Pixel, classes: usize) -> CompareResult<usize> {
    if value.fract() != 0.0 || value < 0.0 || value >= classes as Pixel {
        return Err(CompareError::InvalidFormat(format!(
            "label value {} outside class range 0..={}",
            value,
            classes - 1
        )));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_palette_covers_all_classes() {
        let palette = Palette::dynamic_world().unwrap();
        assert_eq!(palette.len(), 9);
        for (i, hex) in VIS_PALETTE.iter().enumerate() {
            assert_eq!(palette.color(i).unwrap().to_hex(), *hex);
            assert_eq!(palette.color(i), Some(Rgb::from_hex(hex).unwrap()));
        }
        assert_eq!(palette.color(9), None);
        assert_eq!(palette.class_names()[6], "built");
    }

    #[test]
    fn test_dynamic_world_matches_the_published_constants() {
        let palette = Palette::dynamic_world().unwrap();
        let names: Vec<String> = palette.entries().iter().map(|e| e.name.clone()).collect();
        let hexes: Vec<String> = palette.entries().iter().map(|e| e.color.to_hex()).collect();
        assert_eq!(names, CLASS_NAMES.to_vec());
        assert_eq!(hexes, VIS_PALETTE.to_vec());
        assert_eq!(palette.color(0), Some(Rgb::new(0x41, 0x9b, 0xdf)));

        assert!(Palette::new(&[("water", "41 9bdf")]).is_err());
        assert!(Palette::new(&[]).is_err());
    }

    #[test]
    fn test_colorize_is_pure() {
        let palette = Palette::dynamic_world().unwrap();
        let labels = array![[0.0f32, 8.0], [6.0, 0.0]];
        let first = palette.colorize(labels.view()).unwrap();
        let second = palette.colorize(labels.view()).unwrap();
        assert_eq!(first, second);

        // Same label, same color, wherever it is
        for c in 0..3 {
            assert_eq!(first[[c, 0, 0]], first[[c, 1, 1]]);
        }
        assert_eq!(first[[0, 1, 0]], 0xc4 as f32 / 255.0);
        assert_eq!(first[[2, 0, 1]], 0xe1 as f32 / 255.0);
    }

    #[test]
    fn test_colorize_masks_nan_and_rejects_out_of_range() {
        let palette = Palette::dynamic_world().unwrap();
        let masked = palette.colorize(array![[f32::NAN]].view()).unwrap();
        assert!(masked.iter().all(|&v| v == 0.0));

        assert!(palette.colorize(array![[9.0f32]].view()).is_err());
        assert!(palette.colorize(array![[-1.0f32]].view()).is_err());
        assert!(palette.colorize(array![[2.5f32]].view()).is_err());
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(Rgb::from_hex("#419BDF").unwrap(), Rgb::new(0x41, 0x9b, 0xdf));
        assert!(Rgb::from_hex("41Gbdf").is_err());
        assert!(Rgb::from_hex("419bd").is_err());
        assert!(Palette::new(&[]).is_err());
        assert_eq!(Palette::new(&[("water", "419bdf")]).unwrap().len(), 1);
    }
}
