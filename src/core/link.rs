use crate::types::{CompareError, CompareResult, Image, ImageRecord, LinkedRecord};
use ndarray::{concatenate, Axis};
use serde::{Deserialize, Serialize};

/// How primary images pick their partner in the secondary collection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LinkStrategy {
    /// Closest acquisition time, optionally bounded
    Nearest { max_offset_seconds: Option<i64> },
    /// Identical scene id in both collections
    SameIndex,
}

impl Default for LinkStrategy {
    fn default() -> Self {
        LinkStrategy::Nearest { max_offset_seconds: None }
    }
}

/// Joins a classification collection to a reflectance collection
pub struct CollectionLinker {
    strategy: LinkStrategy,
}

impl CollectionLinker {
    pub fn new(strategy: LinkStrategy) -> Self {
        Self { strategy }
    }

    /// Nearest-in-time linker without an offset bound
    pub fn nearest() -> Self {
        Self::new(LinkStrategy::default())
    }

    /// Band names of the secondary collection, read from its first record
    pub fn secondary_band_names(secondary: &[ImageRecord]) -> CompareResult<Vec<String>> {
        let first = secondary.first().ok_or_else(|| {
            CompareError::NoData(
                "no imagery found for given date/region in the reference collection".to_string(),
            )
        })?;
        Ok(first.band_names().to_vec())
    }

    /// Attach the matching secondary record to every primary record.
    ///
    /// Both slices are expected in acquisition order. Primaries without a
    /// partner are dropped; an empty result is a `NoData` error.
    pub fn link(
        &self,
        primary: &[ImageRecord],
        secondary: &[ImageRecord],
    ) -> CompareResult<Vec<LinkedRecord>> {
        if primary.is_empty() {
            return Err(CompareError::NoData(
                "no imagery found for given date/region in the classification collection".to_string(),
            ));
        }
        let linked_bands = Self::secondary_band_names(secondary)?;

        log::info!(
            "Linking {} primary image(s) against {} reference image(s) using {:?}",
            primary.len(),
            secondary.len(),
            self.strategy
        );

        let mut linked = Vec::with_capacity(primary.len());
        for record in primary {
            match self.find_partner(record, secondary) {
                Some(partner) => {
                    let offset = (record.acquired - partner.acquired).num_seconds().abs();
                    log::debug!("Linked {} -> {} (offset {} s)", record.id, partner.id, offset);
                    linked.push(LinkedRecord {
                        primary: record.clone(),
                        secondary: partner.clone(),
                        linked_bands: linked_bands.clone(),
                        offset_seconds: offset,
                    });
                }
                None => log::warn!("No reference image matches {}, dropping it", record.id),
            }
        }

        if linked.is_empty() {
            return Err(CompareError::NoData(
                "no classification image could be linked to a reference image".to_string(),
            ));
        }
        Ok(linked)
    }

    /// First linked record, as the single image the comparison works on
    pub fn link_first(
        &self,
        primary: &[ImageRecord],
        secondary: &[ImageRecord],
    ) -> CompareResult<LinkedRecord> {
        let mut linked = self.link(primary, secondary)?;
        Ok(linked.swap_remove(0))
    }

    fn find_partner<'a>(
        &self,
        record: &ImageRecord,
        secondary: &'a [ImageRecord],
    ) -> Option<&'a ImageRecord> {
        match self.strategy {
            LinkStrategy::SameIndex => secondary.iter().find(|s| s.id == record.id),
            LinkStrategy::Nearest { max_offset_seconds } => {
                let best = secondary.iter().min_by(|a, b| {
                    let da = (record.acquired - a.acquired).num_milliseconds().abs();
                    let db = (record.acquired - b.acquired).num_milliseconds().abs();
                    da.cmp(&db)
                        .then_with(|| a.acquired.cmp(&b.acquired))
                        .then_with(|| a.id.cmp(&b.id))
                })?;
                match max_offset_seconds {
                    Some(limit) if (record.acquired - best.acquired).num_seconds().abs() > limit => None,
                    _ => Some(best),
                }
            }
        }
    }
}

impl Image {
    /// Append the bands of `other` (same grid) to this image
    pub fn concat(mut self, other: &Image) -> CompareResult<Image> {
        if self.grid != other.grid {
            return Err(CompareError::Processing(format!(
                "cannot link {} and {}: images are on different grids",
                self.id, other.id
            )));
        }
        if let Some(clash) = other.band_names.iter().find(|b| self.band_names.contains(b)) {
            return Err(CompareError::Processing(format!(
                "band '{}' exists in both {} and {}",
                clash, self.id, other.id
            )));
        }
        self.data = concatenate(Axis(0), &[self.data.view(), other.data.view()])
            .map_err(|e| CompareError::Processing(format!("Failed to stack bands: {}", e)))?;
        self.band_names.extend(other.band_names.iter().cloned());
        Ok(self)
    }
}
