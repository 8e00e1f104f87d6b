//! Serde models for STAC Item Search requests and responses.
//!
//! Only the subset needed here: bbox/datetime/collection filtering,
//! pagination links and asset hrefs.

use crate::types::{AssetSource, BoundingBox, CompareError, CompareResult, ImageRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Body for `POST /search`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Pagination token some catalogs put in the next-link body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A GeoJSON FeatureCollection of STAC Items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCollection {
    #[serde(rename = "type", default = "feature_collection")]
    pub type_: String,

    pub features: Vec<Item>,

    #[serde(default)]
    pub links: Vec<Link>,
}

fn feature_collection() -> String {
    "FeatureCollection".to_string()
}

impl ItemCollection {
    pub fn next_link(&self) -> Option<&Link> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    pub properties: ItemProperties,

    #[serde(default)]
    pub assets: HashMap<String, Asset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

impl Asset {
    pub fn is_geotiff(&self) -> bool {
        let typed = self
            .media_type
            .as_deref()
            .map(|t| t.contains("geotiff") || t.contains("image/tiff"))
            .unwrap_or(false);
        let href = self.href.to_lowercase();
        typed || href.ends_with(".tif") || href.ends_with(".tiff")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
}

/// Band name -> asset key (and band inside that asset)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMapping {
    pub band: String,
    pub asset: String,
    #[serde(default = "first_band")]
    pub band_index: usize,
}

fn first_band() -> usize {
    1
}

impl BandMapping {
    pub fn new(band: &str, asset: &str, band_index: usize) -> Self {
        Self {
            band: band.to_string(),
            asset: asset.to_string(),
            band_index,
        }
    }
}

impl Item {
    /// Acquisition time from `datetime`, falling back to `start_datetime`
    pub fn acquired(&self) -> CompareResult<DateTime<Utc>> {
        let text = self
            .properties
            .datetime
            .as_deref()
            .or(self.properties.start_datetime.as_deref())
            .ok_or_else(|| CompareError::InvalidFormat(format!("item {} has no datetime", self.id)))?;
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CompareError::InvalidFormat(format!("item {} datetime '{}': {}", self.id, text, e)))
    }

    /// Convert to an `ImageRecord`.
    ///
    /// With an empty mapping every GeoTIFF asset becomes a band named after
    /// its key. Returns `Ok(None)` when a mapped asset is missing.
    pub fn to_record(&self, collection: &str, mapping: &[BandMapping]) -> CompareResult<Option<ImageRecord>> {
        let acquired = self.acquired()?;
        let mut bands = BTreeMap::new();
        let mut band_order = Vec::new();

        if mapping.is_empty() {
            let mut keys: Vec<&String> = self
                .assets
                .iter()
                .filter(|(_, a)| a.is_geotiff())
                .map(|(k, _)| k)
                .collect();
            keys.sort();
            for key in keys {
                bands.insert(
                    key.clone(),
                    AssetSource { href: self.assets[key].href.clone(), band_index: 1 },
                );
                band_order.push(key.clone());
            }
        } else {
            for m in mapping {
                let asset = match self.assets.get(&m.asset) {
                    Some(asset) => asset,
                    None => {
                        log::warn!("Item {} has no asset '{}' for band {}", self.id, m.asset, m.band);
                        return Ok(None);
                    }
                };
                bands.insert(
                    m.band.clone(),
                    AssetSource { href: asset.href.clone(), band_index: m.band_index },
                );
                band_order.push(m.band.clone());
            }
        }

        Ok(Some(ImageRecord {
            id: self.id.clone(),
            collection: self.collection.clone().unwrap_or_else(|| collection.to_string()),
            acquired,
            bbox: self.bbox.as_deref().and_then(BoundingBox::from_stac),
            bands,
            band_order,
        }))
    }
}
