//! dwcompare: Dynamic World land cover next to Sentinel-2 imagery
//!
//! Finds Dynamic World classifications and Sentinel-2 scenes over an area
//! and date window, links each classification to its reflectance image,
//! shades the label map by classifier confidence and renders both as a
//! split-view comparison, with optional GeoTIFF exports.

pub mod types;
pub mod io;
pub mod core;
pub mod config;
pub mod pipeline;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AnalysisGrid, BoundingBox, CompareError, CompareResult, GeoTransform, Image, ImageRecord,
    LinkedRecord,
};

pub use config::CompareConfig;
pub use pipeline::{ComparisonPipeline, ComparisonResult};
