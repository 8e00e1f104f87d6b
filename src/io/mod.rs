//! Catalog search and raster I/O

pub mod stac;
pub mod catalog;
pub mod raster;

pub use catalog::{Catalog, CatalogSource, CollectionSpec, HttpOptions, LocalCatalog, StacApiCatalog};
pub use raster::{GeoTiffWriter, RasterReader};
pub use stac::{BandMapping, Item, ItemCollection};
