//! Core comparison modules

pub mod filter;
pub mod link;
pub mod palette;
pub mod shading;
pub mod composite;
pub mod view;
pub mod export;

// Re-export main types
pub use filter::{Aoi, CollectionFilter, TimeWindow};
pub use link::{CollectionLinker, LinkStrategy};
pub use palette::{Palette, Rgb, CLASS_NAMES, VIS_PALETTE};
pub use shading::{ConfidenceShader, ProbabilityScale, ShadingMode, ShadingParams};
pub use composite::{CompositeBuilder, MapLayer, VisParams};
pub use view::{Orientation, SplitView};
pub use export::{ExportRequest, ExportSettings, ExportTarget, Exporter};
