#![doc = include_str!("../../../readme.md")]

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod context;
mod contours;
mod heightfield;
mod main_api;
pub(crate) mod math;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod span;
mod trimesh;
mod watershed_build_regions;
mod watershed_distance_field;

pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder};
pub use context::TimerLabel;
pub use contours::{
    BuildContoursFlags, Contour, ContourSet, ContourVertex, RegionVertexId,
};
pub use heightfield::{
    Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertion, SpanInsertionError,
};
pub use math::Aabb3d;
pub use poly_mesh::{PolygonMesh, PolygonMeshError, RC_MESH_NULL_IDX};
pub use pre_filter::NeighborSlopeFilterMode;
pub use rasterize::{RasterizationError, RasterizationFlags, RasterizationOptions};
pub use region::RegionId;
pub use span::{AreaType, Span, SpanBuilder, SpanCache, SpanKey, Spans};
pub use trimesh::TriMesh;
pub use watershed_build_regions::BuildRegionsError;
