//! Named build timers.
//!
//! The crate does not own a logger. Every stage reports through the [`tracing`] facade:
//! progress goes to `info`, recoverable problems to `warn` and fatal problems to `error`.
//! Timers are `debug` spans named `timer` with a `label` field, so a subscriber
//! that records span durations (e.g. `tracing-subscriber` with span close events)
//! gets the per-stage timings.

use tracing::span::EnteredSpan;

/// The stage a timer measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TimerLabel {
    /// The whole pipeline run by [`NavmeshConfig::build_polygon_mesh`](crate::NavmeshConfig::build_polygon_mesh).
    Total,
    /// Triangle rasterization.
    RasterizeTriangles,
    /// Building the compact heightfield.
    BuildCompactHeightfield,
    /// Building contours.
    BuildContours,
    /// Tracing raw contours.
    BuildContoursTrace,
    /// Simplifying contours.
    BuildContoursSimplify,
    /// The ledge filter.
    FilterBorder,
    /// The low height filter.
    FilterWalkable,
    /// The low hanging obstacle filter.
    FilterLowObstacles,
    /// Building the polygon mesh.
    BuildPolymesh,
    /// Building the distance field.
    BuildDistanceField,
    /// Computing the unblurred distances.
    BuildDistanceFieldDist,
    /// Blurring the distance field.
    BuildDistanceFieldBlur,
    /// Building regions.
    BuildRegions,
    /// The watershed passes of region building.
    BuildRegionsWatershed,
    /// Expanding regions.
    BuildRegionsExpand,
    /// Flooding new regions.
    BuildRegionsFlood,
    /// Merging and removing small regions.
    BuildRegionsFilter,
}

impl TimerLabel {
    /// The label as it appears in the `label` field of the timer span.
    pub fn as_str(self) -> &'static str {
        match self {
            TimerLabel::Total => "total",
            TimerLabel::RasterizeTriangles => "rasterize_triangles",
            TimerLabel::BuildCompactHeightfield => "build_compact_heightfield",
            TimerLabel::BuildContours => "build_contours",
            TimerLabel::BuildContoursTrace => "build_contours_trace",
            TimerLabel::BuildContoursSimplify => "build_contours_simplify",
            TimerLabel::FilterBorder => "filter_border",
            TimerLabel::FilterWalkable => "filter_walkable",
            TimerLabel::FilterLowObstacles => "filter_low_obstacles",
            TimerLabel::BuildPolymesh => "build_polymesh",
            TimerLabel::BuildDistanceField => "build_distance_field",
            TimerLabel::BuildDistanceFieldDist => "build_distance_field_dist",
            TimerLabel::BuildDistanceFieldBlur => "build_distance_field_blur",
            TimerLabel::BuildRegions => "build_regions",
            TimerLabel::BuildRegionsWatershed => "build_regions_watershed",
            TimerLabel::BuildRegionsExpand => "build_regions_expand",
            TimerLabel::BuildRegionsFlood => "build_regions_flood",
            TimerLabel::BuildRegionsFilter => "build_regions_filter",
        }
    }
}

impl std::fmt::Display for TimerLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starts a timer. The timer stops when the returned guard is dropped.
#[inline]
pub(crate) fn timer(label: TimerLabel) -> EnteredSpan {
    tracing::debug_span!("timer", label = label.as_str()).entered()
}
