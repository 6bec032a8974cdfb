use crate::{Aabb3d, BuildContoursFlags, NeighborSlopeFilterMode};

/// All parameters of a [`PolygonMesh`](crate::PolygonMesh) build, in the units the pipeline stages consume.
///
/// Most values are in voxels (vx), derived from the world units (wu) of an agent by
/// [`NavmeshConfigBuilder::build`]. A voxel is `cell_size` wide on the xz-plane and
/// `cell_height` tall.
///
/// Start by picking the agent: a human-sized agent in a world measured in meters is roughly
/// 2.0 tall with a radius of 0.4. Everything else follows from that and from the cell size.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// Number of columns along the x-axis. `[Units: vx]`
    pub width: u16,

    /// Number of columns along the z-axis. `[Units: vx]`
    pub height: u16,

    /// Width of the strip along the field's xz-bounds that never becomes walkable. `[Limit: >=0] [Units: vx]`
    ///
    /// Only affects the outer bounds of the field, not the borders around obstacles.
    /// Contours and the polygon mesh are shifted back by this amount.
    pub border_size: u16,

    /// Voxel size on the xz-plane. `[Limit: > 0] [Units: wu]`
    ///
    /// Usually a half or a third of the agent radius. Halving it quadruples the number of
    /// columns, so use the largest value that still resolves the gaps the agent must fit through.
    /// Values below 0.05 run into floating point precision issues.
    pub cell_size: f32,

    /// Voxel size along the y-axis. `[Limit: > 0] [Units: wu]`
    ///
    /// Usually half of `cell_size`. Small values keep steps and curbs from splitting the surface.
    pub cell_height: f32,

    /// Bounds of the field. `[Units: wu]`
    pub aabb: Aabb3d,

    /// Steepest triangle an agent can walk on, measured from the up axis. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    pub walkable_slope_angle: f32,

    /// Lowest ceiling an agent fits under. `[Limit: >= 3] [Units: vx]`
    ///
    /// `(agent_height / cell_height).ceil()`. Spans with less clearance are not walkable.
    pub walkable_height: u16,

    /// Highest step an agent can climb. `[Limit: >=0] [Units: vx]`
    ///
    /// `(max_climb / cell_height).floor()`. Lets the surface flow over curbs and stairs.
    pub walkable_climb: u16,

    /// Agent radius. `[Limit: >=0] [Units: vx]`
    ///
    /// `(agent_radius / cell_size).ceil()`. The walkable area is not eroded by this radius,
    /// so consumers of the [`PolygonMesh`](crate::PolygonMesh) must keep the agent's
    /// cylinder away from boundary edges themselves.
    pub walkable_radius: u16,

    /// Height gained over one cell of the steepest walkable slope. `[Limit: >=0] [Units: wu]`
    ///
    /// `cell_size * walkable_slope_angle.tan()`.
    /// Only used by [`NeighborSlopeFilterMode::UseHeightFromWalkableSlope`].
    pub max_step_from_walkable_slope: f32,

    /// Which extra slope test the ledge filter runs on the neighbors of a span.
    pub ledge_slope_filter_mode: NeighborSlopeFilterMode,

    /// Longest allowed contour edge on walls. `[Limit: >=0] [Units: vx]`
    ///
    /// Long border edges produce long, thin triangles. Edges above this length get extra
    /// vertices. `0` disables the split.
    pub max_edge_len: u16,

    /// How far a simplified contour may stray from the traced outline. `[Limit: >=0] [Units: vx]`
    ///
    /// Only measured on the xz-plane. 1.3 is a good default. Below 1.1 the edges turn
    /// jagged, above 1.5 corners get cut.
    pub max_simplification_error: f32,

    /// Regions with fewer spans are removed. `[Limit: >=0] [Units: vx]`
    ///
    /// Cleans up the noise of the watershed partitioning, like tiny regions on table tops.
    pub min_region_area: u16,

    /// Regions with fewer spans are merged into their only neighbor, if they have one. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// Most vertices a polygon of the mesh may have. `[Limit: 3..=6]`
    pub max_vertices_per_polygon: u16,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,
}

/// Describes the agent in world units and derives a [`NavmeshConfig`] from it.
/// The defaults fit an adult human in a world measured in meters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// See [`NavmeshConfig::cell_size`].
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// See [`NavmeshConfig::cell_height`].
    pub cell_height: f32,
    /// Agent height, best with a bit of headroom. `[Limit: > 0] [Units: wu]`
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest step the agent can climb. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest slope the agent can walk on. `[Units: Radians]`
    pub agent_max_slope: f32,
    /// The side length of the smallest region that is kept. `[Units: vx]`
    ///
    /// Squared to get [`NavmeshConfig::min_region_area`].
    pub region_min_size: f32,
    /// The side length of the largest region that is merged into a neighbor. `[Units: vx]`
    ///
    /// Squared to get [`NavmeshConfig::merge_region_area`].
    pub region_merge_size: f32,
    /// The longest contour edge along the mesh border. `[Units: wu]`
    pub edge_max_len: f32,
    /// See [`NavmeshConfig::max_simplification_error`]. `[Units: vx]`
    pub edge_max_error: f32,
    /// See [`NavmeshConfig::max_vertices_per_polygon`].
    pub verts_per_poly: f32,
    /// See [`NavmeshConfig::border_size`]. `[Units: vx]`
    pub border_size: u16,
    /// The world-space bounds of the field.
    pub aabb: Aabb3d,
    /// See [`NavmeshConfig::ledge_slope_filter_mode`].
    pub ledge_slope_filter_mode: NeighborSlopeFilterMode,
    /// See [`NavmeshConfig::contour_flags`].
    pub contour_flags: BuildContoursFlags,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6.0,
            border_size: 0,
            aabb: Aabb3d::default(),
            ledge_slope_filter_mode: NeighborSlopeFilterMode::default(),
            contour_flags: BuildContoursFlags::default(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        NavmeshConfig {
            width: ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5) as u16,
            height: ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5) as u16,
            border_size: self.border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius: (self.agent_radius / self.cell_size).ceil() as u16,
            max_step_from_walkable_slope: self.cell_size * self.agent_max_slope.tan(),
            ledge_slope_filter_mode: self.ledge_slope_filter_mode,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly as u16,
            contour_flags: self.contour_flags,
        }
    }
}
