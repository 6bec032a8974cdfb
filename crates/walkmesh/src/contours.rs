use glam::{IVec2, U16Vec3};

use crate::{
    Aabb3d, AreaType, CompactHeightfield,
    context::{TimerLabel, timer},
    math::{distance_squared_between_point_and_segment, next},
    region::RegionId,
};

/// Upper bound on the steps of a single boundary walk.
const MAX_WALK_STEPS: usize = 40_000;

impl CompactHeightfield {
    /// Traces the outlines of all regions and simplifies them into contours.
    ///
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// Regions must have been built with [`CompactHeightfield::build_regions`] beforehand.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let _timer = timer(TimerLabel::BuildContours);

        let mut contour_set = ContourSet {
            contours: Vec::with_capacity((self.max_region.0 as usize).max(8)),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(self.border_size * 2),
            height: self.height.saturating_sub(self.border_size * 2),
            border_size: self.border_size,
            max_error,
        };
        if self.border_size > 0 {
            // If the heightfield was built with border_size, remove the offset
            let pad = self.border_size as f32 * self.cell_size;
            contour_set.aabb.min.x += pad;
            contour_set.aabb.min.z += pad;
            contour_set.aabb.max.x -= pad;
            contour_set.aabb.max.z -= pad;
        }

        let mut flags = {
            let _timer = timer(TimerLabel::BuildContoursTrace);
            self.mark_open_edges()
        };

        let _timer = timer(TimerLabel::BuildContoursSimplify);
        let mut raw_vertices = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for (x, z, i) in self.span_indices() {
            if flags[i] == 0 {
                continue;
            }
            let region = self.spans[i].region;
            if !region.is_interior() {
                continue;
            }

            raw_vertices.clear();
            simplified.clear();

            self.walk_contour(x, z, i, &mut flags, &mut raw_vertices);
            simplify_contour(
                &raw_vertices,
                &mut simplified,
                max_error,
                max_edge_len,
                build_flags,
            );
            remove_degenerate_segments(&mut simplified);

            if simplified.len() < 3 {
                tracing::warn!(
                    "Contour of region {} collapsed to {} vertices, skipping it",
                    region.0,
                    simplified.len()
                );
                continue;
            }

            let mut contour = Contour {
                vertices: simplified.clone(),
                raw_vertices: raw_vertices.clone(),
                region,
                area: self.areas[i],
            };
            if self.border_size > 0 {
                // If the heightfield was built with border_size, remove the offset.
                let offset = U16Vec3::new(self.border_size, 0, self.border_size);
                for vertex in contour
                    .vertices
                    .iter_mut()
                    .chain(contour.raw_vertices.iter_mut())
                {
                    vertex.position = vertex.position.saturating_sub(offset);
                }
            }
            contour_set.contours.push(contour);
        }

        contour_set
    }

    /// For every span, sets bit `dir` if the edge in direction `dir` is not shared with the same region.
    /// Spans without an interior region get no bits.
    fn mark_open_edges(&self) -> Vec<u8> {
        let mut flags = vec![0_u8; self.spans.len()];
        for (x, z, i) in self.span_indices() {
            let span = &self.spans[i];
            if !span.region.is_interior() {
                continue;
            }
            let mut connected = 0_u8;
            for dir in 0..4 {
                let neighbor_region = span
                    .con(dir)
                    .map(|con| {
                        let (_, _, a_index) = self.con_indices(x as i32, z as i32, dir, con);
                        self.spans[a_index].region
                    })
                    .unwrap_or(RegionId::NONE);
                if neighbor_region == span.region {
                    connected |= 1 << dir;
                }
            }
            // Inverse, mark non connected edges.
            flags[i] = connected ^ 0xf;
        }
        flags
    }

    /// Walks clockwise along the open edges of the region of span `i`, emitting one vertex per edge.
    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        vertices: &mut Vec<ContourVertex>,
    ) {
        // Choose the first non-connected edge
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        let mut closed = false;
        for _ in 0..MAX_WALK_STEPS {
            let span = &self.spans[i];
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (corner_x, corner_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };

                let mut vertex_flags = RegionVertexId::NONE;
                if let Some(con) = span.con(dir) {
                    let (_, _, a_index) = self.con_indices(x as i32, z as i32, dir, con);
                    vertex_flags = RegionVertexId::from(self.spans[a_index].region);
                    if self.areas[a_index] != area {
                        vertex_flags |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    vertex_flags |= RegionVertexId::BORDER_VERTEX;
                }
                vertices.push(ContourVertex {
                    position: U16Vec3::new(corner_x, y, corner_z),
                    flags: vertex_flags,
                });

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some(con) = span.con(dir) else {
                    // A closed edge always has a neighbor of the same region.
                    tracing::warn!("Contour walk reached an edge without neighbor at ({x}, {z})");
                    return;
                };
                let (n_x, n_z, n_i) = self.con_indices(x as i32, z as i32, dir, con);
                x = n_x as u16;
                z = n_z as u16;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                closed = true;
                break;
            }
        }
        if !closed {
            tracing::warn!(
                "Contour walk exceeded {MAX_WALK_STEPS} steps, using the partial contour with {} vertices",
                vertices.len()
            );
        }
    }

    /// Returns the height of the corner at the end of edge `dir` of span `i`, and whether
    /// that corner lies on the edge between two border regions and should later be removed.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.0 as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some(con) = span.con(dir) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
            let a_span = &self.spans[a_i];
            height = height.max(a_span.y);
            regs[1] = region_and_area(a_i);
            if let Some(con) = a_span.con(dir_p) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir_p, con);
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }
        if let Some(con) = span.con(dir_p) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir_p, con);
            let a_span = &self.spans[a_i];
            height = height.max(a_span.y);
            regs[3] = region_and_area(a_i);
            if let Some(con) = a_span.con(dir) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir, con);
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.0 as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = j;
            let b = (j + 1) & 0x3;
            let c = (j + 2) & 0x3;
            let d = (j + 3) & 0x3;

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exts = regs[a] & regs[b] & border != 0 && regs[a] == regs[b];
            let two_ints = (regs[c] | regs[d]) & border == 0;
            let ints_same_area = regs[c] >> 16 == regs[d] >> 16;
            let no_zeros = regs.iter().all(|&reg| reg != 0);
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

/// Lexicographic order on the xz-plane, `x` first.
fn is_lexicographically_after(b: U16Vec3, a: U16Vec3) -> bool {
    b.x > a.x || (b.x == a.x && b.z > a.z)
}

fn xz(position: U16Vec3) -> IVec2 {
    IVec2::new(position.x as i32, position.z as i32)
}

/// Reduces the raw contour to the vertices needed to stay within `max_error` of it.
///
/// `simplified` receives the simplified vertices. While simplifying, the flags of each
/// vertex hold the index of its raw vertex. They are replaced by the final flags at the end.
fn simplify_contour(
    points: &[ContourVertex],
    simplified: &mut Vec<ContourVertex>,
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) {
    let raw_index = |vertex: &ContourVertex| vertex.flags.bits() as usize;
    let with_raw_index = |index: usize| ContourVertex {
        position: points[index].position,
        flags: RegionVertexId::from_bits_retain(index as u32),
    };
    let point_count = points.len();
    if point_count == 0 {
        return;
    }

    // Add initial points.
    let has_connections = points
        .iter()
        .any(|point| point.flags.intersects(RegionVertexId::REGION_MASK));
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for (i, point) in points.iter().enumerate() {
            let next_point = &points[next(i, point_count)];
            let different_regions = point.flags.region_id() != next_point.flags.region_id();
            let area_borders = point.flags.contains(RegionVertexId::AREA_BORDER)
                != next_point.flags.contains(RegionVertexId::AREA_BORDER);
            if different_regions || area_borders {
                simplified.push(with_raw_index(i));
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = 0;
        let mut upper_right = 0;
        for (i, point) in points.iter().enumerate() {
            let position = point.position;
            let ll = points[lower_left].position;
            if position.x < ll.x || (position.x == ll.x && position.z < ll.z) {
                lower_left = i;
            }
            if is_lexicographically_after(position, points[upper_right].position) {
                upper_right = i;
            }
        }
        simplified.push(with_raw_index(lower_left));
        simplified.push(with_raw_index(upper_right));
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_sq = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = next(i, simplified.len());
        let a = simplified[i].position;
        let a_i = raw_index(&simplified[i]);
        let b = simplified[ii].position;
        let b_i = raw_index(&simplified[ii]);

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (mut c_i, step, end_i) = if is_lexicographically_after(b, a) {
            ((a_i + 1) % point_count, 1, b_i)
        } else {
            ((b_i + point_count - 1) % point_count, point_count - 1, a_i)
        };

        // Tessellate only outer edges or edges between areas.
        let mut max_deviation = 0.0;
        let mut max_i = None;
        let c_flags = points[c_i].flags;
        if !c_flags.intersects(RegionVertexId::REGION_MASK)
            || c_flags.contains(RegionVertexId::AREA_BORDER)
        {
            while c_i != end_i {
                let deviation = distance_squared_between_point_and_segment(
                    xz(points[c_i].position),
                    xz(a),
                    xz(b),
                );
                if deviation > max_deviation {
                    max_deviation = deviation;
                    max_i = Some(c_i);
                }
                c_i = (c_i + step) % point_count;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_deviation > max_error_sq => {
                simplified.insert(i + 1, with_raw_index(max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = build_flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_sq = max_edge_len as i64 * max_edge_len as i64;
        let mut i = 0;
        while i < simplified.len() {
            let ii = next(i, simplified.len());
            let a = simplified[i].position;
            let a_i = raw_index(&simplified[i]);
            let b = simplified[ii].position;
            let b_i = raw_index(&simplified[ii]);

            let c_flags = points[(a_i + 1) % point_count].flags;
            let tessellate = (tessellate_walls
                && !c_flags.intersects(RegionVertexId::REGION_MASK))
                || (tessellate_areas && c_flags.contains(RegionVertexId::AREA_BORDER));

            let mut max_i = None;
            if tessellate {
                let delta = xz(b) - xz(a);
                if delta.length_squared() as i64 > max_edge_len_sq {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if b_i < a_i {
                        b_i + point_count - a_i
                    } else {
                        b_i - a_i
                    };
                    if n > 1 {
                        max_i = Some(if is_lexicographically_after(b, a) {
                            (a_i + n / 2) % point_count
                        } else {
                            (a_i + n.div_ceil(2)) % point_count
                        });
                    }
                }
            }

            match max_i {
                Some(max_i) => simplified.insert(i + 1, with_raw_index(max_i)),
                None => i += 1,
            }
        }
    }

    for vertex in simplified.iter_mut() {
        // The edge vertex flag is taken from the current raw point,
        // and the neighbour region is taken from the next raw point.
        let b_i = raw_index(vertex);
        let a_i = (b_i + 1) % point_count;
        vertex.flags = (points[a_i].flags
            & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
            | (points[b_i].flags & RegionVertexId::BORDER_VERTEX);
    }
}

/// Removes adjacent vertices which are equal on the xz-plane,
/// or else the triangulator will get confused.
fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if ni != i && xz(simplified[i].position) == xz(simplified[ni].position) {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// The contours, one per traced region outline.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertices.
    pub vertices: Vec<ContourVertex>,
    /// Raw contour vertices, one per traced cell edge.
    pub raw_vertices: Vec<ContourVertex>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

/// A vertex of a [`Contour`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourVertex {
    /// The corner in cell units. `y` is the floor height of the highest span meeting at the corner.
    pub position: U16Vec3,
    /// The region on the other side of the edge starting at this vertex, plus border flags.
    pub flags: RegionVertexId,
}

bitflags::bitflags! {
    /// Region id and flags of a contour vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionVertexId: u32 {
        /// No neighbor region and no flags.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it.  So the
        /// fields value can't be used directly.
        const REGION_MASK = 0xffff;

        /// Border vertex flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// a tile border. If a contour vertex's region ID has this bit set, the
        /// vertex will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;
    }
}

impl RegionVertexId {
    /// The region id without the vertex flags. May carry [`RegionId::BORDER_REGION`].
    #[inline]
    pub fn region_id(self) -> RegionId {
        RegionId((self.bits() & Self::REGION_MASK.bits()) as u16)
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.0 as u32)
    }
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}
