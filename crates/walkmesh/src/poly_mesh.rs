use glam::{IVec2, U16Vec3, Vec3A};
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, RegionId,
    context::{TimerLabel, timer},
    contours::ContourSet,
    math::{next, prev},
};

/// Marks an unused vertex slot or a polygon edge without neighbor.
pub const RC_MESH_NULL_IDX: u16 = 0xffff;

/// Exclusive upper bound on the vertex count of a [`PolygonMesh`].
const MAX_MESH_VERTICES: usize = 0xfffe;
const VERTEX_BUCKET_COUNT: usize = 1 << 12;
/// Set on a local index if the vertex is a removable ear.
const EAR_FLAG: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices in cell units, relative to the minimum of [`ContourSet::aabb`].
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. [Length: [`Self::polygon_count`] * 2 * [`Self::vertices_per_polygon`]]
    ///
    /// Each polygon takes `vertices_per_polygon` vertex slots followed by as many neighbor slots.
    /// Unused slots hold [`RC_MESH_NULL_IDX`].
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The user defined flags of each polygon. Always `0` after the build.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub vertices_per_polygon: usize,
    /// The world space position of the vertex coordinate origin.
    pub origin: Vec3A,
    /// The bounding box of the mesh vertices in world space.
    /// Equal to [`ContourSet::aabb`] if the mesh has no vertices.
    pub bounding_box: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// The number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.regions.len()
    }

    fn polygon_slots(&self, index: usize) -> &[u16] {
        let stride = self.vertices_per_polygon * 2;
        &self.polygons[index * stride..(index + 1) * stride]
    }

    /// The number of used vertex slots of polygon `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.polygon_count()`.
    pub fn polygon_vertex_count(&self, index: usize) -> usize {
        self.polygon_slots(index)[..self.vertices_per_polygon]
            .iter()
            .position(|&vertex| vertex == RC_MESH_NULL_IDX)
            .unwrap_or(self.vertices_per_polygon)
    }

    /// The vertex indices of polygon `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.polygon_count()`.
    pub fn polygon_vertices(&self, index: usize) -> &[u16] {
        let count = self.polygon_vertex_count(index);
        &self.polygon_slots(index)[..count]
    }

    /// The neighbor polygon across each edge of polygon `index`.
    /// Edge `i` runs from vertex `i` to vertex `i + 1`.
    /// Edges without neighbor hold [`RC_MESH_NULL_IDX`].
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.polygon_count()`.
    pub fn polygon_neighbors(&self, index: usize) -> &[u16] {
        let count = self.polygon_vertex_count(index);
        let start = self.vertices_per_polygon;
        &self.polygon_slots(index)[start..start + count]
    }

    /// The world space position of vertex `index`.
    pub fn world_vertex(&self, index: usize) -> Option<Vec3A> {
        let vertex = self.vertices.get(index)?;
        Some(to_world(
            self.origin,
            *vertex,
            self.cell_size,
            self.cell_height,
        ))
    }
}

fn to_world(origin: Vec3A, vertex: U16Vec3, cell_size: f32, cell_height: f32) -> Vec3A {
    origin
        + Vec3A::new(
            vertex.x as f32 * cell_size,
            vertex.y as f32 * cell_height,
            vertex.z as f32 * cell_size,
        )
}

impl ContourSet {
    /// Builds a polygon mesh from the contours.
    ///
    /// Every contour is triangulated by ear clipping. Vertices of different contours that
    /// share a position on the xz-plane and lie within two cells of height are welded.
    ///
    /// Holes are not cut out of their region. A region with a hole traces an outer contour
    /// and a hole contour wound the other way. The hole contour has no ears, so it is skipped
    /// with a warning and the triangles of the outer contour cover the hole.
    ///
    /// # Errors
    ///
    /// Fails if `max_vertices_per_polygon` is not in `3..=6`, or if the contours have too many vertices.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        let _timer = timer(TimerLabel::BuildPolymesh);
        if !(3..=6).contains(&max_vertices_per_polygon) {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon {
                vertices_per_polygon: max_vertices_per_polygon,
            });
        }
        let nvp = max_vertices_per_polygon;

        let contours = || self.contours.iter().filter(|contour| contour.vertices.len() >= 3);
        let max_vertices: usize = contours().map(|contour| contour.vertices.len()).sum();
        if max_vertices >= MAX_MESH_VERTICES {
            return Err(PolygonMeshError::TooManyVertices {
                count: max_vertices,
                max: MAX_MESH_VERTICES,
            });
        }
        let max_triangles: usize = contours().map(|contour| contour.vertices.len() - 2).sum();

        let mut welder = VertexWelder::with_capacity(max_vertices);
        let mut polygons = Vec::with_capacity(max_triangles * nvp * 2);
        let mut regions = Vec::with_capacity(max_triangles);
        let mut areas = Vec::with_capacity(max_triangles);

        let mut local_vertices = Vec::new();
        let mut indices = Vec::new();
        let mut triangles = Vec::new();
        for (contour_index, contour) in self.contours.iter().enumerate() {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }

            local_vertices.clear();
            local_vertices.extend(contour.vertices.iter().map(|vertex| {
                IVec2::new(vertex.position.x as i32, vertex.position.z as i32)
            }));
            indices.clear();
            indices.extend(0..contour.vertices.len() as u32);
            triangles.clear();

            if !triangulate(&local_vertices, &mut indices, &mut triangles) {
                // Bad triangulation, should not happen.
                tracing::warn!(
                    "Bad triangulation of contour {contour_index} (region {}), skipping it",
                    contour.region.0
                );
                continue;
            }

            // Add and merge vertices.
            for triangle in &triangles {
                for &local in triangle {
                    let position = contour.vertices[local as usize].position;
                    polygons.push(welder.add(position));
                }
                polygons.extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp - 3));
                // Neighbor slots
                polygons.extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp));
                regions.push(contour.region);
                areas.push(contour.area);
            }
        }

        let vertices = welder.vertices;
        build_mesh_adjacency(&mut polygons, vertices.len(), nvp);

        let origin = self.aabb.min;
        let world_vertices: Vec<Vec3A> = vertices
            .iter()
            .map(|&vertex| to_world(origin, vertex, self.cell_size, self.cell_height))
            .collect();
        let bounding_box = Aabb3d::from_verts(&world_vertices).unwrap_or(self.aabb);

        Ok(PolygonMesh {
            flags: vec![0; regions.len()],
            vertices,
            polygons,
            regions,
            areas,
            vertices_per_polygon: nvp,
            origin,
            bounding_box,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        })
    }
}

/// Errors that can occur when building a [`PolygonMesh`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolygonMeshError {
    /// The maximum number of vertices per polygon is outside of `3..=6`.
    #[error("Vertices per polygon must be between 3 and 6, got {vertices_per_polygon}")]
    InvalidVerticesPerPolygon {
        /// The requested number of vertices per polygon.
        vertices_per_polygon: usize,
    },
    /// The contours have more vertices than a mesh can index.
    #[error("Too many vertices: {count} (max: {max})")]
    TooManyVertices {
        /// The number of contour vertices.
        count: usize,
        /// The exclusive maximum.
        max: usize,
    },
}

/// Deduplicates vertices through a spatial hash on the xz-plane.
struct VertexWelder {
    vertices: Vec<U16Vec3>,
    first_vertex: Vec<Option<u16>>,
    next_vertex: Vec<Option<u16>>,
}

impl VertexWelder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(capacity),
            first_vertex: vec![None; VERTEX_BUCKET_COUNT],
            next_vertex: Vec::with_capacity(capacity),
        }
    }

    /// Returns the index of an existing vertex at the same xz-position within two cells of
    /// height, or adds `vertex`. The caller guarantees that fewer than `0xfffe` vertices are added.
    fn add(&mut self, vertex: U16Vec3) -> u16 {
        let bucket = vertex_bucket(vertex.x, vertex.z);
        let mut candidate = self.first_vertex[bucket];
        while let Some(index) = candidate {
            let existing = self.vertices[index as usize];
            if existing.x == vertex.x
                && existing.z == vertex.z
                && (existing.y as i32 - vertex.y as i32).abs() <= 2
            {
                return index;
            }
            candidate = self.next_vertex[index as usize];
        }

        // Could not find, create new.
        let index = self.vertices.len() as u16;
        self.vertices.push(vertex);
        self.next_vertex.push(self.first_vertex[bucket]);
        self.first_vertex[bucket] = Some(index);
        index
    }
}

fn vertex_bucket(x: u16, z: u16) -> usize {
    // Large multiplicative constants; here arbitrarily chosen primes
    const H1: u32 = 0x8da6b343;
    const H3: u32 = 0xcb1ab31f;
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

/// Twice the signed area of the triangle `a`, `b`, `c`. Negative if `c` is left of `a`-`b`.
fn area2(a: IVec2, b: IVec2, c: IVec2) -> i64 {
    let (ab, ac) = ((b - a).as_i64vec2(), (c - a).as_i64vec2());
    ab.x * ac.y - ac.x * ab.y
}

fn left(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) < 0
}

fn left_on(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) <= 0
}

fn collinear(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) == 0
}

/// Returns true iff `a`-`b` and `c`-`d` intersect properly, i.e. they share a point
/// interior to both segments.
fn intersect_prop(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Returns true iff `c` lies on the closed segment `a`-`b`.
fn between(a: IVec2, b: IVec2, c: IVec2) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.y <= c.y && c.y <= b.y) || (a.y >= c.y && c.y >= b.y)
    }
}

/// Returns true iff segments `a`-`b` and `c`-`d` intersect, properly or improperly.
fn intersect(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

fn vertex_at(vertices: &[IVec2], indices: &[u32], i: usize) -> IVec2 {
    vertices[(indices[i] & INDEX_MASK) as usize]
}

/// Returns true iff `i`-`j` is a proper internal *or* external diagonal of the polygon,
/// ignoring edges incident to `i` and `j`.
fn diagonalie(i: usize, j: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    let n = indices.len();
    let d0 = vertex_at(vertices, indices, i);
    let d1 = vertex_at(vertices, indices, j);

    // For each edge (k, k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertex_at(vertices, indices, k);
        let p1 = vertex_at(vertices, indices, k1);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Returns true iff the diagonal `i`-`j` is strictly internal to the polygon in the
/// neighborhood of the `i` endpoint.
fn in_cone(i: usize, j: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    let n = indices.len();
    let pi = vertex_at(vertices, indices, i);
    let pj = vertex_at(vertices, indices, j);
    let pi1 = vertex_at(vertices, indices, next(i, n));
    let pin1 = vertex_at(vertices, indices, prev(i, n));

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns true iff `i`-`j` is a proper internal diagonal of the polygon.
fn diagonal(i: usize, j: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    in_cone(i, j, vertices, indices) && diagonalie(i, j, vertices, indices)
}

/// Triangulates the polygon `indices` by ear clipping, always cutting the shortest diagonal.
///
/// `indices` index into `vertices` and are consumed. Returns `false` if the polygon
/// has no ear left before it is fully triangulated.
fn triangulate(vertices: &[IVec2], indices: &mut Vec<u32>, triangles: &mut Vec<[u32; 3]>) -> bool {
    // The last bit of the index is used to indicate if the vertex can be removed.
    for i in 0..indices.len() {
        let n = indices.len();
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, vertices, indices) {
            indices[i1] |= EAR_FLAG;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let mut min_len = None;
        let mut min_i = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG == 0 {
                continue;
            }
            let p0 = vertex_at(vertices, indices, i);
            let p2 = vertex_at(vertices, indices, next(i1, n));
            let len = (p2 - p0).as_i64vec2().length_squared();
            if min_len.is_none_or(|min_len| len < min_len) {
                min_len = Some(len);
                min_i = Some(i);
            }
        }

        let Some(mut i) = min_i else {
            // We might get here because the contour has overlapping segments.
            return false;
        };
        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([
            indices[i] & INDEX_MASK,
            indices[i1] & INDEX_MASK,
            indices[i2] & INDEX_MASK,
        ]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        indices.remove(i1);
        let n = indices.len();
        if i1 >= n {
            i1 = 0;
        }
        i = prev(i1, n);

        // Update diagonal flags.
        if diagonal(prev(i, n), i1, vertices, indices) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), vertices, indices) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    // Append the remaining triangle.
    triangles.push([
        indices[0] & INDEX_MASK,
        indices[1] & INDEX_MASK,
        indices[2] & INDEX_MASK,
    ]);
    true
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    vertices: [u16; 2],
    polygon_edges: [usize; 2],
    polygons: [usize; 2],
}

/// Fills the neighbor slots of `polygons` with the polygon sharing each edge.
///
/// Based on code by Eric Lengyel from:
/// <https://web.archive.org/web/20080704083314/http://www.terathon.com/code/edges.php>
fn build_mesh_adjacency(polygons: &mut [u16], vertex_count: usize, nvp: usize) {
    let stride = nvp * 2;
    let polygon_count = polygons.len() / stride;

    let edge_end = |polygon: &[u16], j: usize| {
        if j + 1 >= nvp || polygon[j + 1] == RC_MESH_NULL_IDX {
            polygon[0]
        } else {
            polygon[j + 1]
        }
    };

    let mut first_edge: Vec<Option<usize>> = vec![None; vertex_count];
    let mut next_edge: Vec<Option<usize>> = Vec::with_capacity(polygon_count * nvp);
    let mut edges: Vec<Edge> = Vec::with_capacity(polygon_count * nvp);

    for (i, polygon) in polygons.chunks_exact(stride).enumerate() {
        for j in 0..nvp {
            let v0 = polygon[j];
            if v0 == RC_MESH_NULL_IDX {
                break;
            }
            let v1 = edge_end(polygon, j);
            if v0 < v1 {
                edges.push(Edge {
                    vertices: [v0, v1],
                    polygons: [i, i],
                    polygon_edges: [j, 0],
                });
                // Insert edge
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = Some(edges.len() - 1);
            }
        }
    }

    for (i, polygon) in polygons.chunks_exact(stride).enumerate() {
        for j in 0..nvp {
            let v0 = polygon[j];
            if v0 == RC_MESH_NULL_IDX {
                break;
            }
            let v1 = edge_end(polygon, j);
            if v0 <= v1 {
                continue;
            }
            let mut candidate = first_edge[v1 as usize];
            while let Some(e) = candidate {
                let edge = &mut edges[e];
                if edge.vertices[1] == v0 && edge.polygons[0] == edge.polygons[1] {
                    edge.polygons[1] = i;
                    edge.polygon_edges[1] = j;
                    break;
                }
                candidate = next_edge[e];
            }
        }
    }

    // Store adjacency
    for edge in &edges {
        if edge.polygons[0] == edge.polygons[1] {
            continue;
        }
        let [p0, p1] = edge.polygons;
        polygons[p0 * stride + nvp + edge.polygon_edges[0]] = p1 as u16;
        polygons[p1 * stride + nvp + edge.polygon_edges[1]] = p0 as u16;
    }
}
