//! Conservative voxelization of triangles into a [`Heightfield`].

use bitflags::bitflags;
use glam::Vec3A;
use thiserror::Error;

use crate::{
    context::{TimerLabel, timer},
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, Span},
    trimesh::TriMesh,
};

bitflags! {
    /// Flags changing how triangles are turned into spans.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RasterizationFlags: u8 {
        /// Extend every span down to the bottom of the heightfield.
        /// Produces watertight ground when rasterizing terrain from above.
        const PROJECT_TO_BOTTOM = 1 << 0;
    }
}

/// Options for [`Heightfield::rasterize_triangle_with_options`] and [`Heightfield::rasterize_triangles_with_options`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RasterizationOptions {
    /// Rasterization flags.
    pub flags: RasterizationFlags,
    /// Per column mask in `width * height` order.
    /// Flags only apply to columns whose entry is `true`. `None` applies them everywhere.
    pub mask: Option<Vec<bool>>,
}

impl RasterizationOptions {
    fn projects_to_bottom(&self, column_index: usize) -> bool {
        self.flags.contains(RasterizationFlags::PROJECT_TO_BOTTOM)
            && self
                .mask
                .as_ref()
                .is_none_or(|mask| mask.get(column_index).copied().unwrap_or(false))
    }
}

/// Errors that can occur while rasterizing triangles into a [`Heightfield`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RasterizationError {
    /// A rasterized span could not be inserted.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
    /// The trimesh has a different number of area types than triangles.
    #[error("Trimesh has {triangles} triangles but {area_types} area types")]
    AreaTypeCountMismatch {
        /// Number of triangles
        triangles: usize,
        /// Number of area types
        area_types: usize,
    },
    /// A triangle references a vertex that does not exist.
    #[error("Triangle {triangle} references a vertex out of bounds")]
    VertexIndexOutOfBounds {
        /// Index of the offending triangle
        triangle: usize,
    },
    /// The rasterization mask does not cover the heightfield.
    #[error("Rasterization mask has {actual} entries, but the heightfield has {expected} columns")]
    MaskSizeMismatch {
        /// Number of columns in the heightfield
        expected: usize,
        /// Number of entries in the mask
        actual: usize,
    },
}

impl Heightfield {
    /// Rasterizes a single triangle into the heightfield.
    ///
    /// Triangles outside of the heightfield's AABB are ignored.
    ///
    /// # Arguments
    ///
    /// - `triangle` - The corners of the triangle in world space.
    /// - `area_type` - The area type stored in the resulting spans.
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the non-walkable flag. [Limit: >= 0] [Units: vx]
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        self.rasterize_triangle_with_options(
            triangle,
            area_type,
            flag_merge_threshold,
            &RasterizationOptions::default(),
        )
    }

    /// Same as [`Heightfield::rasterize_triangle`], but with custom [`RasterizationOptions`].
    pub fn rasterize_triangle_with_options(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
        options: &RasterizationOptions,
    ) -> Result<(), RasterizationError> {
        let _timer = timer(TimerLabel::RasterizeTriangles);
        self.validate_mask(options)?;
        self.rasterize_clipped(triangle, area_type, flag_merge_threshold, options)?;
        Ok(())
    }

    /// Rasterizes all triangles of a [`TriMesh`] that are not [`AreaType::NOT_WALKABLE`].
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize.
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the non-walkable flag. [Limit: >= 0] [Units: vx]
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        self.rasterize_triangles_with_options(
            trimesh,
            flag_merge_threshold,
            &RasterizationOptions::default(),
        )
    }

    /// Same as [`Heightfield::rasterize_triangles`], but with custom [`RasterizationOptions`].
    pub fn rasterize_triangles_with_options(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
        options: &RasterizationOptions,
    ) -> Result<(), RasterizationError> {
        let _timer = timer(TimerLabel::RasterizeTriangles);
        trimesh.validate()?;
        self.validate_mask(options)?;

        for (i, area_type) in trimesh.area_types.iter().enumerate() {
            if !area_type.is_walkable() {
                continue;
            }
            let triangle = trimesh
                .triangle(i)
                .ok_or(RasterizationError::VertexIndexOutOfBounds { triangle: i })?;
            self.rasterize_clipped(triangle, *area_type, flag_merge_threshold, options)?;
        }
        Ok(())
    }

    fn validate_mask(&self, options: &RasterizationOptions) -> Result<(), RasterizationError> {
        let expected = self.spans.len();
        match &options.mask {
            Some(mask) if mask.len() != expected => Err(RasterizationError::MaskSizeMismatch {
                expected,
                actual: mask.len(),
            }),
            _ => Ok(()),
        }
    }

    fn rasterize_clipped(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
        options: &RasterizationOptions,
    ) -> Result<(), SpanInsertionError> {
        let triangle_aabb = triangle.aabb();
        // If the triangle does not touch the bbox of the heightfield, skip the triangle.
        if !self.aabb.intersects(&triangle_aabb) {
            return Ok(());
        }

        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let field_height = self.aabb.max.y - self.aabb.min.y;
        let max_x = self.width as i32 - 1;
        let max_z = self.height as i32 - 1;

        // Calculate the footprint of the triangle on the grid
        let to_cell = |value: f32, origin: f32| ((value - origin) * inverse_cell_size) as i32;
        let x0 = to_cell(triangle_aabb.min.x, self.aabb.min.x).clamp(0, max_x);
        let x1 = to_cell(triangle_aabb.max.x, self.aabb.min.x).clamp(0, max_x);
        let z0 = to_cell(triangle_aabb.min.z, self.aabb.min.z).clamp(0, max_z);
        let z1 = to_cell(triangle_aabb.max.z, self.aabb.min.z).clamp(0, max_z);

        let triangle = ClipPolygon::from_triangle(triangle);
        for z in z0..=z1 {
            // Clip polygon to row.
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            let row = triangle
                .clip(0.0, 1.0, -cell_z)
                .clip(0.0, -1.0, cell_z + self.cell_size);
            if row.len < 3 {
                continue;
            }

            for x in x0..=x1 {
                // Clip polygon to column.
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                let cell = row
                    .clip(1.0, 0.0, -cell_x)
                    .clip(-1.0, 0.0, cell_x + self.cell_size);
                if cell.len < 3 {
                    continue;
                }

                // Calculate the min and max of the span.
                let (span_min, span_max) = cell.y_range();
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > field_height {
                    continue;
                }

                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(field_height);

                // Snap the span to the heightfield height grid.
                let height_limit = Span::MAX_HEIGHT as i64;
                let mut min_height =
                    ((span_min * inverse_cell_height).floor() as i64).clamp(0, height_limit - 1);
                let max_height = ((span_max * inverse_cell_height).ceil() as i64)
                    .clamp(min_height + 1, height_limit);

                let (x, z) = (x as u16, z as u16);
                if options.projects_to_bottom(self.column_index(x, z)) {
                    min_height = 0;
                }

                self.add_span(SpanInsertion::new(
                    x,
                    z,
                    min_height as u32,
                    max_height as u32,
                    area_type,
                    flag_merge_threshold,
                ))?;
            }
        }
        Ok(())
    }
}

/// A convex polygon on the stack. Clipping a triangle against four half-planes yields at most 7 vertices.
#[derive(Debug, Clone, Copy)]
struct ClipPolygon {
    vertices: [Vec3A; Self::MAX_VERTICES],
    len: usize,
}

impl ClipPolygon {
    const MAX_VERTICES: usize = 7;

    fn from_triangle(triangle: [Vec3A; 3]) -> Self {
        let mut vertices = [Vec3A::ZERO; Self::MAX_VERTICES];
        vertices[..3].copy_from_slice(&triangle);
        Self { vertices, len: 3 }
    }

    /// Keeps the part of the polygon where `normal_x * x + normal_z * z + offset >= 0`.
    fn clip(&self, normal_x: f32, normal_z: f32, offset: f32) -> Self {
        let mut distances = [0.0; Self::MAX_VERTICES];
        for (distance, vertex) in distances.iter_mut().zip(&self.vertices[..self.len]) {
            *distance = normal_x * vertex.x + normal_z * vertex.z + offset;
        }

        let mut clipped = Self {
            vertices: [Vec3A::ZERO; Self::MAX_VERTICES],
            len: 0,
        };
        let mut j = self.len.wrapping_sub(1);
        for i in 0..self.len {
            let inside_a = distances[j] >= 0.0;
            let inside_b = distances[i] >= 0.0;
            if inside_a != inside_b {
                let s = distances[j] / (distances[j] - distances[i]);
                clipped.push(self.vertices[j] + (self.vertices[i] - self.vertices[j]) * s);
            }
            if inside_b {
                clipped.push(self.vertices[i]);
            }
            j = i;
        }
        clipped
    }

    #[inline]
    fn push(&mut self, vertex: Vec3A) {
        // Each half-plane adds at most one vertex, so this cannot overflow for four clips of a triangle.
        if self.len < Self::MAX_VERTICES {
            self.vertices[self.len] = vertex;
            self.len += 1;
        }
    }

    fn y_range(&self) -> (f32, f32) {
        self.vertices[..self.len]
            .iter()
            .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.y), max.max(v.y)))
    }
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use crate::{Aabb3d, HeightfieldBuilder};

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::from_min_max([0.0, 0.0, 0.0], [4.0, 4.0, 4.0]),
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn small_triangle() -> [Vec3A; 3] {
        [
            Vec3A::new(1.2, 1.0, 1.2),
            Vec3A::new(1.8, 1.3, 1.3),
            Vec3A::new(1.5, 2.1, 1.8),
        ]
    }

    #[test]
    fn triangle_inside_one_column_makes_one_span() {
        let mut heightfield = heightfield();
        heightfield
            .rasterize_triangle(small_triangle(), AreaType(1), 1)
            .unwrap();
        assert_eq!(heightfield.span_count(), 1);
        let span = heightfield.span_at(1, 1).unwrap();
        assert_eq!(span.min(), 2);
        assert_eq!(span.max(), 5);
        assert_eq!(span.area(), AreaType(1));
    }

    #[test]
    fn project_to_bottom_extends_span_to_floor() {
        let mut heightfield = heightfield();
        let options = RasterizationOptions {
            flags: RasterizationFlags::PROJECT_TO_BOTTOM,
            mask: None,
        };
        heightfield
            .rasterize_triangle_with_options(small_triangle(), AreaType(1), 1, &options)
            .unwrap();
        let span = heightfield.span_at(1, 1).unwrap();
        assert_eq!(span.min(), 0);
        assert_eq!(span.max(), 5);
    }

    #[test]
    fn project_to_bottom_respects_mask() {
        let mut heightfield = heightfield();
        let options = RasterizationOptions {
            flags: RasterizationFlags::PROJECT_TO_BOTTOM,
            mask: Some(vec![false; 16]),
        };
        heightfield
            .rasterize_triangle_with_options(small_triangle(), AreaType(1), 1, &options)
            .unwrap();
        assert_eq!(heightfield.span_at(1, 1).unwrap().min(), 2);

        let options = RasterizationOptions {
            flags: RasterizationFlags::PROJECT_TO_BOTTOM,
            mask: Some(vec![true; 3]),
        };
        let result =
            heightfield.rasterize_triangle_with_options(small_triangle(), AreaType(1), 1, &options);
        assert_eq!(
            result,
            Err(RasterizationError::MaskSizeMismatch {
                expected: 16,
                actual: 3
            })
        );
    }

    #[test]
    fn triangle_outside_bounds_is_ignored() {
        let mut heightfield = heightfield();
        let triangle = small_triangle().map(|v| v + Vec3A::new(10.0, 0.0, 0.0));
        heightfield
            .rasterize_triangle(triangle, AreaType(1), 1)
            .unwrap();
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn quad_covers_every_column() {
        let mut heightfield = heightfield();
        let mut trimesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(0.0, 1.0, 4.0),
                Vec3A::new(4.0, 1.0, 4.0),
                Vec3A::new(4.0, 1.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        );
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();

        for z in 0..4 {
            for x in 0..4 {
                let spans: Vec<_> = heightfield.column_spans(x, z).collect();
                assert_eq!(spans.len(), 1, "column ({x}, {z})");
                assert_eq!(spans[0].min(), 2);
                assert_eq!(spans[0].max(), 3);
                assert_eq!(spans[0].area(), AreaType::DEFAULT_WALKABLE);
            }
        }
    }

    #[test]
    fn edges_on_cell_boundaries_touch_both_cells() {
        let mut heightfield = heightfield();
        let mut trimesh = TriMesh::new(
            vec![
                Vec3A::new(1.0, 1.0, 1.0),
                Vec3A::new(1.0, 1.0, 2.0),
                Vec3A::new(2.0, 1.0, 2.0),
                Vec3A::new(2.0, 1.0, 1.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        );
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();

        // A one cell quad whose edges lie on x = 2 and z = 2 also reaches the cells past those edges.
        for z in 0..4 {
            for x in 0..4 {
                let expected = usize::from((1..=2).contains(&x) && (1..=2).contains(&z));
                assert_eq!(
                    heightfield.column_spans(x, z).count(),
                    expected,
                    "column ({x}, {z})"
                );
            }
        }
        assert_eq!(heightfield.span_count(), 4);
    }

    #[test]
    fn unwalkable_triangles_are_skipped_in_batches() {
        let mut heightfield = heightfield();
        let trimesh = TriMesh::new(small_triangle().to_vec(), vec![UVec3::new(0, 1, 2)]);
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn mismatched_area_types_are_rejected() {
        let mut heightfield = heightfield();
        let mut trimesh = TriMesh::new(small_triangle().to_vec(), vec![UVec3::new(0, 1, 2)]);
        trimesh.area_types.clear();
        assert_eq!(
            heightfield.rasterize_triangles(&trimesh, 1),
            Err(RasterizationError::AreaTypeCountMismatch {
                triangles: 1,
                area_types: 0
            })
        );
    }

    #[test]
    fn clipping_a_triangle_by_a_cell_keeps_it_convex() {
        let polygon = ClipPolygon::from_triangle([
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 2.0),
        ]);
        let clipped = polygon
            .clip(1.0, 0.0, -0.5)
            .clip(-1.0, 0.0, 1.5)
            .clip(0.0, 1.0, -0.5)
            .clip(0.0, -1.0, 1.5);
        assert!(clipped.len >= 3);
        assert!(clipped.len <= ClipPolygon::MAX_VERTICES);
        for vertex in &clipped.vertices[..clipped.len] {
            assert!((0.5..=1.5).contains(&vertex.x));
            assert!((0.5..=1.5).contains(&vertex.z));
        }
    }
}
