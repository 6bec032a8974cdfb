//! The triangle soup fed into [`Heightfield`](crate::Heightfield) rasterization.

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleVertices as _},
    rasterize::RasterizationError,
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh whose triangles are all [`AreaType::NOT_WALKABLE`].
    /// Use [`TriMesh::mark_walkable_triangles`] to classify them.
    pub fn new(vertices: Vec<Vec3A>, indices: Vec<UVec3>) -> Self {
        let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the combined mesh has more than `u32::MAX` vertices.
    pub fn extend(&mut self, other: TriMesh) {
        let Ok(next_vertex_index) = u32::try_from(self.vertices.len()) else {
            panic!("Cannot extend a trimesh with more than 2^32 vertices");
        };
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// The three corners of triangle `index`.
    /// Returns `None` if the triangle or one of its vertices does not exist.
    pub fn triangle(&self, index: usize) -> Option<[Vec3A; 3]> {
        let indices = self.indices.get(index)?;
        Some([
            *self.vertices.get(indices.x as usize)?,
            *self.vertices.get(indices.y as usize)?,
            *self.vertices.get(indices.z as usize)?,
        ])
    }

    /// Checks that every triangle has an area type and only references existing vertices.
    pub fn validate(&self) -> Result<(), RasterizationError> {
        if self.indices.len() != self.area_types.len() {
            return Err(RasterizationError::AreaTypeCountMismatch {
                triangles: self.indices.len(),
                area_types: self.area_types.len(),
            });
        }
        let vertex_count = self.vertices.len();
        let in_bounds =
            |indices: &UVec3| indices.to_array().iter().all(|&i| (i as usize) < vertex_count);
        if let Some(triangle) = self.indices.iter().position(|indices| !in_bounds(indices)) {
            return Err(RasterizationError::VertexIndexOutOfBounds { triangle });
        }
        Ok(())
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// A triangle is marked as [`AreaType::DEFAULT_WALKABLE`] if the y component of its normal
    /// is greater than the cosine of the threshold angle. Other triangles keep their area type,
    /// as do triangles referencing missing vertices. [`TriMesh::validate`] reports those.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for i in 0..self.indices.len().min(self.area_types.len()) {
            let Some(triangle) = self.triangle(i) else {
                continue;
            };
            if triangle.normal().y > threshold_cos {
                self.area_types[i] = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Sets every triangle steeper than the threshold angle to [`AreaType::NOT_WALKABLE`].
    /// Flatter triangles keep their area type.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn clear_unwalkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for i in 0..self.indices.len().min(self.area_types.len()) {
            let Some(triangle) = self.triangle(i) else {
                continue;
            };
            if triangle.normal().y <= threshold_cos {
                self.area_types[i] = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor_and_wall() -> TriMesh {
        TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, 0.0, 0.0),
                Vec3A::new(0.0, 1.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 3, 2)],
        )
    }

    #[test]
    fn marks_flat_triangles_walkable() {
        let mut trimesh = floor_and_wall();
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert_eq!(
            trimesh.area_types,
            vec![AreaType::DEFAULT_WALKABLE, AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn clears_steep_triangles_only() {
        let mut trimesh = floor_and_wall();
        trimesh.area_types = vec![AreaType(7), AreaType(7)];
        trimesh.clear_unwalkable_triangles(45.0_f32.to_radians());
        assert_eq!(trimesh.area_types, vec![AreaType(7), AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn extend_offsets_indices() {
        let mut trimesh = floor_and_wall();
        trimesh.extend(floor_and_wall());
        assert_eq!(trimesh.vertices.len(), 8);
        assert_eq!(trimesh.indices[2], UVec3::new(4, 5, 6));
        assert_eq!(trimesh.area_types.len(), 4);
    }

    #[test]
    fn triangle_lookup_checks_indices() {
        let mut trimesh = floor_and_wall();
        assert_eq!(
            trimesh.triangle(0),
            Some([
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, 0.0, 0.0),
            ])
        );
        assert_eq!(trimesh.triangle(2), None);
        trimesh.indices[1] = UVec3::new(0, 9, 2);
        assert_eq!(trimesh.triangle(1), None);
    }

    #[test]
    fn validation_reports_broken_triangles() {
        let mut trimesh = floor_and_wall();
        assert_eq!(trimesh.validate(), Ok(()));

        trimesh.indices[1] = UVec3::new(0, 99, 2);
        assert_eq!(
            trimesh.validate(),
            Err(RasterizationError::VertexIndexOutOfBounds { triangle: 1 })
        );
        // Classification skips the broken triangle instead of indexing past the vertices.
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        trimesh.clear_unwalkable_triangles(45.0_f32.to_radians());
        assert_eq!(
            trimesh.area_types,
            vec![AreaType::DEFAULT_WALKABLE, AreaType::NOT_WALKABLE]
        );

        trimesh.area_types.pop();
        assert_eq!(
            trimesh.validate(),
            Err(RasterizationError::AreaTypeCountMismatch {
                triangles: 2,
                area_types: 1
            })
        );
    }
}
