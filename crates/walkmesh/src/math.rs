use glam::{IVec2, Vec3A};

/// An axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner of the box
    pub min: Vec3A,
    /// The maximum corner of the box
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a new AABB from its center and half extents.
    #[inline]
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Creates a new AABB from its corners.
    #[inline]
    pub fn from_min_max(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the smallest AABB containing all `vertices`.
    /// Returns `None` if `vertices` is empty.
    pub fn from_verts(vertices: &[Vec3A]) -> Option<Self> {
        let (first, rest) = vertices.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }

    /// The size of the box along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Returns `true` if the two boxes overlap. Touching boxes count as overlapping.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
    fn normal(&self) -> Vec3A;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }

    #[inline]
    fn normal(&self) -> Vec3A {
        let ab = self[1] - self[0];
        let ac = self[2] - self[0];
        ab.cross(ac).normalize_or_zero()
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Both offsets of [`dir_offset_x`] and [`dir_offset_z`] as a vector.
#[inline]
pub(crate) fn dir_offset(direction: u8) -> IVec2 {
    IVec2::new(
        dir_offset_x(direction) as i32,
        dir_offset_z(direction) as i32,
    )
}

/// The index after `i` in a ring of `n` elements.
#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

/// The index before `i` in a ring of `n` elements.
#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Squared distance on the xz-plane between the point `pt` and the segment `p`-`q`.
pub(crate) fn distance_squared_between_point_and_segment(pt: IVec2, p: IVec2, q: IVec2) -> f32 {
    let pq = (q - p).as_vec2();
    let mut d = (pt - p).as_vec2();
    let len_sq = pq.length_squared();
    let mut t = pq.dot(d);
    if len_sq > 0.0 {
        t /= len_sq;
    }
    let t = t.clamp(0.0, 1.0);
    d = p.as_vec2() + t * pq - pt.as_vec2();
    d.length_squared()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn can_build_aabb_from_verts() {
        let aabb = Aabb3d::from_verts(&[
            Vec3A::new(1.0, -2.0, 3.0),
            Vec3A::new(-1.0, 4.0, 0.0),
            Vec3A::new(0.5, 0.0, 5.0),
        ])
        .unwrap();
        assert_eq!(aabb.min, Vec3A::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3A::new(1.0, 4.0, 5.0));
        assert_eq!(Aabb3d::from_verts(&[]), None);
    }

    #[test]
    fn aabb_intersection_includes_touching_boxes() {
        let a = Aabb3d::from_min_max([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let b = Aabb3d::from_min_max([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]);
        let c = Aabb3d::from_min_max([1.5, 0.0, 0.0], [2.0, 1.0, 1.0]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn directions_walk_around_a_cell() {
        let sum = (0..4).fold(IVec2::ZERO, |acc, dir| acc + dir_offset(dir));
        assert_eq!(sum, IVec2::ZERO);
        assert_eq!(dir_offset(0), IVec2::new(-1, 0));
        assert_eq!(dir_offset(1), IVec2::new(0, 1));
    }

    #[test]
    fn ring_indices_wrap() {
        assert_eq!(next(2, 3), 0);
        assert_eq!(prev(0, 3), 2);
        assert_eq!(next(0, 3), 1);
    }

    #[test]
    fn point_segment_distance_is_clamped_to_endpoints() {
        let p = IVec2::new(0, 0);
        let q = IVec2::new(4, 0);
        assert_relative_eq!(
            distance_squared_between_point_and_segment(IVec2::new(2, 3), p, q),
            9.0
        );
        assert_relative_eq!(
            distance_squared_between_point_and_segment(IVec2::new(6, 0), p, q),
            4.0
        );
    }
}
