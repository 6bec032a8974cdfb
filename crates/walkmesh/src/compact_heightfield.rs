use thiserror::Error;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    context::{TimerLabel, timer},
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of a [`Heightfield`] that only contains walkable spans.
/// Each span knows its neighbors in the four cardinal directions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    /// Empty until [`CompactHeightfield::build_distance_field`] ran.
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Builds a [`CompactHeightfield`] from the walkable spans of this heightfield.
    /// See [`CompactHeightfield::from_heightfield`].
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        CompactHeightfield::from_heightfield(&self, walkable_height, walkable_climb)
    }
}

impl CompactHeightfield {
    /// The highest offset a neighbor can have within its column and still be connected.
    pub const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// # Arguments
    ///
    /// * `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    /// * `walkable_climb` - Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    ///
    /// # Errors
    ///
    /// Returns an error if the heightfield has no walkable spans.
    pub fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let _timer = timer(TimerLabel::BuildCompactHeightfield);
        let walkable_span_count = heightfield.walkable_span_count();
        if walkable_span_count == 0 {
            tracing::warn!("Heightfield has no walkable spans, nothing to compact");
            return Err(CompactHeightfieldError::NoWalkableSpans);
        }

        let column_count = heightfield.width as usize * heightfield.height as usize;
        let mut compact_heightfield = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            aabb: heightfield.aabb,
            max_distance: 0,
            max_region: RegionId::NONE,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells: vec![CompactCell::default(); column_count],
            spans: Vec::with_capacity(walkable_span_count),
            dist: Vec::new(),
            areas: Vec::with_capacity(walkable_span_count),
        };
        compact_heightfield.aabb.max.y += walkable_height as f32 * heightfield.cell_height;

        // Fill in cells and spans
        let mut overfull_columns = 0_usize;
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let Some(span_key) = heightfield.span_key_at(x, z) else {
                    // If there are no spans at this cell, just leave the data to index=0, count=0.
                    continue;
                };
                let mut span_key_iter = Some(span_key);
                let column_index = heightfield.column_index(x, z);
                let cell = &mut compact_heightfield.cells[column_index];
                cell.set_index(compact_heightfield.spans.len() as u32);

                while let Some(span_key) = span_key_iter {
                    let span = heightfield.span(span_key);
                    span_key_iter = span.next();
                    if !span.area().is_walkable() {
                        continue;
                    }
                    if cell.count() as usize >= CompactCell::MAX_COUNT {
                        overfull_columns += 1;
                        break;
                    }
                    let bot = span.max();
                    let top = heightfield.span_ceiling(span);
                    let y = bot.min(u16::MAX as u32) as u16;
                    let height = top.saturating_sub(bot).min(u8::MAX as u32) as u8;
                    compact_heightfield.spans.push(CompactSpan::new(y, height));
                    compact_heightfield.areas.push(span.area());
                    cell.inc_count();
                }
            }
        }
        if overfull_columns > 0 {
            tracing::warn!(
                "{overfull_columns} columns have more than {} walkable spans, the excess spans were dropped",
                CompactCell::MAX_COUNT
            );
        }

        // Find neighbour connections
        let mut max_layer_index = 0_usize;
        for z in 0..compact_heightfield.height {
            for x in 0..compact_heightfield.width {
                let cell = *compact_heightfield.cell_at(x, z);
                for i in cell.span_range() {
                    for dir in 0..4_u8 {
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        // First check that the neighbour cell is in bounds.
                        if !compact_heightfield.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbour spans and check if any of the is
                        // accessible from current cell.
                        let neighbor_cell =
                            *compact_heightfield.cell_at(neighbor_x as u16, neighbor_z as u16);
                        let span = &compact_heightfield.spans[i];
                        let span_top = span.y as i32 + span.height() as i32;
                        let mut connection = None;
                        for k in neighbor_cell.span_range() {
                            let neighbor_span = &compact_heightfield.spans[k];
                            let bot = span.y.max(neighbor_span.y) as i32;
                            let top =
                                span_top.min(neighbor_span.y as i32 + neighbor_span.height() as i32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = top - bot >= walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = k - neighbor_cell.index() as usize;
                            if layer_index > Self::MAX_LAYERS as usize {
                                max_layer_index = max_layer_index.max(layer_index);
                                continue;
                            }
                            connection = Some(layer_index as u8);
                            break;
                        }
                        compact_heightfield.spans[i].set_con(dir, connection);
                    }
                }
            }
        }
        if max_layer_index > Self::MAX_LAYERS as usize {
            tracing::warn!(
                "Heightfield has too many layers {max_layer_index} (max: {}), affected neighbors were left unconnected",
                Self::MAX_LAYERS
            );
        }
        Ok(compact_heightfield)
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.height {
            // Invalid coordinates
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Follows the connection of span `index` in column `(x, z)` in `direction`.
    /// Returns the coordinates and span index of the neighbor.
    ///
    /// The connection must exist, i.e. `con` must be the value of [`CompactSpan::con`] for that direction.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, direction: u8, con: u8) -> (i32, i32, usize) {
        let a_x = x + dir_offset_x(direction) as i32;
        let a_z = z + dir_offset_z(direction) as i32;
        let a_index = self.cells[a_x as usize + a_z as usize * self.width as usize].index()
            as usize
            + con as usize;
        (a_x, a_z, a_index)
    }

    /// Returns the index of the span connected to span `index` of column `(x, z)` in `direction`.
    /// `None` if there is no such connection.
    pub fn neighbor_index(&self, x: u16, z: u16, index: usize, direction: u8) -> Option<usize> {
        let con = self.spans.get(index)?.con(direction)?;
        let (_, _, neighbor_index) = self.con_indices(x as i32, z as i32, direction, con);
        Some(neighbor_index)
    }

    /// Iterates over all columns and their spans as `(x, z, span_index)`, row by row.
    pub(crate) fn span_indices(&self) -> impl Iterator<Item = (u16, u16, usize)> + '_ {
        (0..self.height).flat_map(move |z| {
            (0..self.width).flat_map(move |x| {
                self.cell_at(x, z)
                    .span_range()
                    .map(move |index| (x, z, index))
            })
        })
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompactHeightfieldError {
    /// The heightfield has no walkable spans, so there is nothing to build a navmesh from.
    #[error("Heightfield has no walkable spans")]
    NoWalkableSpans,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::heightfield::{HeightfieldBuilder, SpanInsertion};

    use super::*;

    fn heightfield(width: f32, height: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, [width, 50.0, height]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn add(heightfield: &mut Heightfield, x: u16, z: u16, min: u32, max: u32, area: AreaType) {
        heightfield
            .add_span(SpanInsertion::new(x, z, min, max, area, 0))
            .unwrap();
    }

    #[test]
    fn only_walkable_spans_are_compacted() {
        let mut heightfield = heightfield(2.0, 1.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 0, 0, 10, 12, AreaType::NOT_WALKABLE);
        add(&mut heightfield, 1, 0, 0, 3, AreaType(2));

        let compact = heightfield.into_compact(3, 1).unwrap();
        assert_eq!(compact.spans.len(), 2);
        assert_eq!(compact.areas, vec![AreaType(1), AreaType(2)]);

        let first = &compact.spans[0];
        assert_eq!(first.y, 2);
        // The unwalkable span above still limits the clearance.
        assert_eq!(first.height(), 8);
        assert_eq!(compact.spans[1].y, 3);
        assert_eq!(compact.spans[1].height(), 255);

        assert_eq!(compact.cell_at(0, 0).index(), 0);
        assert_eq!(compact.cell_at(0, 0).count(), 1);
        assert_eq!(compact.cell_at(1, 0).index(), 1);
        assert_eq!(compact.aabb.max.y, 53.0);
    }

    #[test]
    fn neighbors_within_climb_are_connected() {
        let mut heightfield = heightfield(3.0, 1.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 1, 0, 0, 3, AreaType(1));
        add(&mut heightfield, 2, 0, 0, 6, AreaType(1));
        let compact = heightfield.into_compact(3, 1).unwrap();

        // direction 2 is +x, direction 0 is -x
        assert_eq!(compact.spans[0].con(2), Some(0));
        assert_eq!(compact.spans[1].con(0), Some(0));
        assert_eq!(compact.neighbor_index(1, 0, 1, 0), Some(0));
        // The step to the third column is too high
        assert_eq!(compact.spans[1].con(2), None);
        assert_eq!(compact.neighbor_index(1, 0, 1, 2), None);
        // Out of bounds
        assert_eq!(compact.spans[0].con(0), None);
        assert_eq!(compact.spans[0].con(1), None);
        assert_eq!(compact.spans[0].con(3), None);
    }

    #[test]
    fn connection_picks_the_reachable_layer() {
        let mut heightfield = heightfield(2.0, 1.0);
        add(&mut heightfield, 0, 0, 0, 10, AreaType(1));
        add(&mut heightfield, 1, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 1, 0, 5, 10, AreaType(1));
        let compact = heightfield.into_compact(3, 1).unwrap();

        // Column (1, 0) has a floor at 2 and one at 10. Only the upper one is reachable.
        assert_eq!(compact.cell_at(1, 0).count(), 2);
        assert_eq!(compact.spans[0].con(2), Some(1));
        assert_eq!(compact.neighbor_index(0, 0, 0, 2), Some(2));
    }

    #[test]
    fn low_ceiling_blocks_connection() {
        let mut heightfield = heightfield(2.0, 1.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 1, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 1, 0, 4, 6, AreaType::NOT_WALKABLE);
        let compact = heightfield.into_compact(3, 1).unwrap();
        assert_eq!(compact.spans[0].con(2), None);
    }

    #[test]
    fn neighbors_beyond_max_layers_stay_unconnected() {
        let mut heightfield = heightfield(2.0, 1.0);
        add(&mut heightfield, 0, 0, 199, 200, AreaType(1));
        // A tall stack of thin floors, with the only reachable one on top of it.
        let buried = CompactHeightfield::MAX_LAYERS as u32 + 1;
        for j in 0..buried {
            add(&mut heightfield, 1, 0, 2 * j, 2 * j + 1, AreaType(1));
        }
        add(&mut heightfield, 1, 0, 199, 200, AreaType(1));

        let compact = heightfield.into_compact(3, 1).unwrap();
        assert_eq!(compact.cell_at(1, 0).count() as u32, buried + 1);
        let top = compact.cell_at(1, 0).span_range().last().unwrap();
        assert_eq!(compact.spans[top].y, 200);
        // Offset 63 does not fit into a connection.
        assert_eq!(compact.spans[0].con(2), None);
        assert_eq!(compact.neighbor_index(0, 0, 0, 2), None);
        // The other way around the offset is 0.
        assert_eq!(compact.spans[top].con(0), Some(0));
    }

    #[test]
    fn empty_heightfield_is_an_error() {
        let mut heightfield = heightfield(2.0, 2.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType::NOT_WALKABLE);
        assert_eq!(
            heightfield.into_compact(3, 1),
            Err(CompactHeightfieldError::NoWalkableSpans)
        );
    }
}
