//! Filters that run on the [`Heightfield`] before it is compacted.
//! They only ever change area types, never span geometry.

use crate::{
    context::{TimerLabel, timer},
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, Span, SpanKey},
};

/// How [`Heightfield::filter_ledge_spans_with_slope`] treats spans on steep local slopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum NeighborSlopeFilterMode {
    /// Only drops to a neighbor are considered.
    None,
    /// Also clear spans whose accessible neighbors' floors differ by more than `walkable_climb`.
    #[default]
    Recast,
    /// Also clear spans whose accessible neighbors' floors differ by more than the step two cells
    /// of the steepest walkable slope would make.
    UseHeightFromWalkableSlope,
}

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max < walkable_climb`
    ///
    /// # Arguments
    ///
    /// * `walkable_climb` - Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        let _timer = timer(TimerLabel::FilterLowObstacles);
        for z in 0..self.height {
            for x in 0..self.width {
                // max, original walkability and area of the span below
                let mut previous: Option<(u32, bool, AreaType)> = None;
                let mut span_key_iter = self.span_key_at(x, z);

                while let Some(span_key) = span_key_iter {
                    let span = self.span_mut(span_key);
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some((previous_max, previous_walkable, previous_area)) = previous {
                        if !walkable
                            && previous_walkable
                            && span.max().abs_diff(previous_max) <= walkable_climb as u32
                        {
                            span.set_area(previous_area);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous = Some((span.max(), walkable, span.area()));
                    span_key_iter = span.next();
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable, also clearing spans on steep local slopes.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// Same as [`Heightfield::filter_ledge_spans_with_slope`] with [`NeighborSlopeFilterMode::Recast`].
    ///
    /// # Arguments
    ///
    /// * `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    /// * `walkable_climb` - Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        self.filter_ledge_spans_with_slope(
            walkable_height,
            walkable_climb,
            NeighborSlopeFilterMode::Recast,
            0.0,
        );
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// # Arguments
    ///
    /// * `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    /// * `walkable_climb` - Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    /// * `mode` - Which additional slope test to run on accessible neighbors.
    /// * `max_step_from_walkable_slope` - Height difference along one cell of the steepest walkable slope.
    ///   Only used by [`NeighborSlopeFilterMode::UseHeightFromWalkableSlope`]. [Units: wu]
    pub fn filter_ledge_spans_with_slope(
        &mut self,
        walkable_height: u16,
        walkable_climb: u16,
        mode: NeighborSlopeFilterMode,
        max_step_from_walkable_slope: f32,
    ) {
        let _timer = timer(TimerLabel::FilterBorder);
        let max_step_for_two_cells =
            (2.0 * max_step_from_walkable_slope / self.cell_height).ceil() as i64;
        let walkable_height = walkable_height as i64;
        let walkable_climb = walkable_climb as i64;

        // Only heights are read, so the clearing can wait until every span was visited.
        let mut ledges: Vec<SpanKey> = Vec::new();
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let floor = span.max() as i64;
                    let ceiling = self.span_ceiling(span) as i64;

                    // The difference between this walkable area and the lowest neighbor walkable area.
                    // This is the difference between the current span and all neighbor spans that have
                    // enough space for an agent to move between, but not accounting at all for surface slope.
                    let mut lowest_neighbor_floor_difference = Span::MAX_HEIGHT as i64;

                    // Min and max height of accessible neighbours.
                    let mut lowest_traversable_neighbor_floor = floor;
                    let mut highest_traversable_neighbor_floor = floor;

                    for direction in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(direction) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(direction) as i32;

                        // Skip neighbours which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(-walkable_climb - floor);
                            continue;
                        }

                        let mut neighbor_key_iter =
                            self.span_key_at(neighbor_x as u16, neighbor_z as u16);

                        // From minus infinity to the first span.
                        let neighbor_ceiling = neighbor_key_iter
                            .map_or(Span::MAX_HEIGHT, |key| self.span(key).min())
                            as i64;
                        let neighbor_floor = -walkable_climb;

                        // Skip neighbour if the gap between the spans is too small.
                        if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                            > walkable_height
                        {
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor - floor);
                        }

                        // Rest of the spans.
                        while let Some(neighbor_key) = neighbor_key_iter {
                            let neighbor_span = self.span(neighbor_key);
                            let neighbor_floor = neighbor_span.max() as i64;
                            let neighbor_ceiling = self.span_ceiling(neighbor_span) as i64;
                            neighbor_key_iter = neighbor_span.next();

                            // Only consider neighboring areas that have enough overlap to be potentially traversable.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                <= walkable_height
                            {
                                // No space to traverse between them.
                                continue;
                            }

                            let neighbor_floor_difference = neighbor_floor - floor;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                            // Find min/max accessible neighbor height.
                            // Only consider neighbors that are at most walkable_climb away.
                            if mode != NeighborSlopeFilterMode::None
                                && neighbor_floor_difference.abs() <= walkable_climb
                            {
                                lowest_traversable_neighbor_floor =
                                    lowest_traversable_neighbor_floor.min(neighbor_floor);
                                highest_traversable_neighbor_floor =
                                    highest_traversable_neighbor_floor.max(neighbor_floor);
                            }
                        }
                    }

                    let traversable_spread =
                        highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor;
                    // The current span is close to a ledge if the magnitude of the drop to any neighbour span
                    // is greater than the walkable_climb distance.
                    // That is, there is a gap that is large enough to let an agent move between them,
                    // but the drop (surface slope) is too large to allow it.
                    let is_ledge = lowest_neighbor_floor_difference < -walkable_climb
                        // If the difference between all neighbor floors is too large,
                        // this is a steep slope, so mark the span as an unwalkable ledge.
                        || match mode {
                            NeighborSlopeFilterMode::None => false,
                            NeighborSlopeFilterMode::Recast => traversable_spread > walkable_climb,
                            NeighborSlopeFilterMode::UseHeightFromWalkableSlope => {
                                traversable_spread > max_step_for_two_cells
                            }
                        };
                    if is_ledge {
                        ledges.push(span_key);
                    }
                }
            }
        }
        for span_key in ledges {
            self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified walkable height.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to [`Span::MAX_HEIGHT`].
    ///
    /// # Arguments
    ///
    /// * `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        let _timer = timer(TimerLabel::FilterWalkable);
        // Remove walkable flag from spans which do not have enough
        // space above them for the agent to stand there.
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    let floor = span.max();
                    let ceiling = self.span_ceiling(span);
                    span_key_iter = span.next();
                    if ceiling.saturating_sub(floor) < walkable_height as u32 {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// A variant of [`Heightfield::filter_walkable_low_height_spans`] for stacked thin geometry.
    ///
    /// Walking each column from the top down, a span with too little clearance is kept if it is the first
    /// low span below a valid span, or if it leaves `walkable_height` voxels of space to the previously kept one.
    /// Every other low span is marked not walkable. Only the lowest 64 spans of a column are considered.
    ///
    /// # Arguments
    ///
    /// * `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    pub fn filter_walkable_low_height_spans_sequences(&mut self, walkable_height: u16) {
        const MAX_SPANS: usize = 64;

        let _timer = timer(TimerLabel::FilterWalkable);
        let walkable_height = walkable_height as i64;
        // (key, floor, clearance, area) from bottom to top
        let mut column: Vec<(SpanKey, i64, i64, AreaType)> = Vec::with_capacity(MAX_SPANS);
        for z in 0..self.height {
            for x in 0..self.width {
                column.clear();
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    if column.len() >= MAX_SPANS {
                        break;
                    }
                    let span = self.span(span_key);
                    let floor = span.max() as i64;
                    let ceiling = self.span_ceiling(span) as i64;
                    column.push((
                        span_key,
                        floor,
                        (ceiling - floor).clamp(0, 0xff),
                        span.area(),
                    ));
                    span_key_iter = span.next();
                }

                let mut next_allowed_base = Span::MAX_HEIGHT as i64;
                for (_, floor, clearance, area) in column.iter_mut().rev() {
                    if *clearance < walkable_height {
                        if *floor < next_allowed_base {
                            next_allowed_base = (*floor - walkable_height).max(0);
                        } else {
                            *area = AreaType::NOT_WALKABLE;
                        }
                    } else if area.is_walkable() {
                        next_allowed_base = *floor;
                    }
                }

                for (span_key, _, _, area) in &column {
                    self.span_mut(*span_key).set_area(*area);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d,
        heightfield::{HeightfieldBuilder, SpanInsertion},
    };

    use super::*;

    fn heightfield(size: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, [size, 100.0, size]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn add(heightfield: &mut Heightfield, x: u16, z: u16, min: u32, max: u32, area: u8) {
        heightfield
            .add_span(SpanInsertion::new(x, z, min, max, AreaType(area), 0))
            .unwrap();
    }

    fn areas(heightfield: &Heightfield, x: u16, z: u16) -> Vec<AreaType> {
        heightfield.column_spans(x, z).map(|s| s.area()).collect()
    }

    fn terrain(size: u16, floor: impl Fn(u16, u16) -> u32) -> Heightfield {
        let mut heightfield = heightfield(size as f32);
        for z in 0..size {
            for x in 0..size {
                add(&mut heightfield, x, z, 0, floor(x, z), 1);
            }
        }
        heightfield
    }

    fn flat(size: u16, floor: u32) -> Heightfield {
        terrain(size, |_, _| floor)
    }

    #[test]
    fn low_hanging_obstacle_becomes_walkable() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, 1);
        add(&mut heightfield, 0, 0, 3, 4, 0);
        add(&mut heightfield, 0, 0, 5, 6, 0);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        // The second obstacle sits on a span that was not walkable before filtering.
        assert_eq!(
            areas(&heightfield, 0, 0),
            vec![AreaType(1), AreaType(1), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn high_obstacle_stays_unwalkable() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, 1);
        add(&mut heightfield, 0, 0, 3, 8, 0);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        assert_eq!(
            areas(&heightfield, 0, 0),
            vec![AreaType(1), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn low_ceiling_clears_span() {
        let mut low = heightfield(1.0);
        add(&mut low, 0, 0, 0, 2, 1);
        add(&mut low, 0, 0, 4, 6, 1);
        low.filter_walkable_low_height_spans(3);
        assert_eq!(areas(&low, 0, 0), vec![AreaType::NOT_WALKABLE, AreaType(1)]);

        let mut high = heightfield(1.0);
        add(&mut high, 0, 0, 0, 2, 1);
        add(&mut high, 0, 0, 5, 6, 1);
        high.filter_walkable_low_height_spans(3);
        assert_eq!(areas(&high, 0, 0), vec![AreaType(1), AreaType(1)]);
    }

    #[test]
    fn ledge_filter_clears_border_and_keeps_interior() {
        let mut heightfield = flat(3, 1);
        heightfield.filter_ledge_spans(2, 1);
        for z in 0..3 {
            for x in 0..3 {
                let expected = if (x, z) == (1, 1) {
                    AreaType(1)
                } else {
                    AreaType::NOT_WALKABLE
                };
                assert_eq!(areas(&heightfield, x, z), vec![expected], "column ({x}, {z})");
            }
        }
    }

    #[test]
    fn ledge_filter_clears_span_above_a_drop() {
        let mut heightfield = flat(5, 1);
        // A pillar in the middle drops off to all sides.
        add(&mut heightfield, 2, 2, 0, 10, 1);
        heightfield.filter_ledge_spans(2, 1);
        assert_eq!(areas(&heightfield, 2, 2), vec![AreaType::NOT_WALKABLE]);
        // Its neighbors can step down onto the floor without noticing the pillar.
        assert_eq!(areas(&heightfield, 1, 2), vec![AreaType(1)]);
    }

    #[test]
    fn slope_modes_differ_on_uneven_neighbors() {
        // Neighbors of the center are one step lower and one step higher.
        let uneven = || {
            terrain(5, |x, z| match (x, z) {
                (1, 2) => 3,
                (3, 2) => 5,
                _ => 4,
            })
        };

        let mut heightfield = uneven();
        heightfield.filter_ledge_spans_with_slope(2, 1, NeighborSlopeFilterMode::None, 0.0);
        assert_eq!(areas(&heightfield, 2, 2), vec![AreaType(1)]);

        let mut heightfield = uneven();
        heightfield.filter_ledge_spans_with_slope(2, 1, NeighborSlopeFilterMode::Recast, 0.0);
        assert_eq!(areas(&heightfield, 2, 2), vec![AreaType::NOT_WALKABLE]);

        let mut heightfield = uneven();
        heightfield.filter_ledge_spans_with_slope(
            2,
            1,
            NeighborSlopeFilterMode::UseHeightFromWalkableSlope,
            1.0,
        );
        assert_eq!(areas(&heightfield, 2, 2), vec![AreaType(1)]);
    }

    #[test]
    fn sequence_filter_keeps_single_low_span_below_valid_span() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, 1);
        add(&mut heightfield, 0, 0, 3, 4, 1);
        add(&mut heightfield, 0, 0, 5, 6, 1);
        heightfield.filter_walkable_low_height_spans_sequences(3);
        // Top span has unlimited clearance, the one below it is the first low span,
        // the lowest one is too close to it.
        assert_eq!(
            areas(&heightfield, 0, 0),
            vec![AreaType::NOT_WALKABLE, AreaType(1), AreaType(1)]
        );
    }

    #[test]
    fn sequence_filter_keeps_spaced_low_spans() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, 1);
        add(&mut heightfield, 0, 0, 4, 8, 1);
        add(&mut heightfield, 0, 0, 9, 10, 1);
        heightfield.filter_walkable_low_height_spans_sequences(3);
        assert_eq!(areas(&heightfield, 0, 0), vec![AreaType(1); 3]);
    }
}
