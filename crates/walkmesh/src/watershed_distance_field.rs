use std::collections::VecDeque;

use crate::{
    CompactHeightfield,
    context::{TimerLabel, timer},
};

impl CompactHeightfield {
    /// Prepare for region partitioning, by calculating a distance field along the walkable surface.
    ///
    /// The distance is measured in half cells: each step to a connected neighbor adds `2`.
    /// Spans at the boundary of the walkable surface or of an area have distance `0`.
    /// The result is stored in [`CompactHeightfield::dist`] and [`CompactHeightfield::max_distance`].
    pub fn build_distance_field(&mut self) {
        let _timer = timer(TimerLabel::BuildDistanceField);

        {
            let _timer = timer(TimerLabel::BuildDistanceFieldDist);
            self.calculate_distance_field();
        }

        {
            let _timer = timer(TimerLabel::BuildDistanceFieldBlur);
            self.box_blur(1);
        }
        self.max_distance = self.dist.iter().copied().max().unwrap_or(0);
    }

    /// Computes the unblurred distance field into [`CompactHeightfield::dist`].
    ///
    /// [`CompactHeightfield::build_distance_field`] calls this before blurring the result.
    pub fn calculate_distance_field(&mut self) {
        self.dist.clear();
        self.dist.resize(self.spans.len(), u16::MAX);

        // Mark boundary cells.
        let mut queue = VecDeque::new();
        let indices: Vec<_> = self.span_indices().collect();
        for (x, z, i) in indices {
            let span = &self.spans[i];
            let area = self.areas[i];

            let mut neighbor_count = 0;
            for dir in 0..4 {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (_, _, a_index) = self.con_indices(x as i32, z as i32, dir, con);
                if self.areas[a_index] == area {
                    neighbor_count += 1;
                }
            }
            if neighbor_count != 4 {
                self.dist[i] = 0;
                queue.push_back((x as i32, z as i32, i));
            }
        }

        // Breadth-first relaxation from the boundary.
        while let Some((x, z, i)) = queue.pop_front() {
            let next_distance = self.dist[i].saturating_add(2);
            let span = &self.spans[i];
            for dir in 0..4 {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (a_x, a_z, a_index) = self.con_indices(x, z, dir, con);
                if self.dist[a_index] > next_distance {
                    self.dist[a_index] = next_distance;
                    queue.push_back((a_x, a_z, a_index));
                }
            }
        }
        self.max_distance = self.dist.iter().copied().max().unwrap_or(0);
    }

    /// Smooths the distance field. Spans at or below `threshold * 2` are kept as they are.
    fn box_blur(&mut self, threshold: u16) {
        let threshold = threshold * 2;
        let mut blurred = vec![0_u16; self.dist.len()];

        for (x, z, i) in self.span_indices() {
            let span = &self.spans[i];
            let center_distance = self.dist[i];
            if center_distance <= threshold {
                blurred[i] = center_distance;
                continue;
            }

            let mut distance = center_distance as u32;
            for dir in 0..4 {
                let neighbor_distance = span
                    .con(dir)
                    .map(|con| {
                        let (_, _, a_index) = self.con_indices(x as i32, z as i32, dir, con);
                        self.dist[a_index]
                    })
                    .unwrap_or(center_distance);
                distance += neighbor_distance as u32;
            }
            blurred[i] = ((distance + 2) / 5) as u16;
        }
        self.dist = blurred;
    }
}
