use thiserror::Error;

use crate::{
    CompactHeightfield,
    context::{TimerLabel, timer},
    region::RegionId,
};

const LOG_NB_STACKS: usize = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;
/// How far the watershed "overflows" into lower levels before new regions are flooded.
const EXPAND_ITERS: u16 = 8;

impl CompactHeightfield {
    /// Partitions the walkable surface into regions using watershed partitioning.
    ///
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    ///
    /// Regions with fewer than `merge_region_area` spans that touch exactly one other region
    /// are merged into it. Afterwards, regions with fewer than `min_region_area` spans are
    /// removed, i.e. their spans get [`RegionId::NONE`].
    ///
    /// If `border_size` is not zero, the outer `border_size` columns on each side are painted
    /// with ids carrying [`RegionId::BORDER_REGION`].
    ///
    /// The result is stored in [`CompactSpan::region`](crate::CompactSpan::region)
    /// and [`CompactHeightfield::max_region`].
    ///
    /// # Errors
    ///
    /// The distance field must be created using [`CompactHeightfield::build_distance_field`] before attempting to build regions.
    /// Fails if the watershed needs more region ids than [`RegionId::MAX`].
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), BuildRegionsError> {
        let _timer = timer(TimerLabel::BuildRegions);
        if self.dist.len() != self.spans.len() {
            return Err(BuildRegionsError::MissingDistanceField);
        }

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let id_count = {
            let _timer = timer(TimerLabel::BuildRegionsWatershed);
            let mut region_id = 1_u16;

            if border_size > 0 {
                // Make sure border will not overflow.
                let border_width = border_size.min(self.width);
                let border_height = border_size.min(self.height);
                let strips = [
                    (0, border_width, 0, self.height),
                    (self.width - border_width, self.width, 0, self.height),
                    (0, self.width, 0, border_height),
                    (0, self.width, self.height - border_height, self.height),
                ];
                for (min_x, max_x, min_z, max_z) in strips {
                    self.paint_rect_region(
                        min_x,
                        max_x,
                        min_z,
                        max_z,
                        RegionId(region_id) | RegionId::BORDER_REGION,
                        &mut src_reg,
                    );
                    region_id += 1;
                }
            }
            self.border_size = border_size;

            let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] =
                [const { Vec::new() }; NB_STACKS];
            for stack in &mut level_stacks {
                stack.reserve(256);
            }
            let mut flood_stack = Vec::with_capacity(256);

            let mut level = self.max_distance.saturating_add(1) & !1;
            let mut stack_id = NB_STACKS - 1;
            while level > 0 {
                level = level.saturating_sub(2);
                stack_id = (stack_id + 1) % NB_STACKS;

                if stack_id == 0 {
                    self.sort_cells_by_level(level, &src_reg, &mut level_stacks);
                } else {
                    // copy left overs from last level
                    let (src, dst) = level_stacks.split_at_mut(stack_id);
                    append_stacks(&src[stack_id - 1], &mut dst[0], &src_reg);
                }

                {
                    let _timer = timer(TimerLabel::BuildRegionsExpand);
                    self.expand_regions(
                        EXPAND_ITERS,
                        level,
                        &mut src_reg,
                        &mut src_dist,
                        &mut level_stacks[stack_id],
                        false,
                    );
                }

                let _timer = timer(TimerLabel::BuildRegionsFlood);
                for entry in &level_stacks[stack_id] {
                    let Some(i) = entry.index else {
                        continue;
                    };
                    if !src_reg[i].is_none() {
                        continue;
                    }
                    if region_id > RegionId::MAX.0 {
                        return Err(BuildRegionsError::TooManyRegions {
                            max: RegionId::MAX.0,
                        });
                    }
                    if self.flood_region(
                        entry.x,
                        entry.z,
                        i,
                        level,
                        RegionId(region_id),
                        &mut src_reg,
                        &mut src_dist,
                        &mut flood_stack,
                    ) {
                        region_id += 1;
                    }
                }
            }

            // Expand current regions until no empty connected cells found.
            let _timer = timer(TimerLabel::BuildRegionsExpand);
            let mut stack = Vec::new();
            self.expand_regions(
                EXPAND_ITERS * 8,
                0,
                &mut src_reg,
                &mut src_dist,
                &mut stack,
                true,
            );
            region_id as usize
        };

        {
            let _timer = timer(TimerLabel::BuildRegionsFilter);
            self.max_region = self.merge_and_filter_regions(
                &mut src_reg,
                id_count,
                min_region_area,
                merge_region_area,
            );
        }

        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).span_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Distributes the unassigned spans over the level stacks, two distance units per stack.
    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>; NB_STACKS],
    ) {
        const LOG_LEVELS_PER_STACK: u16 = 1;
        let start_level = start_level >> LOG_LEVELS_PER_STACK;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // put all cells in the level range into the appropriate stacks
        for (x, z, i) in self.span_indices() {
            if !self.areas[i].is_walkable() || !src_reg[i].is_none() {
                continue;
            }
            let level = self.dist[i] >> LOG_LEVELS_PER_STACK;
            // Spans above the current level have been left over, they go to the first stack.
            let stack_id = start_level.saturating_sub(level) as usize;
            if stack_id >= NB_STACKS {
                continue;
            }
            stacks[stack_id].push(LevelStackEntry {
                x,
                z,
                index: Some(i),
            });
        }
    }

    /// Grows the existing regions into the spans of `stack`.
    ///
    /// Each iteration picks, for every unassigned span, the neighboring region with the
    /// shortest distance to its seed. Updates are written after the whole stack was visited.
    /// At `level > 0` at most `max_iter` iterations run, at level `0` the expansion runs
    /// until no span changes.
    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for (x, z, i) in self.span_indices() {
                if self.dist[i] >= level && src_reg[i].is_none() && self.areas[i].is_walkable() {
                    stack.push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        } else {
            // mark all cells which already have a region
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| !src_reg[i].is_none()) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                let span = &self.spans[i];
                for dir in 0..4 {
                    let Some(con) = span.con(dir) else {
                        continue;
                    };
                    let (_, _, a_index) = self.con_indices(entry.x as i32, entry.z as i32, dir, con);
                    if self.areas[a_index] != area {
                        continue;
                    }
                    let a_region = src_reg[a_index];
                    let a_dist = src_dist[a_index].saturating_add(2);
                    if a_region.is_interior() && a_dist < distance {
                        region = a_region;
                        distance = a_dist;
                    }
                }
                if region.is_none() {
                    failed += 1;
                } else {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance,
                    });
                }
            }

            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Floods `region` from the seed span over all connected same-area spans with a
    /// distance of at least `level - 2`.
    ///
    /// Spans next to another region are left unassigned, so that regions do not touch
    /// through a flood. Returns `false` if the seed itself could not be claimed.
    fn flood_region(
        &self,
        x: u16,
        z: u16,
        index: usize,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<(i32, i32, usize)>,
    ) -> bool {
        let area = self.areas[index];

        // Flood fill mark region.
        stack.clear();
        stack.push((x as i32, z as i32, index));
        src_reg[index] = region;
        src_dist[index] = 0;

        let min_level = level.saturating_sub(2);
        let mut count = 0;

        while let Some((x, z, i)) = stack.pop() {
            let span = &self.spans[i];

            // Check if any of the neighbours already have a valid region set.
            let mut touches_other_region = false;
            for dir in 0..4 {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (a_x, a_z, a_index) = self.con_indices(x, z, dir, con);
                if self.areas[a_index] != area {
                    continue;
                }
                let a_region = src_reg[a_index];
                if a_region.is_border() {
                    continue;
                }
                if !a_region.is_none() && a_region != region {
                    touches_other_region = true;
                    break;
                }

                // Diagonal neighbour.
                let diagonal_dir = (dir + 1) & 0x3;
                let Some(diagonal_con) = self.spans[a_index].con(diagonal_dir) else {
                    continue;
                };
                let (_, _, b_index) = self.con_indices(a_x, a_z, diagonal_dir, diagonal_con);
                if self.areas[b_index] != area {
                    continue;
                }
                // Unlike direct neighbors, diagonal border spans count as another region.
                let b_region = src_reg[b_index];
                if !b_region.is_none() && b_region != region {
                    touches_other_region = true;
                    break;
                }
            }
            if touches_other_region {
                src_reg[i] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (a_x, a_z, a_index) = self.con_indices(x, z, dir, con);
                if self.areas[a_index] != area {
                    continue;
                }
                if self.dist[a_index] >= min_level && src_reg[a_index].is_none() {
                    src_reg[a_index] = region;
                    src_dist[a_index] = 0;
                    stack.push((a_x, a_z, a_index));
                }
            }
        }
        count > 0
    }

    /// Merges small regions into their only neighbor, removes regions below `min_region_area`
    /// and compacts the remaining interior ids to `1..=n`. Border ids are left untouched.
    ///
    /// Returns the highest interior id after compaction.
    fn merge_and_filter_regions(
        &self,
        src_reg: &mut [RegionId],
        id_count: usize,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> RegionId {
        let mut regions = vec![RegionInfo::default(); id_count];

        for (x, z, i) in self.span_indices() {
            let region = src_reg[i];
            if !region.is_interior() {
                continue;
            }
            let info = &mut regions[region.0 as usize];
            info.span_count += 1;

            let span = &self.spans[i];
            for dir in 0..4 {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (_, _, a_index) = self.con_indices(x as i32, z as i32, dir, con);
                let neighbor = src_reg[a_index];
                if neighbor.is_interior()
                    && neighbor != region
                    && self.areas[a_index] == self.areas[i]
                    && !info.neighbors.contains(&neighbor)
                {
                    info.neighbors.push(neighbor);
                }
            }
        }

        // Merge small regions into their only neighbor, smallest first.
        let merge_region_area = merge_region_area as usize;
        loop {
            let mut candidates: Vec<usize> = (1..id_count)
                .filter(|&id| regions[id].can_merge(merge_region_area))
                .collect();
            candidates.sort_by_key(|&id| (regions[id].span_count, id));

            let mut merged_any = false;
            for id in candidates {
                // An earlier merge of this pass may have changed the region.
                if !regions[id].can_merge(merge_region_area) {
                    continue;
                }
                let target = regions[id].neighbors[0];
                merge_region_into(&mut regions, RegionId(id as u16), target);
                merged_any = true;
            }
            if !merged_any {
                break;
            }
        }

        // Remove small regions and compact the ids.
        let mut compacted = vec![RegionId::NONE; id_count];
        let mut next_id = 0_u16;
        for (id, info) in regions.iter().enumerate().skip(1) {
            if info.merged_into.is_some() || info.span_count == 0 {
                continue;
            }
            if info.span_count < min_region_area as usize {
                continue;
            }
            next_id += 1;
            compacted[id] = RegionId(next_id);
        }

        for region in src_reg.iter_mut() {
            if !region.is_interior() {
                continue;
            }
            let mut id = region.0 as usize;
            while let Some(target) = regions[id].merged_into {
                id = target.0 as usize;
            }
            *region = compacted[id];
        }
        RegionId(next_id)
    }
}

fn merge_region_into(regions: &mut [RegionInfo], from: RegionId, into: RegionId) {
    let source = std::mem::take(&mut regions[from.0 as usize]);
    regions[from.0 as usize].merged_into = Some(into);

    let target = &mut regions[into.0 as usize];
    target.span_count += source.span_count;
    for neighbor in source.neighbors {
        if neighbor != into && !target.neighbors.contains(&neighbor) {
            target.neighbors.push(neighbor);
        }
    }

    for (id, info) in regions.iter_mut().enumerate() {
        if !info.neighbors.contains(&from) {
            continue;
        }
        info.neighbors.retain(|&neighbor| neighbor != from);
        if id != into.0 as usize && !info.neighbors.contains(&into) {
            info.neighbors.push(into);
        }
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    for entry in src_stack {
        let Some(i) = entry.index else {
            continue;
        };
        if !src_reg[i].is_none() {
            continue;
        }
        dst_stack.push(entry.clone());
    }
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    /// `None` once the span got a region.
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

#[derive(Clone, Debug, Default)]
struct RegionInfo {
    span_count: usize,
    /// Interior regions of the same area that share an edge with this one.
    neighbors: Vec<RegionId>,
    merged_into: Option<RegionId>,
}

impl RegionInfo {
    fn can_merge(&self, merge_region_area: usize) -> bool {
        self.merged_into.is_none()
            && self.span_count > 0
            && self.span_count < merge_region_area
            && self.neighbors.len() == 1
    }
}

/// Errors that can occur when building regions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildRegionsError {
    /// [`CompactHeightfield::build_distance_field`] has not been called.
    #[error("The distance field has not been built")]
    MissingDistanceField,
    /// The watershed produced more regions than fit into a [`RegionId`].
    #[error("Too many regions, at most {max} are supported")]
    TooManyRegions {
        /// The highest supported region id.
        max: u16,
    },
}
