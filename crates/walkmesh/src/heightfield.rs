//! The heightfield module contains the types and functions for working with [`Heightfield`]s.
//!
//! A heightfield is a 3D grid of [`Span`]s, where each column contains 0, 1, or more spans.

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{AreaType, Span, SpanBuilder, SpanCache, SpanKey, Spans},
};

/// A dynamic heightfield representing obstructed space.
/// Build with [`HeightfieldBuilder`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Heightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The indices to the spans in the heightfield in width*height order
    /// Each index corresponds to a column in the heightfield by pointing to the lowest span in the column
    pub spans: Vec<Option<SpanKey>>,
    /// All spans in the heightfield
    pub allocated_spans: Spans,
}

impl Heightfield {
    /// Inserts a span into its column, merging it with every span it overlaps.
    ///
    /// The merged span covers the union of all merged intervals.
    /// If the tops of the new and an overlapped span are within `flag_merge_threshold` of each other,
    /// the higher area ID wins, otherwise the area of the span with the higher top is kept.
    pub fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        if insertion.x >= self.width || insertion.z >= self.height {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds {
                x: insertion.x,
                z: insertion.z,
            });
        }
        let mut new_span = insertion.span;
        if !new_span.is_valid() {
            return Err(SpanInsertionError::InvalidInterval {
                min: new_span.min(),
                max: new_span.max(),
            });
        }
        let column_index = self.column_index(insertion.x, insertion.z);

        let mut previous_span_key = None;
        let mut current_span_key_iter = self.spans[column_index];
        // Insert the new span, possibly merging it with existing spans.
        while let Some(current_span_key) = current_span_key_iter {
            let current_span = self.span(current_span_key);
            let next_key = current_span.next();
            if current_span.min() > new_span.max() {
                // Current span is completely above the new span, break.
                break;
            }
            if current_span.max() < new_span.min() {
                // Current span is completely below the new span. Keep going.
                previous_span_key = Some(current_span_key);
                current_span_key_iter = next_key;
                continue;
            }

            // The new span overlaps with an existing span. Merge them.
            // Merge flags before the interval, the tops decide which area survives.
            if new_span.max().abs_diff(current_span.max()) <= insertion.flag_merge_threshold as u32
            {
                // Higher area ID numbers indicate higher resolution priority.
                new_span.set_area(new_span.area().max(current_span.area()));
            } else if current_span.max() > new_span.max() {
                new_span.set_area(current_span.area());
            }
            new_span.set_min(new_span.min().min(current_span.min()));
            new_span.set_max(new_span.max().max(current_span.max()));

            // Remove the current span since it's now merged with new_span.
            // Keep going because there might be other overlapping spans that also need to be merged.
            self.allocated_spans.remove(current_span_key);
            if let Some(previous_span_key) = previous_span_key {
                self.span_mut(previous_span_key).set_next(next_key);
            } else {
                self.spans[column_index] = next_key;
            }
            current_span_key_iter = next_key;
        }

        if let Some(previous_span_key) = previous_span_key {
            // Insert new span after prev
            new_span.set_next(self.span(previous_span_key).next());
            let new_span_key = self.allocated_spans.insert(new_span);
            self.span_mut(previous_span_key).set_next(new_span_key);
        } else {
            // This span should go before the others in the list
            new_span.set_next(self.spans[column_index]);
            let new_span_key = self.allocated_spans.insert(new_span);
            self.spans[column_index] = Some(new_span_key);
        }

        Ok(())
    }

    /// Re-inserts spans previously captured with [`Heightfield::cache_spans`], in order.
    pub fn add_spans(
        &mut self,
        cached_spans: &[SpanCache],
        flag_merge_threshold: u16,
    ) -> Result<(), SpanInsertionError> {
        for cached in cached_spans {
            self.add_span(SpanInsertion {
                x: cached.x,
                z: cached.z,
                flag_merge_threshold,
                span: SpanBuilder {
                    min: cached.min,
                    max: cached.max,
                    area: cached.area,
                    next: None,
                }
                .build(),
            })?;
        }
        Ok(())
    }

    /// Snapshots every span of the heightfield, row by row, bottom to top within a column.
    pub fn cache_spans(&self) -> Vec<SpanCache> {
        let mut cached_spans = Vec::with_capacity(self.span_count());
        for z in 0..self.height {
            for x in 0..self.width {
                cached_spans.extend(self.column_spans(x, z).map(|span| SpanCache {
                    x,
                    z,
                    min: span.min(),
                    max: span.max(),
                    area: span.area(),
                }));
            }
        }
        cached_spans
    }

    /// The number of spans currently allocated in the heightfield.
    #[inline]
    pub fn span_count(&self) -> usize {
        self.allocated_spans.len()
    }

    /// The number of spans with a walkable area.
    pub fn walkable_span_count(&self) -> usize {
        self.allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count()
    }

    /// Removes all spans while keeping the grid dimensions and the span pool's memory.
    pub fn reset(&mut self) {
        self.spans.fill(None);
        self.allocated_spans.clear();
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the key of the lowest span in the column at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x >= self.width || z >= self.height {
            // Invalid coordinates
            return None;
        }
        self.spans[self.column_index(x, z)]
    }

    /// Returns the span at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        let span_key = self.span_key_at(x, z)?;
        Some(self.span(span_key))
    }

    /// Returns a mutable reference to the span at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_at_mut(&mut self, x: u16, z: u16) -> Option<&mut Span> {
        let span_key = self.span_key_at(x, z)?;
        Some(self.span_mut(span_key))
    }

    /// Iterates over the spans of a column from bottom to top.
    pub fn column_spans(&self, x: u16, z: u16) -> impl Iterator<Item = &Span> + '_ {
        let mut span_key_iter = self.span_key_at(x, z);
        std::iter::from_fn(move || {
            let span = self.span(span_key_iter?);
            span_key_iter = span.next();
            Some(span)
        })
    }

    /// Returns a reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    /// Returns a mutable reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }

    /// The floor of the next-higher span in the column, or [`Span::MAX_HEIGHT`] for the topmost span.
    #[inline]
    pub fn span_ceiling(&self, span: &Span) -> u32 {
        span.next()
            .map_or(Span::MAX_HEIGHT, |next| self.span(next).min())
    }
}

/// A builder for [`Heightfield`]s.
pub struct HeightfieldBuilder {
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Builds the heightfield.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        if !(self.cell_size > 0.0 && self.cell_height > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellSize {
                cell_size: self.cell_size,
                cell_height: self.cell_height,
            });
        }
        let width = (self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5;
        let height = (self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5;
        if width > u16::MAX as f32 || height > u16::MAX as f32 {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        let column_count = width as u128 * height as u128;
        if column_count > usize::MAX as u128 {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        if column_count == 0 {
            return Err(HeightfieldBuilderError::Empty { width, height });
        }
        let column_count = column_count as usize;
        Ok(Heightfield {
            width: width as u16,
            height: height as u16,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            spans: vec![None; column_count],
            allocated_spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Errors that can occur when building a [`Heightfield`] with [`HeightfieldBuilder::build`].
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// Happens when the column count is too large.
    #[error("Column count (width*height) is too large, got {width}*{height}")]
    ColumnCountTooLarge {
        /// The width of the heightfield along the x-axis in cell units
        width: f32,
        /// The height of the heightfield along the z-axis in cell units
        height: f32,
    },
    /// Happens when the AABB is too small to hold a single column.
    #[error("Heightfield has no columns, got {width}*{height}")]
    Empty {
        /// The width of the heightfield along the x-axis in cell units
        width: f32,
        /// The height of the heightfield along the z-axis in cell units
        height: f32,
    },
    /// Happens when a cell dimension is zero, negative or NaN.
    #[error("Cell size and cell height must be positive, got {cell_size} and {cell_height}")]
    InvalidCellSize {
        /// The size of each cell on the xz-plane
        cell_size: f32,
        /// The size of each cell along the y-axis
        cell_height: f32,
    },
}

/// Errors that can occur when inserting a span into a [`Heightfield`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SpanInsertionError {
    /// Happens when the column index is out of bounds.
    #[error("column index out of bounds: x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// The x-coordinate of the span
        x: u16,
        /// The z-coordinate of the span
        z: u16,
    },
    /// Happens when the span is empty or taller than [`Span::MAX_HEIGHT`].
    #[error("invalid span interval [{min}, {max})")]
    InvalidInterval {
        /// Height of the floor
        min: u32,
        /// Height of the ceiling
        max: u32,
    },
}

/// A span to insert with [`Heightfield::add_span`].
pub struct SpanInsertion {
    /// The x-coordinate of the span
    pub x: u16,
    /// The z-coordinate of the span
    pub z: u16,
    /// Maximum difference between the ceilings of two spans to merge area type IDs
    pub flag_merge_threshold: u16,
    /// The span to insert
    pub span: Span,
}

/// Convenience for building an insertion without spelling out the [`SpanBuilder`].
impl SpanInsertion {
    /// Creates an insertion of the interval `[min, max)` with the given area.
    pub fn new(x: u16, z: u16, min: u32, max: u32, area: AreaType, flag_merge_threshold: u16) -> Self {
        Self {
            x,
            z,
            flag_merge_threshold,
            span: SpanBuilder {
                min,
                max,
                area,
                next: None,
            }
            .build(),
        }
    }
}

#[cfg(test)]
mod tests {

    use glam::Vec3A;

    use crate::{
        Aabb3d,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn height_field() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn span_low() -> SpanBuilder {
        SpanBuilder {
            min: 2,
            max: 4,
            area: AreaType(2),
            next: None,
        }
    }

    fn span_mid() -> SpanBuilder {
        SpanBuilder {
            min: 4,
            max: 7,
            area: AreaType(2),
            next: None,
        }
    }

    fn span_high() -> SpanBuilder {
        SpanBuilder {
            min: 8,
            max: 10,
            area: AreaType(2),
            next: None,
        }
    }

    fn insert(heightfield: &mut Heightfield, span: Span, flag_merge_threshold: u16) {
        heightfield
            .add_span(SpanInsertion {
                x: 1,
                z: 3,
                flag_merge_threshold,
                span,
            })
            .unwrap();
    }

    #[test]
    fn can_create_heightfield() {
        let heightfield = height_field();
        assert_eq!(heightfield.width, 10);
        assert_eq!(heightfield.height, 10);
        assert_eq!(heightfield.spans.len(), 100);
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        let result = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 0.0,
            cell_height: 1.0,
        }
        .build();
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::InvalidCellSize { .. })
        ));
    }

    #[test]
    fn can_add_span() {
        let mut heightfield = height_field();
        let expected_span = span_low().build();
        insert(&mut heightfield, expected_span.clone(), 0);
        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(*span, expected_span);

        let empty_span = heightfield.span_at(3, 1);
        assert_eq!(empty_span, None);
    }

    #[test]
    fn rejects_out_of_bounds_and_empty_spans() {
        let mut heightfield = height_field();
        let result = heightfield.add_span(SpanInsertion::new(10, 0, 0, 1, AreaType(1), 0));
        assert_eq!(
            result,
            Err(SpanInsertionError::ColumnIndexOutOfBounds { x: 10, z: 0 })
        );
        let result = heightfield.add_span(SpanInsertion::new(0, 0, 3, 3, AreaType(1), 0));
        assert_eq!(
            result,
            Err(SpanInsertionError::InvalidInterval { min: 3, max: 3 })
        );
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn can_add_higher_span_in_same_column() {
        let mut heightfield = height_field();
        let span_low = span_low().build();
        insert(&mut heightfield, span_low.clone(), 0);
        let span_high = span_high().build();
        insert(&mut heightfield, span_high.clone(), 0);

        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq_without_next(span, &span_low);
        let next_span = heightfield.span(span.next().unwrap());
        assert_eq_without_next(next_span, &span_high);
        assert_eq!(next_span.next(), None);
    }

    #[test]
    fn can_add_lower_span_in_same_column() {
        let mut heightfield = height_field();
        let span_high = span_high().build();
        insert(&mut heightfield, span_high.clone(), 0);
        let span_low = span_low().build();
        insert(&mut heightfield, span_low.clone(), 0);

        let spans: Vec<_> = heightfield.column_spans(1, 3).collect();
        assert_eq!(spans.len(), 2);
        assert_eq_without_next(spans[0], &span_low);
        assert_eq_without_next(spans[1], &span_high);
    }

    #[test]
    fn can_merge_spans() {
        let mut heightfield = height_field();
        let span_low = span_low().build();
        insert(&mut heightfield, span_low.clone(), 0);
        let span_mid = span_mid().build();
        insert(&mut heightfield, span_mid.clone(), 0);

        let merged_span = SpanBuilder {
            min: span_low.min(),
            max: span_mid.max(),
            area: span_mid.area(),
            next: None,
        }
        .build();

        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(*span, merged_span);
        assert_eq!(heightfield.span_count(), 1);
    }

    #[test]
    fn merge_bridging_span_absorbs_both_neighbors() {
        let mut heightfield = height_field();
        insert(&mut heightfield, span_low().build(), 0);
        insert(&mut heightfield, span_high().build(), 0);
        insert(
            &mut heightfield,
            SpanBuilder {
                min: 3,
                max: 9,
                area: AreaType(1),
                next: None,
            }
            .build(),
            0,
        );
        let spans: Vec<_> = heightfield.column_spans(1, 3).collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].min(), 2);
        assert_eq!(spans[0].max(), 10);
        // The absorbed high span ended on top, so its area wins.
        assert_eq!(spans[0].area(), AreaType(2));
        assert_eq!(heightfield.span_count(), 1);
    }

    #[test]
    fn merge_within_threshold_keeps_highest_area() {
        let mut heightfield = height_field();
        insert(
            &mut heightfield,
            SpanBuilder {
                min: 0,
                max: 5,
                area: AreaType(7),
                next: None,
            }
            .build(),
            0,
        );
        insert(
            &mut heightfield,
            SpanBuilder {
                min: 1,
                max: 6,
                area: AreaType(3),
                next: None,
            }
            .build(),
            1,
        );
        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(span.area(), AreaType(7));
        assert_eq!((span.min(), span.max()), (0, 6));
    }

    #[test]
    fn merge_beyond_threshold_keeps_top_area() {
        let mut heightfield = height_field();
        insert(
            &mut heightfield,
            SpanBuilder {
                min: 0,
                max: 5,
                area: AreaType(7),
                next: None,
            }
            .build(),
            0,
        );
        insert(
            &mut heightfield,
            SpanBuilder {
                min: 1,
                max: 9,
                area: AreaType(3),
                next: None,
            }
            .build(),
            1,
        );
        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(span.area(), AreaType(3));
    }

    #[test]
    fn cached_spans_replay_into_identical_heightfield() {
        let mut heightfield = height_field();
        insert(&mut heightfield, span_low().build(), 0);
        insert(&mut heightfield, span_high().build(), 0);
        heightfield
            .add_span(SpanInsertion::new(4, 4, 0, 1, AreaType(5), 0))
            .unwrap();
        let cached = heightfield.cache_spans();
        assert_eq!(cached.len(), heightfield.span_count());

        let mut replayed = height_field();
        replayed.add_spans(&cached, 0).unwrap();
        assert_eq!(replayed.cache_spans(), cached);

        heightfield.reset();
        assert_eq!(heightfield.span_count(), 0);
        assert_eq!(heightfield.span_at(1, 3), None);
    }

    #[track_caller]
    fn assert_eq_without_next(span: &Span, expected_span: &Span) {
        assert_eq!(span.min(), expected_span.min(), "min is not equal");
        assert_eq!(span.max(), expected_span.max(), "max is not equal");
        assert_eq!(span.area(), expected_span.area(), "area is not equal");
    }
}
