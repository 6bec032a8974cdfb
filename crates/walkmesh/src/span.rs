use std::ops::{Deref, DerefMut};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// A key for a span in [`Spans`].
    pub struct SpanKey;
}

/// The pool all spans of a [`Heightfield`](crate::Heightfield) live in.
///
/// Removed spans free their slot, and the slot is handed out again on the next insertion,
/// so a heightfield that is rasterized, filtered and reset does not churn the allocator.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Spans(SlotMap<SpanKey, Span>);

impl Deref for Spans {
    type Target = SlotMap<SpanKey, Span>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Spans {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Spans {
    const DEFAULT_CAPACITY: usize = 1024;

    /// Creates an empty pool that can hold at least `min_capacity` spans before growing.
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(Self::DEFAULT_CAPACITY);
        Self(SlotMap::with_capacity_and_key(capacity))
    }
}

/// Builds a [`Span`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanBuilder {
    /// Height of the floor
    pub min: u32,
    /// Height of the ceiling
    pub max: u32,
    /// Area type ID
    pub area: AreaType,
    /// The key of the next-higher span in the column
    pub next: Option<SpanKey>,
}

impl SpanBuilder {
    /// Builds the span.
    pub fn build(self) -> Span {
        Span {
            min: self.min,
            max: self.max,
            area: self.area,
            next: self.next,
        }
    }
}

impl From<SpanBuilder> for Span {
    fn from(builder: SpanBuilder) -> Self {
        builder.build()
    }
}

/// A vertical interval of solid voxels in one column of a [`Heightfield`](crate::Heightfield).
/// Build with [`SpanBuilder`]
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    /// Height of the floor. [Limit: < `max`]
    min: u32,
    /// Height of the ceiling. [Limit: <= [`Span::MAX_HEIGHT`]]
    max: u32,
    /// Area type ID
    area: AreaType,
    /// The key of the next-higher span in the column
    next: Option<SpanKey>,
}

impl Span {
    /// Number of bits available for span heights.
    pub const HEIGHT_BITS: u32 = 29;
    /// The maximum height of a span, and the implicit ceiling above the highest span in a column.
    pub const MAX_HEIGHT: u32 = (1 << Self::HEIGHT_BITS) - 1;

    /// Height of the floor.
    #[inline]
    pub fn min(&self) -> u32 {
        self.min
    }

    /// Sets the height of the floor.
    #[inline]
    pub fn set_min(&mut self, min: u32) {
        self.min = min;
    }

    /// Height of the ceiling.
    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Sets the height of the ceiling.
    #[inline]
    pub fn set_max(&mut self, max: u32) {
        self.max = max;
    }

    /// Area type ID.
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    /// Sets the area type ID.
    #[inline]
    pub fn set_area(&mut self, area: impl Into<AreaType>) {
        self.area = area.into();
    }

    /// The key of the next-higher span in the column.
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    /// Sets the key of the next-higher span in the column.
    #[inline]
    pub fn set_next(&mut self, next: impl Into<Option<SpanKey>>) {
        self.next = next.into();
    }

    /// `true` if the interval is non-empty and fits into [`Span::MAX_HEIGHT`].
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min < self.max && self.max <= Self::MAX_HEIGHT
    }
}

/// A traversal class. `0` is not walkable, everything else is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct AreaType(pub u8);

impl Deref for AreaType {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u8> for AreaType {
    fn from(value: u8) -> Self {
        AreaType(value)
    }
}

impl AreaType {
    /// The area type 0. Triangles with this area type are not walkable.
    pub const NOT_WALKABLE: Self = Self(0);
    /// Default area type for walkable triangles. The highest possible area type.
    pub const DEFAULT_WALKABLE: Self = Self(63);

    /// Whether the area type is walkable.
    #[inline]
    pub fn is_walkable(&self) -> bool {
        *self != Self::NOT_WALKABLE
    }
}

/// A snapshot of a span together with the column it lives in.
/// Produced by [`Heightfield::cache_spans`](crate::Heightfield::cache_spans).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SpanCache {
    /// The x-coordinate of the column
    pub x: u16,
    /// The z-coordinate of the column
    pub z: u16,
    /// Height of the floor
    pub min: u32,
    /// Height of the ceiling
    pub max: u32,
    /// Area type ID
    pub area: AreaType,
}
