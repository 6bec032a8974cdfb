/// Provides information on the content of a cell column in a [`CompactHeightfield`](crate::CompactHeightfield).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    /// Index to the first span in the column.
    index: u32,
    /// Number of spans in the column.
    count: u8,
}

impl CompactCell {
    /// The maximum number of walkable spans a column can hold.
    pub const MAX_COUNT: usize = u8::MAX as usize;

    /// Index of the first span of the column in [`CompactHeightfield::spans`](crate::CompactHeightfield::spans).
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of spans in the column.
    #[inline]
    pub fn count(&self) -> u8 {
        self.count
    }

    /// The indices of the column's spans in [`CompactHeightfield::spans`](crate::CompactHeightfield::spans).
    #[inline]
    pub fn span_range(&self) -> std::ops::Range<usize> {
        let start = self.index as usize;
        start..start + self.count as usize
    }

    #[inline]
    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    #[inline]
    pub(crate) fn inc_count(&mut self) {
        self.count += 1;
    }
}
