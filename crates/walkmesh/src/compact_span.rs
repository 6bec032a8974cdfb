use crate::region::RegionId;

/// A span in a [`CompactHeightfield`](crate::CompactHeightfield).
/// Packed for memory efficiency.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// The lower extent of the span. (Measured from the heightfield's base.)
    pub y: u16,
    /// The id of the region the span belongs to. (Or [`RegionId::NONE`] if not in a region.)
    pub region: RegionId,
    /// 24 bits: packed neighbor connection data
    /// 8 bits: the height of the span
    data: u32,
}

impl CompactSpan {
    /// Connection value of a direction without a neighbor.
    pub const NOT_CONNECTED: u8 = 0x3f;

    /// Creates an unconnected span of the given floor and height.
    pub fn new(y: u16, height: u8) -> Self {
        let mut span = Self {
            y,
            region: RegionId::NONE,
            data: 0x00FF_FFFF,
        };
        span.set_height(height);
        span
    }

    /// Sets the neighbor connection data for the given direction.
    /// `None` if the neighbor is not connected.
    pub fn set_con(&mut self, direction: u8, neighbor: impl Into<Option<u8>>) {
        let shift = (direction as u32 & 0x3) * 6;
        let value =
            neighbor.into().unwrap_or(Self::NOT_CONNECTED) as u32 & Self::NOT_CONNECTED as u32;
        self.data = (self.data & !(0x3f << shift)) | (value << shift);
    }

    /// Returns the neighbor connection data for the given direction,
    /// which is the offset of the neighbor span within its column.
    /// `None` if the neighbor is not connected.
    #[inline]
    pub fn con(&self, direction: u8) -> Option<u8> {
        let shift = (direction as u32 & 0x3) * 6;
        let value = ((self.data >> shift) & Self::NOT_CONNECTED as u32) as u8;
        (value != Self::NOT_CONNECTED).then_some(value)
    }

    /// The raw 24 bits of connection data.
    #[inline]
    pub fn connections(&self) -> u32 {
        self.data & 0x00FF_FFFF
    }

    /// Returns the height of the span.
    #[inline]
    pub fn height(&self) -> u8 {
        (self.data >> 24) as u8
    }

    /// Sets the height of the span.
    #[inline]
    pub fn set_height(&mut self, height: u8) {
        self.data = (self.data & 0x00FF_FFFF) | ((height as u32) << 24);
    }
}
