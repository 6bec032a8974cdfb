use std::ops::{BitAnd, BitOr, Deref};

/// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
///
/// The highest bit marks regions painted along the outer border of the heightfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct RegionId(pub u16);

impl Deref for RegionId {
    type Target = u16;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId(value)
    }
}

impl BitOr for RegionId {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        RegionId(self.0 | rhs.0)
    }
}

impl BitAnd for RegionId {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self::Output {
        RegionId(self.0 & rhs.0)
    }
}

impl RegionId {
    /// Spans that are not in any region.
    pub const NONE: Self = Self(0);
    /// Marks a region painted along the border of the heightfield.
    pub const BORDER_REGION: Self = Self(0x8000);
    /// The highest id a region can have without colliding with [`RegionId::BORDER_REGION`].
    pub const MAX: Self = Self(0x7fff);

    /// `true` for [`RegionId::NONE`].
    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// `true` if the border bit is set.
    #[inline]
    pub fn is_border(self) -> bool {
        self.0 & Self::BORDER_REGION.0 != 0
    }

    /// `true` if the id belongs to a region that was grown from the inside, i.e. neither none nor border.
    #[inline]
    pub fn is_interior(self) -> bool {
        !self.is_none() && !self.is_border()
    }

    /// The id with the border bit cleared.
    #[inline]
    pub fn without_border(self) -> Self {
        Self(self.0 & !Self::BORDER_REGION.0)
    }
}
