/*!
[`Module`](crate::Module) processing functionality.
*/

pub mod constant;
mod layouter;

pub use constant::ConstantError;
pub use layouter::{LayoutError, LayoutErrorInner, Layouter, TypeLayout};

use std::{fmt, num::NonZeroU32, ops};

/// An alignment: a power of two, in bytes.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Alignment(NonZeroU32);

impl Alignment {
    pub const ONE: Self = Self(unsafe { NonZeroU32::new_unchecked(1) });
    pub const TWO: Self = Self(unsafe { NonZeroU32::new_unchecked(2) });
    pub const FOUR: Self = Self(unsafe { NonZeroU32::new_unchecked(4) });
    pub const EIGHT: Self = Self(unsafe { NonZeroU32::new_unchecked(8) });
    pub const SIXTEEN: Self = Self(unsafe { NonZeroU32::new_unchecked(16) });

    /// Return `None` unless `n` is a power of two.
    pub const fn new(n: u32) -> Option<Self> {
        if n.is_power_of_two() {
            // SAFETY: a power of two is never zero.
            Some(Self(unsafe { NonZeroU32::new_unchecked(n) }))
        } else {
            None
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }

    pub const fn is_aligned(self, n: u32) -> bool {
        n & (self.0.get() - 1) == 0
    }

    /// Round `n` up to the nearest multiple of this alignment.
    pub const fn round_up(self, n: u32) -> u32 {
        let mask = self.0.get() - 1;
        (n + mask) & !mask
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

impl ops::Mul<u32> for Alignment {
    type Output = u32;

    fn mul(self, rhs: u32) -> Self::Output {
        self.0.get() * rhs
    }
}

impl From<crate::VectorSize> for Alignment {
    /// The alignment of a vector, in units of its scalar width.
    fn from(size: crate::VectorSize) -> Self {
        match size {
            crate::VectorSize::Bi => Self::TWO,
            crate::VectorSize::Tri | crate::VectorSize::Quad => Self::FOUR,
        }
    }
}

impl crate::Literal {
    /// Interpret a constant as a non-negative element index.
    pub const fn as_index(&self) -> Option<u32> {
        match *self {
            Self::U32(value) => Some(value),
            Self::I32(value) if value >= 0 => Some(value as u32),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Alignment;

    #[test]
    fn alignment_rounding() {
        assert_eq!(Alignment::SIXTEEN.round_up(12), 16);
        assert_eq!(Alignment::SIXTEEN.round_up(32), 32);
        assert_eq!(Alignment::FOUR.round_up(0), 0);
        assert!(Alignment::new(12).is_none());
        assert!(Alignment::EIGHT.is_aligned(24));
        assert!(!Alignment::EIGHT.is_aligned(20));
    }
}
