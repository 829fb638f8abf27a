use std::fmt;

/// A byte range in the source a node came from, for diagnostics.
///
/// Programs assembled with a [`ProgramBuilder`](crate::ProgramBuilder) and
/// nodes synthesized by transforms carry [`Span::UNDEFINED`].
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Span {
    start: u32,
    end: u32,
}

impl Span {
    pub const UNDEFINED: Self = Self { start: 0, end: 0 };

    /// `end` is exclusive.
    pub const fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    pub fn is_defined(&self) -> bool {
        *self != Self::UNDEFINED
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_defined() {
            write!(f, "{}..{}", self.start, self.end)
        } else {
            f.write_str("<unknown>")
        }
    }
}
