//! Text output of programs.

pub mod wgsl;

/// Indentation level of the statement being written, two spaces per level.
#[derive(Clone, Copy)]
struct Level(usize);

impl Level {
    const fn next(self) -> Self {
        Level(self.0 + 1)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:width$}", "", width = self.0 * 2)
    }
}
