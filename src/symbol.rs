/*!
Interned identifiers.

Every name that appears in a [`Module`] (variables, functions, struct types,
parameters, members accessed by expressions) is a [`Symbol`] into the module's
[`SymbolTable`]. A transform's output starts with a copy of its input's table,
so symbols keep their meaning across the clone and freshly generated names can
never collide with names the source program has not used yet.

[`Module`]: crate::Module
*/

use indexmap::IndexSet;
use std::fmt;

/// A handle to an interned name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Symbol(u32);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct SymbolTable {
    names: IndexSet<String, fxhash::FxBuildHasher>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the symbol for `name`, interning it if needed.
    pub fn register(&mut self, name: &str) -> Symbol {
        match self.names.get_index_of(name) {
            Some(index) => Symbol(index as u32),
            None => {
                let (index, _) = self.names.insert_full(name.to_string());
                Symbol(index as u32)
            }
        }
    }

    /// Return the symbol for `name` if it has been interned.
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.names.get_index_of(name).map(|index| Symbol(index as u32))
    }

    /// Create a symbol whose name was never used before.
    ///
    /// The first request for `prefix` yields `prefix` itself, if free;
    /// subsequent requests yield `prefix_1`, `prefix_2`, and so on.
    pub fn new_unique(&mut self, prefix: &str) -> Symbol {
        if !self.names.contains(prefix) {
            return self.register(prefix);
        }
        let mut counter = 1u32;
        loop {
            let candidate = format!("{prefix}_{counter}");
            if !self.names.contains(candidate.as_str()) {
                let (index, _) = self.names.insert_full(candidate);
                return Symbol(index as u32);
            }
            counter += 1;
        }
    }

    pub fn name(&self, symbol: Symbol) -> &str {
        &self.names[symbol.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
