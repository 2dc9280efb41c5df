//! State and input vocabularies.
//!
//! Machines name their states and inputs through [`Label`].  Fixed
//! machines use a plain `enum` with a `label()` match, which keeps the
//! handler's `match` exhaustive.  Machines assembled at startup mint
//! [`Symbol`]s from a [`StateTable`] / [`InputTable`] instead:
//!
//! ```text
//!   let mut states = StateTable::new();
//!   let idle  = states.next_state("IDLE");     // Symbol { id: 0, "IDLE" }
//!   let armed = states.next_state("ARMED");    // Symbol { id: 1, "ARMED" }
//! ```
//!
//! Each subsystem holds its own tables next to its machine; there is no
//! global symbol registry.

use core::fmt;

/// A state or input value with a static debug name.
pub trait Label: Copy + Eq + fmt::Debug + 'static {
    fn label(&self) -> &'static str;
}

/// A table-minted state or input.  Only compare symbols from one table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    id: u16,
    name: &'static str,
}

impl Symbol {
    pub fn id(&self) -> u16 {
        self.id
    }
}

impl Label for Symbol {
    fn label(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Debug, Default)]
struct Symbols {
    names: Vec<&'static str>,
}

impl Symbols {
    fn mint(&mut self, name: &'static str) -> Symbol {
        let id = self.names.len() as u16;
        self.names.push(name);
        Symbol { id, name }
    }

    fn find(&self, name: &str) -> Option<Symbol> {
        self.names
            .iter()
            .position(|n| *n == name)
            .map(|i| Symbol {
                id: i as u16,
                name: self.names[i],
            })
    }

    fn name(&self, id: u16) -> &'static str {
        self.names.get(usize::from(id)).copied().unwrap_or("?")
    }
}

/// State vocabulary of one machine.
#[derive(Debug, Default)]
pub struct StateTable {
    symbols: Symbols,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next state.  Ids count up from 0 in call order.
    pub fn next_state(&mut self, name: &'static str) -> Symbol {
        self.symbols.mint(name)
    }

    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.symbols.find(name)
    }

    /// Name for `id`, `"?"` if it was never minted.
    pub fn name(&self, id: u16) -> &'static str {
        self.symbols.name(id)
    }

    pub fn len(&self) -> usize {
        self.symbols.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.names.is_empty()
    }
}

/// Input vocabulary of one machine.  Enter-state and timeout are
/// built into [`Input`](super::Input) and never minted here.
#[derive(Debug, Default)]
pub struct InputTable {
    symbols: Symbols,
}

impl InputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_input(&mut self, name: &'static str) -> Symbol {
        self.symbols.mint(name)
    }

    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.symbols.find(name)
    }

    pub fn name(&self, id: u16) -> &'static str {
        self.symbols.name(id)
    }

    pub fn len(&self) -> usize {
        self.symbols.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.names.is_empty()
    }
}
