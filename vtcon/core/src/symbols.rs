//! Symbol table for grapheme sequences.
//!
//! Terminal cells reference glyphs through stable `Symbol` ids rather than
//! owned strings. Single-scalar sequences map directly to their code point;
//! longer sequences (combining marks, ZWJ clusters) are interned and assigned
//! ids above the Unicode range, one id per distinct sequence for the lifetime
//! of the table.
//!
//! The table is the "symbol/font context" of the application's construction
//! sequence. Rendering itself happens in the terminal-session collaborator;
//! this module only guarantees id stability.

use std::collections::HashMap;
use std::fmt;

/// First id handed out to interned multi-scalar sequences.
///
/// Everything below is a direct code-point symbol.
const TABLE_BASE: u32 = 0x0011_0000;

/// Stable identifier for a grapheme sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

impl Symbol {
    /// Symbol for a single Unicode scalar.
    #[must_use]
    pub fn from_char(c: char) -> Self {
        Self(c as u32)
    }

    /// The scalar value, if this is a direct (single-scalar) symbol.
    #[must_use]
    pub fn to_char(self) -> Option<char> {
        if self.0 < TABLE_BASE {
            char::from_u32(self.0)
        } else {
            None
        }
    }

    /// Whether this symbol encodes a single scalar directly.
    #[must_use]
    pub fn is_direct(self) -> bool {
        self.0 < TABLE_BASE
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_char() {
            Some(c) => write!(f, "sym({c:?})"),
            None => write!(f, "sym(#{})", self.0 - TABLE_BASE),
        }
    }
}

/// Interner from grapheme sequences to [`Symbol`] ids.
#[derive(Debug, Default)]
pub struct SymbolTable {
    ids: HashMap<Box<str>, Symbol>,
    seqs: Vec<Box<str>>,
}

impl SymbolTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a grapheme sequence.
    ///
    /// Returns the same id for the same sequence on every call.
    pub fn intern(&mut self, seq: &str) -> Symbol {
        let mut chars = seq.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Symbol::from_char(c);
        }

        if let Some(&sym) = self.ids.get(seq) {
            return sym;
        }

        let sym = Symbol(TABLE_BASE + u32::try_from(self.seqs.len()).unwrap_or(u32::MAX - TABLE_BASE));
        self.seqs.push(seq.into());
        self.ids.insert(seq.into(), sym);
        sym
    }

    /// Resolve an interned multi-scalar symbol back to its sequence.
    ///
    /// Direct symbols carry their scalar in the id itself; use
    /// [`Symbol::to_char`] for those.
    #[must_use]
    pub fn resolve(&self, sym: Symbol) -> Option<&str> {
        let index = sym.0.checked_sub(TABLE_BASE)? as usize;
        self.seqs.get(index).map(AsRef::as_ref)
    }

    /// Number of interned multi-scalar sequences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    /// Whether no sequence has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }
}
