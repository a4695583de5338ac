//! Interned strings.
//!
//! Names appear everywhere in a program (locals, members, functions, class
//! names), so they are interned once into a global table and handled as
//! 32-bit ids from then on. Two symbols are equal exactly when their text is
//! equal, which lets the optimizer and the member maps compare names without
//! touching string data.

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// An interned string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(u32);

struct Interner {
    lookup: HashMap<&'static str, u32>,
    strings: Vec<&'static str>,
}

static INTERNER: Lazy<RwLock<Interner>> = Lazy::new(|| {
    RwLock::new(Interner {
        lookup: HashMap::new(),
        strings: Vec::new(),
    })
});

impl Symbol {
    /// Interns `text`, returning its stable id.
    pub fn intern(text: &str) -> Symbol {
        {
            let interner = INTERNER.read();
            if let Some(&id) = interner.lookup.get(text) {
                return Symbol(id);
            }
        }
        let mut interner = INTERNER.write();
        if let Some(&id) = interner.lookup.get(text) {
            return Symbol(id);
        }
        let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
        let id = interner.strings.len() as u32;
        interner.strings.push(leaked);
        interner.lookup.insert(leaked, id);
        Symbol(id)
    }

    /// Returns the interned text.
    pub fn as_str(self) -> &'static str {
        INTERNER.read().strings[self.0 as usize]
    }

    /// Returns the raw id, for serialization.
    pub fn id(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(text: &str) -> Self {
        Symbol::intern(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let a = Symbol::intern("alpha");
        let b = Symbol::intern("alpha");
        let c = Symbol::intern("beta");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "alpha");
        assert_eq!(c.as_str(), "beta");
    }

    #[test]
    fn display_matches_text() {
        let s = Symbol::intern("loop_counter");
        assert_eq!(s.to_string(), "loop_counter");
    }
}
