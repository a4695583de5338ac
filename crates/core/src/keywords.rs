//! Reserved names shared by the tools and the runtime.

use crate::symbol::Symbol;
use once_cell::sync::Lazy;

/// The nil literal identifier.
pub static NIL: Lazy<Symbol> = Lazy::new(|| Symbol::intern("Nil"));

/// The receiver of the current method.
pub static SELF: Lazy<Symbol> = Lazy::new(|| Symbol::intern("self"));

/// The ignore binding (`let _ = ...` discards).
pub static IGNORE: Lazy<Symbol> = Lazy::new(|| Symbol::intern("_"));

/// Constructor method name.
pub static CONSTRUCTOR: Lazy<Symbol> = Lazy::new(|| Symbol::intern("new"));

/// User-defined index operator.
pub static INDEX_FN: Lazy<Symbol> = Lazy::new(|| Symbol::intern("__index__"));

/// User-defined index-assignment operator.
pub static SET_FN: Lazy<Symbol> = Lazy::new(|| Symbol::intern("__set__"));

/// User-defined equality operator.
pub static EQ_FN: Lazy<Symbol> = Lazy::new(|| Symbol::intern("__eq__"));

/// User-defined inequality operator.
pub static NEQ_FN: Lazy<Symbol> = Lazy::new(|| Symbol::intern("__neq__"));
