//! Runtime modules.

use std::sync::Arc;

use indexmap::IndexMap;

use jv_core::{ObjHandle, Symbol, Tape};

use crate::class::ClassId;
use crate::function::FunctionId;

/// Index of a module in the module manager's module table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A loaded module: its tape, the functions and classes hydrated from it,
/// the lazy-init flag, and its reflection object.
#[derive(Debug)]
pub struct Module {
    /// Module name
    pub name: Symbol,
    /// The compiled instruction stream and symbol tables
    pub tape: Arc<Tape>,
    /// Module-level functions, keyed by name
    pub functions: IndexMap<Symbol, FunctionId>,
    /// Classes declared in this module, keyed by name
    pub classes: IndexMap<Symbol, ClassId>,
    /// Whether the module's top-level code has been scheduled
    pub is_initialized: bool,
    /// The user-visible reflection object
    pub reflection: ObjHandle,
}
