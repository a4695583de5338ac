//! Runtime classes.

use indexmap::IndexMap;

use jv_core::{ObjHandle, Symbol};

use crate::function::FunctionId;
use crate::module::ModuleId;
use crate::object::{NativeDeleteFn, Payload};

/// Index of a class in the module manager's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Builds the initial payload for instances of a native class.
pub type NativeInitFn = fn() -> Payload;

/// A runtime class: name, optional super, ordered fields, ordered methods,
/// optional native payload hooks, and its reflection object.
#[derive(Debug)]
pub struct Class {
    /// Class name
    pub name: Symbol,
    /// Super class; `None` only for the root class `Object`
    pub super_class: Option<ClassId>,
    /// Field names, in declaration order
    pub fields: Vec<Symbol>,
    /// Methods, keyed by name
    pub methods: IndexMap<Symbol, FunctionId>,
    /// Owning module
    pub module: ModuleId,
    /// Payload constructor for native classes
    pub init_hook: Option<NativeInitFn>,
    /// Payload destructor for native classes
    pub delete_hook: Option<NativeDeleteFn>,
    /// The user-visible reflection object
    pub reflection: ObjHandle,
}

impl Class {
    /// Builds the payload a fresh instance starts with.
    pub fn initial_payload(&self) -> Payload {
        match self.init_hook {
            Some(init) => init(),
            None => Payload::None,
        }
    }
}

/// Handles to the classes the runtime itself depends on, installed into the
/// builtin module at startup.
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    /// Root class of everything
    pub object: ClassId,
    /// Strings
    pub string: ClassId,
    /// Arrays
    pub array: ClassId,
    /// Tuples
    pub tuple: ClassId,
    /// Function reflections
    pub function: ClassId,
    /// Bound functions
    pub function_ref: ClassId,
    /// Class reflections
    pub class: ClassId,
    /// Module reflections
    pub module: ClassId,
    /// Task reflections
    pub task: ClassId,
    /// Runtime errors
    pub error: ClassId,
    /// One line of a stack trace
    pub stack_line: ClassId,
}
