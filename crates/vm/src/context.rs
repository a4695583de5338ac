//! Call frames.

use hashbrown::HashSet;

use jv_core::{Entity, ObjHandle, Symbol};

use crate::module::ModuleId;

/// One call frame: instruction pointer, module, `self`, locals, pending
/// catch target and current error. Locals live as members of an invisible
/// heap object so the collector can see them through ordinary edges.
#[derive(Debug)]
pub struct Context {
    /// Instruction pointer into the module's tape
    pub ins: usize,
    /// The module whose tape is executing
    pub module: ModuleId,
    /// The receiver of the executing function (a module reflection at
    /// top level)
    pub self_entity: Entity,
    /// The invisible member object holding this frame's locals
    pub member_obj: ObjHandle,
    /// Names bound const in this frame
    pub const_names: HashSet<Symbol>,
    /// The error currently unwinding through this frame
    pub error: Option<ObjHandle>,
    /// Where to jump when an error reaches this frame
    pub catch_ins: Option<usize>,
}

impl Context {
    /// Creates a frame starting at `ins`.
    pub fn new(module: ModuleId, self_entity: Entity, member_obj: ObjHandle, ins: usize) -> Self {
        Context {
            ins,
            module,
            self_entity,
            member_obj,
            const_names: HashSet::new(),
            error: None,
            catch_ins: None,
        }
    }
}
