//! Runtime functions and the native call surface.

use jv_core::tape::FnFlags;
use jv_core::{Entity, ObjHandle, Symbol};

use crate::class::ClassId;
use crate::module::ModuleId;
use crate::module_manager::ModuleManager;
use crate::process::Process;
use crate::task::TaskId;
use crate::vm::Output;

/// Index of a function in the module manager's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub(crate) u32);

impl FunctionId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A raised runtime error escaping a native function; the engine turns it
/// into a catchable Error object on the calling task.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRaise {
    /// The error message
    pub message: String,
}

impl NativeRaise {
    /// Creates a raise with the given message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        NativeRaise {
            message: message.into(),
        }
    }
}

/// Result of a native function: a value for the caller's resval, or a raise.
pub type NativeResult = Result<Entity, NativeRaise>;

/// The state a native function runs against: the owning process (heap and
/// tasks), the module manager, the calling task, and the output sink.
pub struct NativeCall<'a> {
    /// Module, class and function registries
    pub mm: &'a mut ModuleManager,
    /// The process whose task invoked the native
    pub process: &'a mut Process,
    /// The invoking task
    pub task: TaskId,
    /// Where `print` and friends write
    pub output: &'a mut Output,
}

/// A host function callable from bytecode. `self_entity` is the receiver
/// (nil for free functions); `args` is the caller's resval, either a single
/// value or an argument tuple.
pub type NativeFn = fn(&mut NativeCall<'_>, self_entity: Entity, args: Entity) -> NativeResult;

/// The body of a function: a bytecode entry offset or a host native.
#[derive(Clone, Copy)]
pub enum FunctionBody {
    /// First-instruction offset into the owning module's tape
    Bytecode(usize),
    /// Host-provided native
    Native(NativeFn),
}

impl std::fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionBody::Bytecode(offset) => write!(f, "Bytecode({offset})"),
            FunctionBody::Native(_) => write!(f, "Native(..)"),
        }
    }
}

/// A runtime function.
#[derive(Debug)]
pub struct Function {
    /// Function name
    pub name: Symbol,
    /// Owning module
    pub module: ModuleId,
    /// Owning class when the function is a method
    pub class: Option<ClassId>,
    /// Attribute flags
    pub flags: FnFlags,
    /// Bytecode offset or native pointer
    pub body: FunctionBody,
    /// The user-visible reflection object
    pub reflection: ObjHandle,
}
