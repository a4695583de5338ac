//! Heap objects.

use std::any::Any;

use hashbrown::HashMap;
use indexmap::IndexMap;

use jv_core::{Entity, ObjHandle, Symbol};

use crate::class::ClassId;
use crate::function::FunctionId;
use crate::module::ModuleId;

/// Class-specific internal state of an object. Strings, arrays and tuples
/// keep their storage here rather than in the member map; reflection objects
/// point back at the runtime entity they mirror.
#[derive(Default)]
pub enum Payload {
    /// No internal state
    #[default]
    None,
    /// String contents (a primitive char array: contributes no graph edges)
    Str(String),
    /// Array storage; each stored object carries one edge
    Array(Vec<Entity>),
    /// Tuple storage, fixed length after creation
    Tuple(Box<[Entity]>),
    /// Reflection of a function
    Function(FunctionId),
    /// A function bound to a receiver
    FunctionRef {
        /// The bound function
        function: FunctionId,
        /// The receiver it was looked up on
        receiver: ObjHandle,
    },
    /// Reflection of a class
    Class(ClassId),
    /// Reflection of a module
    Module(ModuleId),
    /// Reflection of a task
    Task(usize),
    /// Host-defined state installed by a native class's init hook
    Native(Box<dyn Any>),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::None => write!(f, "None"),
            Payload::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Payload::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Payload::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Payload::Function(id) => f.debug_tuple("Function").field(id).finish(),
            Payload::FunctionRef { function, receiver } => f
                .debug_struct("FunctionRef")
                .field("function", function)
                .field("receiver", receiver)
                .finish(),
            Payload::Class(id) => f.debug_tuple("Class").field(id).finish(),
            Payload::Module(id) => f.debug_tuple("Module").field(id).finish(),
            Payload::Task(id) => f.debug_tuple("Task").field(id).finish(),
            Payload::Native(_) => write!(f, "Native(..)"),
        }
    }
}

/// Runs when an object of a native class is destroyed, before its member map
/// is freed. Child handles may already be dangling.
pub type NativeDeleteFn = fn(&mut Object);

/// A heap object: class, payload, insertion-ordered members, and its node
/// state in the object graph (edge multiset and root flag).
#[derive(Debug, Default)]
pub struct Object {
    /// The object's class
    pub class: ClassId,
    /// Class-specific internal state
    pub payload: Payload,
    /// Member map, insertion-ordered
    pub members: IndexMap<Symbol, Entity>,
    /// Outgoing edges with multiplicities
    pub(crate) out_edges: HashMap<ObjHandle, u32>,
    /// Whether this node is a collection root
    pub(crate) is_root: bool,
    /// Delete hook copied from the class at allocation time
    pub(crate) delete_hook: Option<NativeDeleteFn>,
}

impl Object {
    /// Reads a member.
    pub fn get_member(&self, key: Symbol) -> Option<Entity> {
        self.members.get(&key).copied()
    }

    /// The string payload, if this is a string object.
    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The array payload, if this is an array object.
    pub fn as_array(&self) -> Option<&Vec<Entity>> {
        match &self.payload {
            Payload::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The tuple payload, if this is a tuple object.
    pub fn as_tuple(&self) -> Option<&[Entity]> {
        match &self.payload {
            Payload::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Downcasts a native payload.
    pub fn native_payload<T: 'static>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Native(any) => any.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Downcasts a native payload mutably.
    pub fn native_payload_mut<T: 'static>(&mut self) -> Option<&mut T> {
        match &mut self.payload {
            Payload::Native(any) => any.downcast_mut::<T>(),
            _ => None,
        }
    }
}
