//! Program representation for the Jv language.
//!
//! This crate holds everything the runtime and the tools agree on: tagged
//! values ([`entity::Entity`]), interned names ([`symbol::Symbol`]), the
//! instruction set ([`op::Op`]), linear instruction tapes with their symbol
//! tables ([`tape::Tape`]), the binary tape codec, and the peephole
//! optimizer that rewrites tapes under jump-target preservation.

/// Tagged values and object handles.
pub mod entity;
/// Static (compile/assemble/link time) error taxonomy.
pub mod error;
/// Instruction representation.
pub mod instruction;
/// Reserved names used by the compiler and the runtime.
pub mod keywords;
/// Opcode definitions.
pub mod op;
/// Peephole optimization passes.
pub mod optimize;
/// Primitive values and promotion arithmetic.
pub mod primitive;
/// Interned strings.
pub mod symbol;
/// Compiled module tapes and their symbol tables.
pub mod tape;
/// Binary tape codec.
pub mod tape_binary;

pub use entity::{Entity, ObjHandle};
pub use error::{StaticError, StaticResult};
pub use instruction::{Arg, Instruction};
pub use op::Op;
pub use optimize::optimize;
pub use primitive::{Primitive, PrimitiveError, PrimitiveType};
pub use symbol::Symbol;
pub use tape::{ClassRef, FnFlags, FunctionRef, SourceMap, Tape, TapeBuilder};
pub use tape_binary::{tape_read_binary, tape_write_binary};
