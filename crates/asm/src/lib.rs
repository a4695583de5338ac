//! Textual assembly (`.ja`) for Jv tapes.
//!
//! The format is line-oriented: a `module` header, one instruction per
//! line, `@name` labels binding function entries, and `class`/`endclass`
//! blocks carrying `field` declarations and method labels. Comments start
//! with `;`. [`tape_read`] and [`tape_write`] round-trip.

pub mod lexer;
pub mod reader;
pub mod writer;

pub use reader::tape_read;
pub use writer::tape_write;
