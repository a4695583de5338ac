//! Binary serialization primitives for Jv tapes.
//!
//! This crate provides the little-endian [`BinaryReader`]/[`BinaryWriter`]
//! pair the tape codec is built on. All multi-byte values are
//! little-endian; lengths use a compact var-int encoding.

pub mod binary_reader;
pub mod binary_writer;
pub mod error;

pub use binary_reader::BinaryReader;
pub use binary_writer::BinaryWriter;
pub use error::{IoError, IoResult};
