//! Bit-packed cell-pass codec and the little-endian framing it is built on.
//!
//! [`CompressedPassStore`] is the write-once form of a segment: every pass
//! attribute is range-reduced and packed into fixed-width records addressed
//! through a two-level pass count index. [`record`] holds the fixed 32-byte
//! pass layout used wherever passes are written uncompressed.

pub mod bitfield;
pub mod compressed;
pub mod record;
pub mod schema;
pub mod wire;

pub use bitfield::{BitFieldArray, bits_required};
pub use compressed::{CompressedPassStore, PASS_FIELD_NAMES};
pub use record::{CELL_PASS_RECORD_BYTES, read_cell_pass, write_cell_pass};
pub use schema::{BitFieldSchema, BitFieldSchemaBuilder, FieldDescriptor};
