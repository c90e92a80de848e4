//! Shared utilities used across architecture layers.

mod utf8;

pub use utf8::Utf8ChunkDecoder;
