//! Typed key/value metadata for RPC calls.
//!
//! Keys are ASCII, case-insensitive, and stored lowercase. A value is ASCII
//! text, or raw bytes when the key carries the reserved `-bin` suffix. Each
//! map is mutable until frozen; the owning call freezes its request headers
//! when it starts.
//!
//! Misuse panics rather than surfacing as an RPC outcome: mutating a frozen
//! map, using a malformed key, storing the wrong value kind under a key.

pub mod map;
pub mod value;

pub use map::{HeaderMap, TrailerMap};
pub use value::{HeaderValue, BINARY_SUFFIX};
