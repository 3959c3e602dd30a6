//! Canonical error taxonomy for RPC outcomes.
//!
//! Every non-success outcome of a call maps to exactly one [`ErrorKind`]
//! and is surfaced as one [`RpcError`] through the call's terminal
//! completion. Caller misuse (frozen-map mutation, malformed keys) is a
//! panic and never appears here.

pub mod kind;
pub mod record;

pub use kind::ErrorKind;
pub use record::{RpcError, ERROR_DOMAIN, HEADERS_KEY, TRAILERS_KEY};
