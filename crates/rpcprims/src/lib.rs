//! Single-RPC call primitives.
//!
//! rpcprims models one remote procedure call as a pair of back-pressured
//! binary message streams plus request/response metadata and a canonical
//! error taxonomy. The wire transport and message serialization stay
//! outside: transports plug in behind [`transport::StreamTransport`] and
//! payloads are opaque bytes.
//!
//! # Crate Structure
//!
//! - [`metadata`] — Ordered header/trailer maps with `-bin` value typing
//! - [`status`] — The 16-kind error taxonomy and terminal error records
//! - [`channel`] — Single-in-flight back-pressured message pipes
//! - [`transport`] — The stream transport boundary and an in-process loopback
//! - [`call`] — The call state machine composing the above

/// Re-export metadata types.
pub mod metadata {
    pub use rpcprims_metadata::*;
}

/// Re-export status and error types.
pub mod status {
    pub use rpcprims_status::*;
}

/// Re-export channel types.
pub mod channel {
    pub use rpcprims_channel::*;
}

/// Re-export transport types.
pub mod transport {
    pub use rpcprims_transport::*;
}

/// Re-export call types.
pub mod call {
    pub use rpcprims_call::*;
}

pub mod logging;
