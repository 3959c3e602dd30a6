//! The transport boundary consumed by the call core.
//!
//! A transport multiplexes many logical streams onto some connection; this
//! crate only specifies the per-stream surface a call needs: open a stream
//! with frozen request headers, push outbound message frames as capacity
//! allows, receive header/message/trailer/abort events, and reset.
//!
//! [`LoopbackTransport`] is the in-process implementation used by tests and
//! examples: each opened stream runs a server handler on its own thread,
//! which doubles as the transport's event delivery context.

pub mod loopback;
pub mod traits;

pub use loopback::{LoopbackTransport, ServerStream};
pub use traits::{Destination, StreamEvents, StreamHandle, StreamStatus, StreamTransport};
