//! Back-pressured message pipes for RPC streams.
//!
//! A [`MessageChannel`] couples one producer to one consumer of an ordered
//! sequence of opaque binary messages with strictly one message in flight:
//! `send` does not return until the delivery has been taken and
//! acknowledged, so a producer is never asked for its next message early.
//! A call instantiates one channel per direction.

pub mod channel;

pub use channel::{ChannelTerminated, Delivery, MessageChannel};
