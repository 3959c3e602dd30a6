//! The call state machine: one RPC as a pair of back-pressured binary
//! message streams plus metadata and a canonical terminal outcome.
//!
//! A [`Call`] binds a destination and an outbound [`MessageProducer`].
//! Attaching a [`MessageConsumer`] starts it: request headers freeze, the
//! transport opens a stream, the producer is pulled one message at a time
//! as the transport grants capacity, and inbound frames are delivered to
//! the consumer one at a time in arrival order: headers first, then
//! messages, then trailers, then exactly one terminal completion.
//! [`Call::cancel`] interrupts both directions at any time.

pub mod call;
pub mod endpoints;

pub use call::{Call, CallOutcome, CallState, RequestHeaders};
pub use endpoints::{MessageConsumer, MessageProducer, SequenceProducer};
