use std::collections::VecDeque;

use bytes::Bytes;
use rpcprims_status::RpcError;

/// Pull-driven source of outbound messages.
///
/// The call owns its producer exclusively once constructed and pulls it
/// from a dedicated thread, one message at a time: the next pull happens
/// only after the previous message's transport capacity acknowledgement.
pub trait MessageProducer: Send {
    /// Produce the next outbound message.
    ///
    /// May block waiting on upstream data. `Ok(None)` ends the request
    /// side cleanly (the stream half-closes); an error finishes the whole
    /// call with that error.
    fn next_message(&mut self) -> Result<Option<Bytes>, RpcError>;
}

/// Sink for inbound messages and the terminal completion of a call.
pub trait MessageConsumer: Send {
    /// One inbound message, in arrival order. Returning from this call
    /// acknowledges the delivery and authorizes the next one.
    fn on_message(&mut self, payload: Bytes);

    /// The terminal completion, delivered exactly once after the last
    /// message. By this point the call's response trailers, if any, are
    /// set; a failed outcome carries the captured metadata on the error.
    fn on_complete(&mut self, outcome: Result<(), RpcError>);
}

/// Producer over a fixed sequence of messages.
pub struct SequenceProducer {
    messages: VecDeque<Bytes>,
}

impl SequenceProducer {
    /// Produce the given messages in order, then end the request side.
    pub fn new<I, B>(messages: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            messages: messages.into_iter().map(Into::into).collect(),
        }
    }

    /// Produce nothing: the request side ends immediately.
    pub fn empty() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }
}

impl MessageProducer for SequenceProducer {
    fn next_message(&mut self) -> Result<Option<Bytes>, RpcError> {
        Ok(self.messages.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_producer_yields_in_order_then_ends() {
        let mut producer = SequenceProducer::new(["a", "b"]);
        assert_eq!(producer.next_message().unwrap().unwrap().as_ref(), b"a");
        assert_eq!(producer.next_message().unwrap().unwrap().as_ref(), b"b");
        assert_eq!(producer.next_message().unwrap(), None);
        // Stays exhausted.
        assert_eq!(producer.next_message().unwrap(), None);
    }

    #[test]
    fn empty_producer_ends_immediately() {
        let mut producer = SequenceProducer::empty();
        assert_eq!(producer.next_message().unwrap(), None);
    }
}
