use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;
use rpcprims_status::RpcError;
use tracing::trace;

/// Error returned to a producer sending into a terminated channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message channel terminated")]
pub struct ChannelTerminated;

/// The next thing a consumer observes on a channel.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// The next message, in arrival order.
    Message(Bytes),
    /// Clean end of stream.
    Finished,
    /// The stream failed; no further messages follow.
    Failed(RpcError),
}

enum Terminal {
    Finished,
    Failed(RpcError),
}

struct State {
    /// The single in-flight message not yet taken by the consumer.
    slot: Option<Bytes>,
    /// Deliveries taken but not yet acknowledged (0 or 1).
    pending: u64,
    /// Acknowledgements that arrived ahead of a delivery.
    credits: u64,
    terminal: Option<Terminal>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

/// An ordered, single-in-flight pipe between one producer and one consumer.
///
/// Handles are cheap clones of the same pipe. [`send`](Self::send) blocks
/// until the message has been taken by the consumer and acknowledged via
/// [`ack`](Self::ack). Termination latches exactly once (first caller
/// wins) and is sticky on [`recv`](Self::recv):
///
/// - [`finish`](Self::finish) / [`fail`](Self::fail) are graceful: a
///   message already in the slot is still delivered before the terminal.
/// - [`abort`](Self::abort) is immediate: the slot is dropped and every
///   blocked `send` returns [`ChannelTerminated`]. This is the cancellation
///   escape: no wait on this channel outlives an abort.
#[derive(Clone)]
pub struct MessageChannel {
    shared: Arc<Shared>,
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageChannel {
    /// Create an open channel with an empty slot.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    slot: None,
                    pending: 0,
                    credits: 0,
                    terminal: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Deliver one message, blocking until it has been taken and acked.
    ///
    /// Returns [`ChannelTerminated`] if the channel terminates before the
    /// acknowledgement arrives.
    pub fn send(&self, message: Bytes) -> Result<(), ChannelTerminated> {
        let mut state = self.shared.state.lock().unwrap();
        while state.terminal.is_none() && (state.slot.is_some() || state.pending > 0) {
            state = self.shared.cond.wait(state).unwrap();
        }
        if state.terminal.is_some() {
            return Err(ChannelTerminated);
        }

        state.slot = Some(message);
        self.shared.cond.notify_all();

        while state.terminal.is_none() && (state.slot.is_some() || state.pending > 0) {
            state = self.shared.cond.wait(state).unwrap();
        }
        if state.slot.is_none() && state.pending == 0 {
            Ok(())
        } else {
            Err(ChannelTerminated)
        }
    }

    /// Take the next delivery, blocking until one is available.
    ///
    /// A pending message is always returned before a graceful terminal.
    /// After the terminal has been returned once it repeats on every
    /// subsequent call.
    pub fn recv(&self) -> Delivery {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(message) = state.slot.take() {
                if state.credits > 0 {
                    state.credits -= 1;
                } else {
                    state.pending += 1;
                }
                self.shared.cond.notify_all();
                return Delivery::Message(message);
            }
            match &state.terminal {
                Some(Terminal::Finished) => return Delivery::Finished,
                Some(Terminal::Failed(err)) => return Delivery::Failed(err.clone()),
                None => state = self.shared.cond.wait(state).unwrap(),
            }
        }
    }

    /// Acknowledge the in-flight delivery, authorizing the next `send`.
    ///
    /// An acknowledgement arriving before its delivery is banked and
    /// consumed by the next one.
    pub fn ack(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.pending > 0 {
            state.pending -= 1;
        } else {
            state.credits += 1;
        }
        self.shared.cond.notify_all();
    }

    /// Terminate cleanly after the last delivered message.
    pub fn finish(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.terminal.is_none() {
            trace!("channel finished");
            state.terminal = Some(Terminal::Finished);
        }
        self.shared.cond.notify_all();
    }

    /// Terminate with an error after the last delivered message.
    pub fn fail(&self, error: RpcError) {
        let mut state = self.shared.state.lock().unwrap();
        if state.terminal.is_none() {
            trace!(%error, "channel failed");
            state.terminal = Some(Terminal::Failed(error));
        }
        self.shared.cond.notify_all();
    }

    /// Terminate immediately, dropping any undelivered in-flight message
    /// and unblocking every waiter.
    pub fn abort(&self, error: RpcError) {
        let mut state = self.shared.state.lock().unwrap();
        if state.terminal.is_none() {
            trace!(%error, "channel aborted");
            state.terminal = Some(Terminal::Failed(error));
            state.slot = None;
        }
        self.shared.cond.notify_all();
    }

    /// Whether a terminal has latched.
    pub fn is_terminated(&self) -> bool {
        self.shared.state.lock().unwrap().terminal.is_some()
    }
}
