use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;

use bytes::Bytes;
use rpcprims_channel::{Delivery, MessageChannel};
use rpcprims_metadata::{HeaderMap, TrailerMap};
use rpcprims_status::{ErrorKind, RpcError};
use rpcprims_transport::{
    Destination, StreamEvents, StreamHandle, StreamStatus, StreamTransport,
};
use tracing::{debug, trace, warn};

use crate::endpoints::{MessageConsumer, MessageProducer};

/// How a finished call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Clean completion with a success status.
    Success,
    /// A transport failure, producer failure, or non-success status.
    Error,
    /// Explicit cancellation.
    Cancelled,
}

/// The lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Constructed. Request headers are mutable; no transport activity.
    Idle,
    /// A consumer is attached and the stream is open; response headers
    /// have not arrived yet.
    Started,
    /// Response headers received; messages may flow in both directions.
    Receiving,
    /// Terminal. No further transitions occur.
    Finished(CallOutcome),
}

impl CallState {
    /// Whether this is a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self, CallState::Finished(_))
    }
}

struct Core {
    state: CallState,
    consumer_attached: bool,
    producer: Option<Box<dyn MessageProducer>>,
    response_headers: Option<HeaderMap>,
    response_trailers: Option<TrailerMap>,
    error: Option<RpcError>,
}

struct Shared {
    destination: Destination,
    transport: Arc<dyn StreamTransport>,
    request_headers: Mutex<HeaderMap>,
    core: Mutex<Core>,
    // Never held together with `core`: terminal paths release `core`
    // before touching the stream handle.
    handle: Mutex<Option<Box<dyn StreamHandle>>>,
    outbound: MessageChannel,
    inbound: MessageChannel,
}

/// One remote procedure call.
///
/// Cloning yields another handle to the same call, which lets a different
/// thread cancel it (for example, a deadline timer layered on top; this
/// core enforces no deadline itself).
///
/// All failures surface exclusively through the consumer's terminal
/// completion. Caller misuse (mutating request headers after start,
/// starting twice) panics.
#[derive(Clone)]
pub struct Call {
    shared: Arc<Shared>,
}

/// Mutable view of the request headers, held only while in use.
///
/// After the call has started the underlying map is frozen: reads keep
/// working, mutation panics.
pub struct RequestHeaders<'a> {
    guard: MutexGuard<'a, HeaderMap>,
}

impl Deref for RequestHeaders<'_> {
    type Target = HeaderMap;

    fn deref(&self) -> &HeaderMap {
        &self.guard
    }
}

impl DerefMut for RequestHeaders<'_> {
    fn deref_mut(&mut self) -> &mut HeaderMap {
        &mut self.guard
    }
}

impl Call {
    /// Bind a call to a destination and an outbound producer.
    ///
    /// No transport activity happens until [`start`](Self::start).
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        destination: Destination,
        producer: Box<dyn MessageProducer>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                destination,
                transport,
                request_headers: Mutex::new(HeaderMap::new()),
                core: Mutex::new(Core {
                    state: CallState::Idle,
                    consumer_attached: false,
                    producer: Some(producer),
                    response_headers: None,
                    response_trailers: None,
                    error: None,
                }),
                handle: Mutex::new(None),
                outbound: MessageChannel::new(),
                inbound: MessageChannel::new(),
            }),
        }
    }

    /// The destination this call is bound to.
    pub fn destination(&self) -> &Destination {
        &self.shared.destination
    }

    /// Access the request headers.
    ///
    /// Mutable until the call starts; mutation afterwards panics.
    pub fn request_headers(&self) -> RequestHeaders<'_> {
        RequestHeaders {
            guard: self.shared.request_headers.lock().unwrap(),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> CallState {
        self.shared.core.lock().unwrap().state
    }

    /// The response headers, absent until the headers frame arrives.
    pub fn response_headers(&self) -> Option<HeaderMap> {
        self.shared.core.lock().unwrap().response_headers.clone()
    }

    /// The response trailers, absent until the call finishes with a
    /// trailer frame.
    pub fn response_trailers(&self) -> Option<TrailerMap> {
        self.shared.core.lock().unwrap().response_trailers.clone()
    }

    /// The terminal error, present only when the call finished with an
    /// error or was cancelled.
    pub fn error(&self) -> Option<RpcError> {
        self.shared.core.lock().unwrap().error.clone()
    }

    /// Attach the inbound consumer and start the call.
    ///
    /// Atomically from the caller's point of view: the request headers
    /// freeze, the transport opens a stream, and the producer begins being
    /// pulled. On a call cancelled before start, the consumer receives the
    /// `Cancelled` completion immediately and no stream is ever opened.
    ///
    /// # Panics
    ///
    /// If the call was already started.
    pub fn start(&self, consumer: impl MessageConsumer + 'static) {
        let shared = Arc::clone(&self.shared);
        let mut consumer: Box<dyn MessageConsumer> = Box::new(consumer);

        let producer = {
            let mut core = shared.core.lock().unwrap();
            assert!(!core.consumer_attached, "call already started");
            core.consumer_attached = true;
            match core.state {
                CallState::Idle => {}
                CallState::Finished(_) => {
                    let error = core.error.clone().unwrap_or_else(RpcError::cancelled);
                    drop(core);
                    debug!("consumer attached to a call cancelled before start");
                    consumer.on_complete(Err(error));
                    return;
                }
                CallState::Started | CallState::Receiving => unreachable!(),
            }
            shared.request_headers.lock().unwrap().freeze();
            core.state = CallState::Started;
            core.producer.take()
        };

        debug!(
            host = shared.destination.host(),
            path = shared.destination.path(),
            "starting call"
        );

        // The delivery pump owns the consumer for the rest of the call and
        // is the only place the terminal completion is ever delivered from.
        {
            let shared = Arc::clone(&shared);
            thread::spawn(move || delivery_pump(&shared, consumer));
        }

        let headers = shared.request_headers.lock().unwrap().clone();
        let events: Arc<dyn StreamEvents> = Arc::new(EventSink {
            shared: Arc::downgrade(&shared),
        });
        match shared
            .transport
            .open_stream(&shared.destination, &headers, events)
        {
            Ok(handle) => {
                *shared.handle.lock().unwrap() = Some(handle);
                if shared.core.lock().unwrap().state.is_finished() {
                    // Cancelled while the stream was opening: reset it.
                    if let Some(mut handle) = shared.handle.lock().unwrap().take() {
                        handle.cancel();
                    }
                    return;
                }
                let producer = producer.expect("idle call retains its producer");
                {
                    let shared = Arc::clone(&shared);
                    thread::spawn(move || producer_pump(&shared, producer));
                }
                thread::spawn(move || writer_pump(&shared));
            }
            Err(error) => {
                warn!(%error, "failed to open stream");
                shared.finish_failed(error, CallOutcome::Error, false, false);
            }
        }
    }

    /// Cancel the call.
    ///
    /// The producer stops being pulled, the stream is reset, and the
    /// consumer (if attached) receives a `Cancelled` completion. A message
    /// already in flight inbound is dropped; a delivery the consumer is
    /// currently processing completes first. No-op on a finished call;
    /// safe to invoke from any thread at any time.
    pub fn cancel(&self) {
        self.shared.finish_failed(
            RpcError::cancelled(),
            CallOutcome::Cancelled,
            true,
            true,
        );
    }
}

impl Shared {
    /// Latch a failed terminal state and tear down both directions.
    ///
    /// Captured response metadata is attached to the error. First terminal
    /// wins; later callers are no-ops.
    fn finish_failed(
        self: &Arc<Self>,
        error: RpcError,
        outcome: CallOutcome,
        reset_stream: bool,
        drop_in_flight: bool,
    ) {
        let error = {
            let mut core = self.core.lock().unwrap();
            if core.state.is_finished() {
                trace!("terminal already latched");
                return;
            }
            let mut error = error;
            if error.headers().is_none() {
                if let Some(headers) = &core.response_headers {
                    error = error.with_headers(headers.clone());
                }
            }
            if error.trailers().is_none() {
                if let Some(trailers) = &core.response_trailers {
                    error = error.with_trailers(trailers.clone());
                }
            }
            core.error = Some(error.clone());
            core.state = CallState::Finished(outcome);
            debug!(kind = %error.kind(), ?outcome, "call finished");
            error
        };

        let handle = self.handle.lock().unwrap().take();
        if let Some(mut handle) = handle {
            if reset_stream {
                handle.cancel();
            }
        }

        self.outbound.abort(RpcError::cancelled());
        if drop_in_flight {
            self.inbound.abort(error);
        } else {
            self.inbound.fail(error);
        }
    }

    fn handle_headers(self: &Arc<Self>, mut headers: HeaderMap) {
        let mut core = self.core.lock().unwrap();
        match core.state {
            CallState::Started => {
                headers.freeze();
                core.response_headers = Some(headers);
                core.state = CallState::Receiving;
                debug!("response headers received");
            }
            CallState::Receiving => {
                warn!("duplicate response-header frame ignored");
            }
            CallState::Finished(_) => trace!("headers after terminal dropped"),
            CallState::Idle => warn!("headers frame on an unstarted call dropped"),
        }
    }

    fn handle_message(self: &Arc<Self>, payload: Bytes) {
        let state = self.core.lock().unwrap().state;
        match state {
            CallState::Receiving => {}
            CallState::Started => {
                self.finish_failed(
                    RpcError::new(ErrorKind::Internal)
                        .with_message("message frame before response headers"),
                    CallOutcome::Error,
                    true,
                    false,
                );
                return;
            }
            CallState::Finished(_) | CallState::Idle => return,
        }
        trace!(len = payload.len(), "forwarding inbound message");
        // Blocks the transport context while the consumer is busy; a
        // concurrent cancel aborts the channel and unblocks it.
        if self.inbound.send(payload).is_err() {
            trace!("inbound message dropped after terminal");
        }
    }

    fn handle_trailers(self: &Arc<Self>, mut trailers: TrailerMap, status: StreamStatus) {
        let failure = {
            let mut core = self.core.lock().unwrap();
            if core.state.is_finished() {
                trace!("trailer frame after terminal dropped");
                return;
            }
            trailers.freeze();
            core.response_trailers = Some(trailers.clone());
            if status.is_ok() {
                core.state = CallState::Finished(CallOutcome::Success);
                debug!("call finished cleanly");
                None
            } else {
                let (code, message) = status.into_parts();
                let mut error = RpcError::from_status(code, message).with_trailers(trailers);
                if let Some(headers) = &core.response_headers {
                    error = error.with_headers(headers.clone());
                }
                core.error = Some(error.clone());
                core.state = CallState::Finished(CallOutcome::Error);
                debug!(kind = %error.kind(), "call finished with non-success status");
                Some(error)
            }
        };

        // The stream is complete; drop the handle without a reset.
        self.handle.lock().unwrap().take();
        self.outbound.abort(RpcError::cancelled());
        match failure {
            None => self.inbound.finish(),
            Some(error) => self.inbound.fail(error),
        }
    }

    fn handle_abort(self: &Arc<Self>, error: RpcError) {
        // The stream is already dead; deliver any received-but-unclaimed
        // message, then the failure terminal.
        self.finish_failed(error, CallOutcome::Error, false, false);
    }
}

/// Adapter the transport calls back into; holds the call weakly so a
/// finished, dropped call does not linger for the transport's sake.
struct EventSink {
    shared: Weak<Shared>,
}

impl StreamEvents for EventSink {
    fn on_headers(&self, headers: HeaderMap) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_headers(headers);
        }
    }

    fn on_message(&self, payload: Bytes) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_message(payload);
        }
    }

    fn on_trailers(&self, trailers: TrailerMap, status: StreamStatus) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_trailers(trailers, status);
        }
    }

    fn on_send_capacity(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.outbound.ack();
        }
    }

    fn on_abort(&self, error: RpcError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_abort(error);
        }
    }
}

/// Pulls the producer one message at a time into the outbound channel.
///
/// `send` returns only after the transport's capacity acknowledgement, so
/// the producer is never asked for message N+1 before message N is acked.
fn producer_pump(shared: &Arc<Shared>, mut producer: Box<dyn MessageProducer>) {
    loop {
        match producer.next_message() {
            Ok(Some(payload)) => {
                if shared.outbound.send(payload).is_err() {
                    break;
                }
            }
            Ok(None) => {
                trace!("producer exhausted; half-closing");
                shared.outbound.finish();
                break;
            }
            Err(error) => {
                warn!(%error, "producer failed");
                shared.finish_failed(error, CallOutcome::Error, true, true);
                break;
            }
        }
    }
    trace!("producer pump exited");
}

/// Drains the outbound channel into the transport.
fn writer_pump(shared: &Arc<Shared>) {
    loop {
        match shared.outbound.recv() {
            Delivery::Message(payload) => {
                let result = {
                    let mut slot = shared.handle.lock().unwrap();
                    match slot.as_mut() {
                        Some(handle) => handle.send_message(payload),
                        None => break,
                    }
                };
                if let Err(error) = result {
                    warn!(%error, "transport rejected outbound message");
                    shared.finish_failed(error, CallOutcome::Error, true, true);
                    break;
                }
            }
            Delivery::Finished => {
                let result = {
                    let mut slot = shared.handle.lock().unwrap();
                    match slot.as_mut() {
                        Some(handle) => handle.finish_sends(),
                        None => Ok(()),
                    }
                };
                if let Err(error) = result {
                    warn!(%error, "transport rejected half-close");
                    shared.finish_failed(error, CallOutcome::Error, true, true);
                }
                break;
            }
            Delivery::Failed(_) => break,
        }
    }
    trace!("writer pump exited");
}

/// Drains the inbound channel into the consumer and delivers the terminal
/// completion exactly once.
fn delivery_pump(shared: &Arc<Shared>, mut consumer: Box<dyn MessageConsumer>) {
    let mut delivered = 0u64;
    loop {
        match shared.inbound.recv() {
            Delivery::Message(payload) => {
                consumer.on_message(payload);
                shared.inbound.ack();
                delivered += 1;
            }
            Delivery::Finished => {
                consumer.on_complete(Ok(()));
                break;
            }
            Delivery::Failed(error) => {
                consumer.on_complete(Err(error));
                break;
            }
        }
    }
    debug!(delivered, "delivery pump exited");
}
