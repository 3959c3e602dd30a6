use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use rpcprims_metadata::{HeaderMap, TrailerMap};
use rpcprims_status::{ErrorKind, RpcError};
use tracing::debug;

use crate::traits::{Destination, StreamEvents, StreamHandle, StreamStatus, StreamTransport};

// One in-flight message plus the half-close marker.
const FRAME_QUEUE_DEPTH: usize = 2;

enum ClientFrame {
    Message(Bytes),
    FinishSends,
}

/// In-process transport: every opened stream runs a server handler on its
/// own thread.
///
/// The handler thread is the transport's event delivery context: whatever
/// it sends through its [`ServerStream`] arrives at the call as frame
/// events. Send capacity is granted as the handler consumes client
/// messages, one frame at a time, which makes the caller's pull discipline
/// observable in tests.
pub struct LoopbackTransport {
    handler: Arc<dyn Fn(ServerStream) + Send + Sync>,
}

impl LoopbackTransport {
    /// Create a transport that runs `handler` for each opened stream.
    pub fn new(handler: impl Fn(ServerStream) + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl StreamTransport for LoopbackTransport {
    fn open_stream(
        &self,
        destination: &Destination,
        headers: &HeaderMap,
        events: Arc<dyn StreamEvents>,
    ) -> Result<Box<dyn StreamHandle>, RpcError> {
        let (frame_tx, frame_rx) = sync_channel(FRAME_QUEUE_DEPTH);
        let cancelled = Arc::new(AtomicBool::new(false));

        let server = ServerStream {
            destination: destination.clone(),
            request_headers: headers.clone(),
            frames: frame_rx,
            events,
            cancelled: Arc::clone(&cancelled),
            terminal_sent: Cell::new(false),
        };

        debug!(host = destination.host(), path = destination.path(), "opening loopback stream");
        let handler = Arc::clone(&self.handler);
        thread::Builder::new()
            .name("loopback-server".into())
            .spawn(move || handler(server))
            .map_err(|e| {
                RpcError::new(ErrorKind::Unavailable)
                    .with_message(format!("failed to spawn stream handler: {e}"))
            })?;

        Ok(Box::new(LoopbackHandle {
            frames: Some(frame_tx),
            cancelled,
        }))
    }
}

struct LoopbackHandle {
    frames: Option<SyncSender<ClientFrame>>,
    cancelled: Arc<AtomicBool>,
}

impl StreamHandle for LoopbackHandle {
    fn send_message(&mut self, payload: Bytes) -> Result<(), RpcError> {
        let Some(frames) = self.frames.as_ref() else {
            return Err(stream_closed());
        };
        match frames.try_send(ClientFrame::Message(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RpcError::new(ErrorKind::ResourceExhausted)
                .with_message("outbound frame sent without capacity")),
            Err(TrySendError::Disconnected(_)) => Err(stream_closed()),
        }
    }

    fn finish_sends(&mut self) -> Result<(), RpcError> {
        match self.frames.take() {
            Some(frames) => {
                // Dropping the sender afterwards lets the server observe
                // end-of-sends even if the marker did not fit.
                let _ = frames.try_send(ClientFrame::FinishSends);
                Ok(())
            }
            None => Err(stream_closed()),
        }
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Hang up the frame queue so a blocked server read returns.
        self.frames.take();
    }
}

fn stream_closed() -> RpcError {
    RpcError::new(ErrorKind::Unavailable).with_message("loopback stream closed")
}

/// The server side of one loopback stream, handed to the handler.
///
/// Dropping the stream without sending a status aborts it, the way tearing
/// down a real connection resets its live streams.
pub struct ServerStream {
    destination: Destination,
    request_headers: HeaderMap,
    frames: Receiver<ClientFrame>,
    events: Arc<dyn StreamEvents>,
    cancelled: Arc<AtomicBool>,
    terminal_sent: Cell<bool>,
}

impl ServerStream {
    /// The destination the client opened the stream against.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The client's frozen request headers.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Receive the next client message, granting send capacity for the one
    /// after it.
    ///
    /// Returns `None` once the client has finished its sends or reset the
    /// stream; check [`is_cancelled`](Self::is_cancelled) to tell the two
    /// apart.
    pub fn recv_message(&mut self) -> Option<Bytes> {
        match self.frames.recv() {
            Ok(ClientFrame::Message(payload)) => {
                self.events.on_send_capacity();
                Some(payload)
            }
            Ok(ClientFrame::FinishSends) | Err(_) => None,
        }
    }

    /// Send the response-header frame.
    pub fn send_headers(&self, headers: HeaderMap) {
        self.events.on_headers(headers);
    }

    /// Send one response message frame.
    ///
    /// Blocks while the client's consumer is busy; that is the inbound
    /// flow control.
    pub fn send_message(&self, payload: impl Into<Bytes>) {
        self.events.on_message(payload.into());
    }

    /// Send the trailer frame with the success status and complete the
    /// stream.
    pub fn finish(&self, trailers: TrailerMap) {
        self.terminal_sent.set(true);
        self.events.on_trailers(trailers, StreamStatus::ok());
    }

    /// Send the trailer frame with an explicit status and complete the
    /// stream.
    pub fn finish_with_status(&self, trailers: TrailerMap, status: StreamStatus) {
        self.terminal_sent.set(true);
        self.events.on_trailers(trailers, status);
    }

    /// End the stream abnormally, without a trailer frame.
    pub fn abort(&self, error: RpcError) {
        self.terminal_sent.set(true);
        self.events.on_abort(error);
    }

    /// Whether the client has reset the stream.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for ServerStream {
    fn drop(&mut self) {
        if !self.terminal_sent.get() {
            self.events.on_abort(
                RpcError::new(ErrorKind::Internal)
                    .with_message("stream handler exited without a status"),
            );
        }
    }
}
