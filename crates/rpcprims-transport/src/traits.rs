use std::sync::Arc;

use bytes::Bytes;
use rpcprims_metadata::{HeaderMap, TrailerMap};
use rpcprims_status::RpcError;

/// The remote endpoint of one call: a host and a method path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    host: String,
    path: String,
}

impl Destination {
    /// Create a destination from a host and a method path.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// The host component.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The method path component.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

/// The status carried by a trailer frame. Code 0 is success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    code: u32,
    message: Option<String>,
}

impl StreamStatus {
    /// The success status code.
    pub const OK_CODE: u32 = 0;

    /// Create a status from a raw code and optional message.
    pub fn new(code: u32, message: Option<String>) -> Self {
        Self { code, message }
    }

    /// The success status.
    pub fn ok() -> Self {
        Self::new(Self::OK_CODE, None)
    }

    /// A non-success status with a message.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self::new(code, Some(message.into()))
    }

    /// Whether this is the success status.
    pub fn is_ok(&self) -> bool {
        self.code == Self::OK_CODE
    }

    /// The raw status code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// The status message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Consume the status, returning code and message.
    pub fn into_parts(self) -> (u32, Option<String>) {
        (self.code, self.message)
    }
}

/// Frame events a transport delivers for one open stream.
///
/// Implemented by the call core. A transport delivers the events of one
/// stream sequentially, on its own execution context; `on_message` may
/// block while the downstream consumer is busy, and that blocking is the
/// inbound flow control.
pub trait StreamEvents: Send + Sync {
    /// The response-header frame arrived. Delivered at most once, before
    /// any `on_message`.
    fn on_headers(&self, headers: HeaderMap);

    /// A response message frame arrived.
    fn on_message(&self, payload: Bytes);

    /// The trailer/status frame arrived; the stream is complete.
    fn on_trailers(&self, trailers: TrailerMap, status: StreamStatus);

    /// The transport can accept the next outbound message frame.
    fn on_send_capacity(&self);

    /// The stream ended abnormally without a trailer frame.
    fn on_abort(&self, error: RpcError);
}

/// One open outbound stream.
pub trait StreamHandle: Send {
    /// Enqueue one outbound message frame.
    ///
    /// Must not block waiting for peer capacity: the caller paces itself on
    /// [`StreamEvents::on_send_capacity`] and never has more than one
    /// unacknowledged frame outstanding.
    fn send_message(&mut self, payload: Bytes) -> Result<(), RpcError>;

    /// Half-close: no further outbound messages will be sent.
    fn finish_sends(&mut self) -> Result<(), RpcError>;

    /// Reset the stream. Best-effort; the call is already terminating.
    fn cancel(&mut self);
}

/// The transport collaborator a call opens its stream through.
pub trait StreamTransport: Send + Sync {
    /// Open a logical stream to `destination`, announcing the frozen
    /// request headers, and wire its frame events to `events`.
    fn open_stream(
        &self,
        destination: &Destination,
        headers: &HeaderMap,
        events: Arc<dyn StreamEvents>,
    ) -> Result<Box<dyn StreamHandle>, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_accessors_and_display() {
        let dest = Destination::new("greeter.example", "/greeter/SayHello");
        assert_eq!(dest.host(), "greeter.example");
        assert_eq!(dest.path(), "/greeter/SayHello");
        assert_eq!(dest.to_string(), "greeter.example/greeter/SayHello");
    }

    #[test]
    fn status_ok_and_error() {
        assert!(StreamStatus::ok().is_ok());
        let status = StreamStatus::error(5, "missing");
        assert!(!status.is_ok());
        assert_eq!(status.code(), 5);
        assert_eq!(status.message(), Some("missing"));
        assert_eq!(status.into_parts(), (5, Some("missing".into())));
    }
}
