use rpcprims_metadata::{HeaderMap, TrailerMap};

use crate::kind::ErrorKind;

/// Domain identifier for errors produced by this library.
pub const ERROR_DOMAIN: &str = "rpcprims";

/// Well-known attachment key for response headers captured at failure time.
pub const HEADERS_KEY: &str = "rpcprims-error-headers";

/// Well-known attachment key for response trailers captured at failure time.
pub const TRAILERS_KEY: &str = "rpcprims-error-trailers";

/// The terminal error record of a failed call.
///
/// Carries the canonical [`ErrorKind`], an optional human-readable message,
/// and the response headers/trailers observed by the time of failure. The
/// metadata attachments are addressable through [`HEADERS_KEY`] and
/// [`TRAILERS_KEY`] via [`RpcError::attachment`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct RpcError {
    kind: ErrorKind,
    message: Option<String>,
    headers: Option<HeaderMap>,
    trailers: Option<TrailerMap>,
}

impl RpcError {
    /// Create an error of the given kind with no message or attachments.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            headers: None,
            trailers: None,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Map a non-success wire status tag and message to an error.
    pub fn from_status(code: u32, message: Option<String>) -> Self {
        Self {
            kind: ErrorKind::from_code(code),
            message,
            headers: None,
            trailers: None,
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the response headers observed at failure time.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Attach the response trailers observed at failure time.
    pub fn with_trailers(mut self, trailers: TrailerMap) -> Self {
        self.trailers = Some(trailers);
        self
    }

    /// The canonical kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Response headers captured at failure time, if any.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Response trailers captured at failure time, if any.
    pub fn trailers(&self) -> Option<&TrailerMap> {
        self.trailers.as_ref()
    }

    /// Look up a metadata attachment by its well-known key.
    ///
    /// Returns `None` for keys other than [`HEADERS_KEY`] and
    /// [`TRAILERS_KEY`], or when the attachment was not captured.
    pub fn attachment(&self, key: &str) -> Option<&HeaderMap> {
        match key {
            HEADERS_KEY => self.headers.as_ref(),
            TRAILERS_KEY => self.trailers.as_ref(),
            _ => None,
        }
    }
}
