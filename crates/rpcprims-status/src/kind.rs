/// Canonical error kinds for RPC outcomes, with their wire status tags.
///
/// Tag 0 is reserved for success and is not an error kind; callers decide
/// success before mapping a tag through [`ErrorKind::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// The call was cancelled, typically by the caller.
    Cancelled = 1,
    /// An error without enough information to classify.
    Unknown = 2,
    /// The request is malformed regardless of server state.
    InvalidArgument = 3,
    /// The deadline passed before completion; the operation may still have
    /// partially or fully succeeded server-side.
    DeadlineExceeded = 4,
    /// A requested entity was not found.
    NotFound = 5,
    /// Entity creation collided with an existing entity.
    AlreadyExists = 6,
    /// The caller is identified but lacks authorization.
    PermissionDenied = 7,
    /// A quota or resource limit was hit.
    ResourceExhausted = 8,
    /// The server is not in the state the operation requires; retrying
    /// without an external fix will not help.
    FailedPrecondition = 9,
    /// A concurrency conflict; retryable at a higher level.
    Aborted = 10,
    /// The request was valid but past a bound that may change over time.
    OutOfRange = 11,
    /// The operation is not supported by this server.
    Unimplemented = 12,
    /// A broken invariant on the server or library side.
    Internal = 13,
    /// A transient condition; retrying with backoff is reasonable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The caller's identity could not be verified.
    Unauthenticated = 16,
}

impl ErrorKind {
    /// The numeric status tag for this kind.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Map a non-success status tag to a kind.
    ///
    /// Tags outside the canonical range (including 0) map to `Unknown`,
    /// mirroring how peers treat status codes they do not recognize.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}
