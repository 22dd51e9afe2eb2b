use crate::protocol::ResponseWriterError;
use crate::shadow::ShadowError;

/// Where in the packet exchange a connection error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Init,
    Read,
    Write,
}

/// A fatal session error: the run loop cannot continue after one of these.
#[derive(Debug)]
pub enum StubError<C> {
    /// Transport-level failure.
    Connection(C, ConnectionErrorKind),
    /// Three consecutive transport errors: the peer is hopeless, hang up.
    ClientAbandoned,
    /// The client sent a frame larger than the server will buffer.
    PacketOverflow,
    /// The shadow diverged from the trace; nothing reported after this
    /// point could be trusted.
    Shadow(ShadowError),
}

impl<C: core::fmt::Display> core::fmt::Display for StubError<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use StubError::*;
        match self {
            Connection(e, ConnectionErrorKind::Init) => {
                write!(f, "connection error while initializing the session: {}", e)
            }
            Connection(e, ConnectionErrorKind::Read) => {
                write!(f, "connection error while reading request: {}", e)
            }
            Connection(e, ConnectionErrorKind::Write) => {
                write!(f, "connection error while writing response: {}", e)
            }
            ClientAbandoned => {
                write!(f, "closing connection after repeated transport errors")
            }
            PacketOverflow => write!(f, "received an oversized packet"),
            Shadow(e) => write!(f, "{}", e),
        }
    }
}

impl<C: core::fmt::Display + core::fmt::Debug> std::error::Error for StubError<C> {}

/// Handler-internal error plumbing. Non-fatal variants become `E` replies;
/// the rest propagate out as [`StubError`].
#[derive(Debug)]
pub(crate) enum InternalError<C> {
    Conn(C, ConnectionErrorKind),
    Fatal(ShadowError),
    /// Replied to the client as `E <code>`, in the richest error form the
    /// client negotiated.
    NonFatal { code: u8, msg: Option<String> },
}

impl<C> From<ResponseWriterError<C>> for InternalError<C> {
    fn from(e: ResponseWriterError<C>) -> Self {
        InternalError::Conn(e.0, ConnectionErrorKind::Write)
    }
}

impl<C> From<ShadowError> for InternalError<C> {
    fn from(e: ShadowError) -> Self {
        if e.is_fatal() {
            return InternalError::Fatal(e);
        }

        // errno-flavoured codes, for clients that only show the number
        let code = match &e {
            ShadowError::UnmappedAddress(_) => 14,  // EFAULT
            ShadowError::UnknownRegister(_) => 22,  // EINVAL
            ShadowError::TraceBounds => 34,         // ERANGE
            ShadowError::Layout { .. } => 22,       // EINVAL
            ShadowError::UnknownHart(_) => 3,       // ESRCH
            ShadowError::TraceCorruption { .. } => unreachable!("fatal"),
        };

        InternalError::NonFatal {
            code,
            msg: Some(e.to_string()),
        }
    }
}

impl<C> InternalError<C> {
    pub(crate) fn malformed() -> Self {
        InternalError::NonFatal {
            code: 22,
            msg: Some("malformed packet".to_owned()),
        }
    }
}
