use crate::addr::Family;

/// Result alias used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, SocketError>;

/// The fixed error enumeration reported by `Socket::last_error()`.
///
/// Every `SocketError` collapses to exactly one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    NoError,
    InvalidOperation,
    Io,
    InvalidAddress,
    InvalidSocket,
    HostNotFound,
    InvalidPort,
    WouldBlock,
    TimedOut,
    OutOfMemory,
    InvalidOption,
}

impl ErrorCode {
    /// True for conditions a caller is expected to retry or re-poll.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorCode::WouldBlock | ErrorCode::TimedOut)
    }
}

/// Socket and address errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket() failed: {}", errno_to_str(*.errno))]
    Create { errno: i32 },

    #[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
    Bind { errno: i32, addr: String },

    #[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
    Listen { errno: i32, backlog: i32 },

    #[error("connect({addr}) failed: {}", errno_to_str(*.errno))]
    Connect { errno: i32, addr: String },

    #[error("accept() failed: {}", errno_to_str(*.errno))]
    Accept { errno: i32 },

    #[error("read() failed: {}", errno_to_str(*.errno))]
    Read { errno: i32 },

    #[error("write() failed: {}", errno_to_str(*.errno))]
    Write { errno: i32 },

    #[error("{op} failed: {}", errno_to_str(*.errno))]
    Poll { op: &'static str, errno: i32 },

    #[error("setsockopt({option}) failed: {}", errno_to_str(*.errno))]
    SetOption { errno: i32, option: &'static str },

    #[error("getsockopt({option}) failed: {}", errno_to_str(*.errno))]
    GetOption { errno: i32, option: &'static str },

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: &'static str },

    #[error("address family mismatch: address is {actual}, operation needs {expected}")]
    FamilyMismatch { expected: Family, actual: Family },

    #[error("host not found: {host}")]
    HostNotFound { host: String },

    #[error("invalid port or service: {port}")]
    InvalidPort { port: String },

    #[error("invalid socket: {reason}")]
    InvalidSocket { reason: &'static str },

    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: &'static str },

    #[error("operation would block")]
    WouldBlock,

    #[error("operation timed out")]
    TimedOut,

    #[error("manager initialization failed: {reason}")]
    ManagerInit { reason: String },
}

impl SocketError {
    /// Collapses this error into the fixed error enumeration.
    pub fn code(&self) -> ErrorCode {
        match self {
            SocketError::Create { errno }
            | SocketError::Accept { errno }
            | SocketError::Read { errno }
            | SocketError::Write { errno }
            | SocketError::Listen { errno, .. }
            | SocketError::Poll { errno, .. }
            | SocketError::Bind { errno, .. }
            | SocketError::Connect { errno, .. } => classify(*errno, ErrorCode::Io),
            SocketError::SetOption { errno, .. } | SocketError::GetOption { errno, .. } => {
                classify(*errno, ErrorCode::InvalidOption)
            }
            SocketError::InvalidAddress { .. } | SocketError::FamilyMismatch { .. } => {
                ErrorCode::InvalidAddress
            }
            SocketError::HostNotFound { .. } => ErrorCode::HostNotFound,
            SocketError::InvalidPort { .. } => ErrorCode::InvalidPort,
            SocketError::InvalidSocket { .. } => ErrorCode::InvalidSocket,
            SocketError::InvalidOperation { .. } | SocketError::ManagerInit { .. } => {
                ErrorCode::InvalidOperation
            }
            SocketError::WouldBlock => ErrorCode::WouldBlock,
            SocketError::TimedOut => ErrorCode::TimedOut,
        }
    }

    /// Returns the errno carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SocketError::Create { errno }
            | SocketError::Accept { errno }
            | SocketError::Read { errno }
            | SocketError::Write { errno }
            | SocketError::Listen { errno, .. }
            | SocketError::Poll { errno, .. }
            | SocketError::Bind { errno, .. }
            | SocketError::Connect { errno, .. }
            | SocketError::SetOption { errno, .. }
            | SocketError::GetOption { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// True when the socket that produced this error can no longer be used
    /// for data transfer.
    pub(crate) fn is_hard(&self) -> bool {
        matches!(
            self.raw_os_error(),
            Some(libc::EPIPE | libc::ECONNRESET | libc::ECONNABORTED | libc::ENOTCONN | libc::ETIMEDOUT)
        )
    }
}

/// Errnos that belong to a transient or address class regardless of the call.
fn classify(errno: i32, fallback: ErrorCode) -> ErrorCode {
    match errno {
        libc::EAGAIN | libc::EINPROGRESS | libc::EALREADY => ErrorCode::WouldBlock,
        libc::ETIMEDOUT => ErrorCode::TimedOut,
        libc::ENOMEM | libc::ENOBUFS => ErrorCode::OutOfMemory,
        libc::EBADF | libc::ENOTSOCK | libc::ENOTCONN => ErrorCode::InvalidSocket,
        libc::EADDRINUSE | libc::EADDRNOTAVAIL | libc::EAFNOSUPPORT | libc::ENOENT => {
            ErrorCode::InvalidAddress
        }
        _ => fallback,
    }
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Converts errno to human-readable string.
fn errno_to_str(errno: i32) -> String {
    match errno {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::EAFNOSUPPORT => "address family not supported".into(),
        libc::EAGAIN => "resource temporarily unavailable".into(),
        libc::EBADF => "bad file descriptor".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::ECONNRESET => "connection reset by peer".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EINTR => "interrupted by signal".into(),
        libc::EINVAL => "invalid argument".into(),
        libc::EMFILE => "too many open files".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENOBUFS => "no buffer space available".into(),
        libc::ENOENT => "no such file or directory".into(),
        libc::ENOTCONN => "not connected".into(),
        libc::ENOTSOCK => "not a socket".into(),
        libc::EOPNOTSUPP => "operation not supported".into(),
        libc::EPIPE => "broken pipe".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", errno),
    }
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
    match errno {
        libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
        libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
        libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
        libc::EAGAIN => std::io::ErrorKind::WouldBlock,
        libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
        libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
        libc::EINTR => std::io::ErrorKind::Interrupted,
        libc::EINVAL => std::io::ErrorKind::InvalidInput,
        libc::ENOTCONN => std::io::ErrorKind::NotConnected,
        libc::EPIPE => std::io::ErrorKind::BrokenPipe,
        libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
        _ => std::io::ErrorKind::Other,
    }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        let kind = match (&err, err.raw_os_error()) {
            (_, Some(errno)) => errno_to_kind(errno),
            (SocketError::WouldBlock, None) => std::io::ErrorKind::WouldBlock,
            (SocketError::TimedOut, None) => std::io::ErrorKind::TimedOut,
            (SocketError::InvalidSocket { .. }, None) => std::io::ErrorKind::NotConnected,
            (SocketError::HostNotFound { .. }, None) => std::io::ErrorKind::NotFound,
            (
                SocketError::InvalidAddress { .. }
                | SocketError::FamilyMismatch { .. }
                | SocketError::InvalidPort { .. },
                None,
            ) => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
