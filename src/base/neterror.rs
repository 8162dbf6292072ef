use thiserror::Error;

/// Broad failure classes. The connection state machine and the callers of
/// the client use these to decide whether a failure is terminal for the
/// connection only or for the whole logical invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket level failure. The connection goes to `Error`; never retried.
    Io,
    /// Connect or response timer fired. The connection goes through a
    /// dedicated timeout state to `Closed`.
    Timeout,
    /// Redirect and proxy authentication failures. Never retried.
    Fatal,
    /// Malformed server or proxy response.
    Processing,
    /// The caller asked for something the engine cannot do.
    Request,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Proxy auth unsupported")]
    ProxyAuthUnsupported,
    #[error("Connection timed out")]
    ConnectionTimedOut,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Incomplete chunked encoding")]
    IncompleteChunkedEncoding,
    #[error("Response headers multiple Content-Length")]
    ResponseHeadersMultipleContentLength,

    // Engine errors (custom codes starting at -10000)
    #[error("Redirect cycle detected")]
    RedirectCycleDetected,
    #[error("Proxy authentication failed")]
    ProxyAuthenticationFailed,
    #[error("Response timed out")]
    ResponseTimedOut,
    #[error("Socket closed by remote")]
    SocketRemoteClosed,
    #[error("Data received unexpectedly on idle connection")]
    DataReceivedUnexpectedly,
    #[error("Invalid header")]
    InvalidHeader,
    #[error("Operation not valid in the current connection state")]
    InvalidState,
    #[error("Invalid connector configuration")]
    InvalidConfiguration,
    #[error("Response body error")]
    HttpBodyError,
    #[error("Invalid UTF-8 in response body")]
    InvalidUtf8,
    #[error("JSON parse error")]
    JsonParseError,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::SslProtocolError => -107,
            NetError::AddressUnreachable => -109,
            NetError::TunnelConnectionFailed => -111,
            NetError::SocketNotConnected => -112,
            NetError::ProxyAuthUnsupported => -115,
            NetError::ConnectionTimedOut => -118,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::InvalidResponse => -320,
            NetError::InvalidChunkedEncoding => -321,
            NetError::EmptyResponse => -324,
            NetError::ResponseHeadersTooBig => -325,
            NetError::ResponseHeadersMultipleContentLength => -346,
            NetError::ContentLengthMismatch => -354,
            NetError::IncompleteChunkedEncoding => -355,

            NetError::RedirectCycleDetected => -10000,
            NetError::ProxyAuthenticationFailed => -10001,
            NetError::ResponseTimedOut => -10002,
            NetError::SocketRemoteClosed => -10003,
            NetError::DataReceivedUnexpectedly => -10004,
            NetError::InvalidHeader => -10005,
            NetError::InvalidState => -10006,
            NetError::InvalidConfiguration => -10007,
            NetError::HttpBodyError => -10008,
            NetError::InvalidUtf8 => -10009,
            NetError::JsonParseError => -10010,
            NetError::Unknown(code) => *code,
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            NetError::ConnectionTimedOut | NetError::ResponseTimedOut => ErrorCategory::Timeout,

            NetError::TooManyRedirects
            | NetError::RedirectCycleDetected
            | NetError::ProxyAuthenticationFailed
            | NetError::ProxyAuthUnsupported => ErrorCategory::Fatal,

            NetError::InvalidResponse
            | NetError::InvalidRedirect
            | NetError::InvalidChunkedEncoding
            | NetError::EmptyResponse
            | NetError::ResponseHeadersTooBig
            | NetError::ResponseHeadersMultipleContentLength
            | NetError::ContentLengthMismatch
            | NetError::IncompleteChunkedEncoding
            | NetError::TunnelConnectionFailed
            | NetError::HttpBodyError
            | NetError::InvalidUtf8
            | NetError::JsonParseError => ErrorCategory::Processing,

            NetError::InvalidUrl
            | NetError::UnknownUrlScheme
            | NetError::InvalidHeader
            | NetError::InvalidState
            | NetError::InvalidConfiguration => ErrorCategory::Request,

            _ => ErrorCategory::Io,
        }
    }

    /// Whether this is one of the two redirect failures.
    pub fn is_redirect_error(&self) -> bool {
        matches!(self, NetError::TooManyRedirects | NetError::RedirectCycleDetected)
    }

    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -109 => NetError::AddressUnreachable,
            -111 => NetError::TunnelConnectionFailed,
            -112 => NetError::SocketNotConnected,
            -115 => NetError::ProxyAuthUnsupported,
            -118 => NetError::ConnectionTimedOut,

            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -303 => NetError::InvalidRedirect,
            -310 => NetError::TooManyRedirects,
            -320 => NetError::InvalidResponse,
            -321 => NetError::InvalidChunkedEncoding,
            -324 => NetError::EmptyResponse,
            -325 => NetError::ResponseHeadersTooBig,
            -346 => NetError::ResponseHeadersMultipleContentLength,
            -354 => NetError::ContentLengthMismatch,
            -355 => NetError::IncompleteChunkedEncoding,

            -10000 => NetError::RedirectCycleDetected,
            -10001 => NetError::ProxyAuthenticationFailed,
            -10002 => NetError::ResponseTimedOut,
            -10003 => NetError::SocketRemoteClosed,
            -10004 => NetError::DataReceivedUnexpectedly,
            -10005 => NetError::InvalidHeader,
            -10006 => NetError::InvalidState,
            -10007 => NetError::InvalidConfiguration,
            -10008 => NetError::HttpBodyError,
            -10009 => NetError::InvalidUtf8,
            -10010 => NetError::JsonParseError,
            _ => NetError::Unknown(code),
        }
    }
}
