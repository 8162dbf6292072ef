//! Ergonomic error context helpers.
//!
//! Converts `std::io::Error` values coming out of sockets into the closest
//! `NetError` variant, logging the original error with its context.

use crate::base::neterror::NetError;
use std::io::{self, ErrorKind};

/// Map an IO error to a `NetError` by kind.
pub fn map_io_error(e: &io::Error) -> NetError {
    match e.kind() {
        ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
        ErrorKind::ConnectionReset => NetError::ConnectionReset,
        ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
        ErrorKind::NotConnected => NetError::SocketNotConnected,
        ErrorKind::TimedOut => NetError::ConnectionTimedOut,
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe => NetError::ConnectionClosed,
        ErrorKind::AddrNotAvailable => NetError::AddressUnreachable,
        ErrorKind::InvalidData => NetError::InvalidResponse,
        _ => NetError::ConnectionFailed,
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        map_io_error(&e)
    }
}

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add connection context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use h1net::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("example.com", 443)?;
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Add DNS resolution context to an IO error.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(host = %host, port, error = %e, "socket operation failed");
            map_io_error(&e)
        })
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
            NetError::NameNotResolved
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Error;

    #[test]
    fn test_connection_context() {
        let result: Result<(), io::Error> =
            Err(Error::new(ErrorKind::ConnectionRefused, "refused"));
        let err = result.connection_context("example.com", 443).unwrap_err();
        assert_eq!(err, NetError::ConnectionRefused);
    }

    #[test]
    fn test_reset_and_eof() {
        let reset = Error::new(ErrorKind::ConnectionReset, "rst");
        assert_eq!(map_io_error(&reset), NetError::ConnectionReset);

        let eof = Error::new(ErrorKind::UnexpectedEof, "eof");
        assert_eq!(map_io_error(&eof), NetError::ConnectionClosed);
    }

    #[test]
    fn test_dns_context() {
        let result: Result<(), io::Error> = Err(Error::new(ErrorKind::NotFound, "no such host"));
        let err = result.dns_context("unknown.example.com").unwrap_err();
        assert_eq!(err, NetError::NameNotResolved);
    }
}
