//! Error types delivered through the completion callbacks.

use thiserror::Error;

/// Errors a request completion can deliver to the registered error callback.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred while transferring the request.
    #[error("IO Error")]
    Io(#[from] std::io::Error),
    /// The server responded with a non-success status code.
    #[error("Unsuccessful status code {0}")]
    Status(u16),
    /// The request is not finished within the configured timeout.
    ///
    /// The wrapped error is whatever failure the transport abort surfaced on
    /// the reading side; it is preserved as the [`source`](std::error::Error::source)
    /// so callers never mistake an abort-induced error for a plain transport
    /// failure.
    #[error("Request is not finished within timeout")]
    RequestTimeout(#[source] Box<Error>),
}

/// A `Result` alias where the `Err` case is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn timeout_error_preserves_source() {
        let inner = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "aborted",
        ));
        let err = Error::RequestTimeout(Box::new(inner));
        let source = err.source().expect("timeout error must carry a source");
        assert!(matches!(
            source.downcast_ref::<Error>(),
            Some(Error::Io(_))
        ));
    }
}
