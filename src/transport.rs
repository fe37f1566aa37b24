//! Opaque handles to the transport collaborator.
//!
//! The completion core never drives the transport itself. It holds weak
//! references to the in-flight request and its response so the timeout path
//! can signal an abort, and keeps the response byte stream around for the
//! external reader loop to take.

use std::io::Read;

/// Handle to an in-flight outbound request.
///
/// Abort is the only operation the completion core ever invokes on it: a
/// cooperative signal asking the transfer to unblock and fail immediately.
pub trait TransportRequest: Send + Sync {
    /// Signal the in-flight transfer to fail as soon as possible.
    ///
    /// Must be safe to call while a read on the response stream is blocked;
    /// the blocked read is expected to return an error shortly after.
    fn abort(&self);
}

/// Handle to an inbound response.
pub trait TransportResponse: Send + Sync {
    /// Value of the Content-Length header, if the transport knows it.
    fn content_length(&self) -> Option<u64>;
}

/// Readable response byte stream handed over by the transport.
pub trait ResponseStream: Read + Send {}

impl<S: Read + Send> ResponseStream for S {}
