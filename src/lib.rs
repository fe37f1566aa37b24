//! Per-request completion tracking for Ebbtide HTTP client backends.
//!
//! An asynchronous request can finish in exactly one of several racing ways:
//! the reading side delivers a successful response or a transport error, or
//! the timeout timer fires on a background thread and aborts the transfer.
//! This crate provides [`RequestState`], the state holder that arbitrates
//! which of those paths wins, delivers the outcome to the user-supplied
//! callbacks at most once, and releases the request's pooled buffers no
//! matter which path won.
//!
//! ## Collaborators
//!
//! The surrounding backend owns everything else: it builds the request,
//! attaches the transport handles via [`RequestState::set_request_handle`]
//! and [`RequestState::set_response`], and runs the reader loop that fills
//! the [`ResponseBuffers`] before calling
//! [`handle_success`](RequestState::handle_success) or
//! [`handle_error`](RequestState::handle_error). The timer and buffer pool
//! are injected capabilities; both have portable defaults
//! ([`ThreadTimer`], [`SharedBufferPool`]) and both degrade gracefully when
//! absent.
//!
//! ## Callback delivery
//!
//! Callbacks run on the completing thread by default. A captured
//! [`DispatchContext`] takes priority and receives the callback as a posted
//! task; requests may instead opt into the process-wide foreground context
//! installed with [`register_foreground_context`].

#![deny(missing_docs)]

pub mod buffer;
mod cancel;
pub mod dispatch;
mod error;
mod state;
pub mod timer;
pub mod transport;

pub use buffer::{BufferPool, SharedBufferPool};
pub use cancel::CancellationToken;
pub use dispatch::{register_foreground_context, DispatchContext, DispatchTask, ThreadDispatcher};
pub use error::{Error, Result};
pub use state::{
    OnError, OnResponseInit, OnSuccess, RequestState, RequestStateBuilder, ResponseBuffers,
};
pub use timer::{ThreadTimer, TimerFacility, TimerHandle};
pub use transport::{ResponseStream, TransportRequest, TransportResponse};
