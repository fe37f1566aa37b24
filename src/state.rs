//! Per-request completion state and race arbitration.
//!
//! A request finishes in exactly one of several racing ways: the reader loop
//! delivers a response or an error, or the timeout timer fires on its own
//! thread and aborts the transport. [`RequestState`] holds the mutable state
//! all of those parties touch and guarantees that the abort side effect runs
//! at most once and that at most one user callback fires.

use std::borrow::Cow;
use std::fmt;
use std::future::{poll_fn, Future};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::Poll;
use std::time::Duration;

use futures_util::task::AtomicWaker;

use crate::buffer::{BufferPool, SharedBufferPool};
use crate::cancel::CancellationToken;
use crate::dispatch::{self, DispatchContext};
use crate::error::Error;
use crate::timer::{TimerFacility, TimerHandle};
use crate::transport::{ResponseStream, TransportRequest, TransportResponse};

/// Success callback, consumed on delivery.
pub type OnSuccess<T> = Box<dyn FnOnce(T) + Send>;

/// Error callback, consumed on delivery. Receives the response handle when
/// one was attached before the failure.
pub type OnError = Box<dyn FnOnce(Option<Arc<dyn TransportResponse>>, Error) + Send>;

/// Callback fired once when the transport response is first attached.
pub type OnResponseInit = Box<dyn FnOnce(&dyn TransportResponse) + Send>;

/// Response accumulation state exposed to the external reader loop.
pub struct ResponseBuffers {
    /// Decoded response text accumulated so far. `None` once disposed.
    pub text: Option<String>,
    /// Raw response bytes accumulated so far. `None` once disposed.
    pub bytes: Option<Vec<u8>>,
    /// Fixed-size scratch area for individual reads.
    pub scratch: Box<[u8]>,
    /// Total response bytes read so far.
    pub bytes_read: u64,
    /// Content-Length hint recorded when the response was attached.
    pub content_length: Option<u64>,
}

impl ResponseBuffers {
    /// Append a chunk of response bytes and bump the read counter.
    pub fn append_bytes(&mut self, chunk: &[u8]) {
        if let Some(bytes) = self.bytes.as_mut() {
            bytes.extend_from_slice(chunk);
        }
        self.bytes_read += chunk.len() as u64;
    }

    /// Append a chunk of decoded response text.
    pub fn append_text(&mut self, chunk: &str) {
        if let Some(text) = self.text.as_mut() {
            text.push_str(chunk);
        }
    }
}

struct TransportHandles {
    request: Option<Weak<dyn TransportRequest>>,
    response: Option<Weak<dyn TransportResponse>>,
    stream: Option<Box<dyn ResponseStream>>,
}

/// Completion-tracking state for a single in-flight request.
///
/// Used behind [`Arc`]; every operation takes `&self` and is safe to call
/// from any thread. The reading thread calls [`handle_success`] or
/// [`handle_error`], the timer thread calls [`handle_timeout`], and whichever
/// side effects must happen once are guarded either by the atomic completion
/// counter (the transport abort) or by take-once slots (callbacks, buffers,
/// timer handle).
///
/// [`handle_success`]: RequestState::handle_success
/// [`handle_error`]: RequestState::handle_error
/// [`handle_timeout`]: RequestState::handle_timeout
pub struct RequestState<T> {
    method: Cow<'static, str>,
    url: String,
    pool: Option<Arc<dyn BufferPool>>,
    timer_facility: Option<Arc<dyn TimerFacility>>,
    dispatch_context: Option<Arc<dyn DispatchContext>>,
    deliver_on_foreground: bool,
    token: CancellationToken,
    completed: AtomicU32,
    timed_out: AtomicBool,
    finished: AtomicBool,
    waker: AtomicWaker,
    timer: Mutex<Option<Box<dyn TimerHandle>>>,
    buffers: Mutex<ResponseBuffers>,
    handles: Mutex<TransportHandles>,
    on_response_init: Mutex<Option<OnResponseInit>>,
    on_success: Mutex<Option<OnSuccess<T>>>,
    on_error: Mutex<Option<OnError>>,
}

impl<T> RequestState<T> {
    /// Start building a state with buffers sized to `buffer_size`.
    pub fn builder(buffer_size: usize) -> RequestStateBuilder<T> {
        RequestStateBuilder {
            buffer_size,
            method: Cow::Borrowed("GET"),
            url: String::new(),
            pool: None,
            timer_facility: None,
            dispatch_context: None,
            deliver_on_foreground: false,
            token: CancellationToken::new(),
            on_response_init: None,
            on_success: None,
            on_error: None,
        }
    }

    /// HTTP method of the request this state tracks.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// URL of the request this state tracks.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The cooperative cancellation token observed by the reader loop.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Attach the outbound request handle once the transport has issued it.
    pub fn set_request_handle(&self, request: Weak<dyn TransportRequest>) {
        self.handles.lock().unwrap().request = Some(request);
    }

    /// Attach the inbound response and its byte stream.
    ///
    /// Records the content-length hint into the buffers and fires the
    /// response-init callback. The callback runs inline on the calling
    /// thread and at most once, no matter how often a response is attached.
    pub fn set_response(
        &self,
        response: &Arc<dyn TransportResponse>,
        stream: Box<dyn ResponseStream>,
    ) {
        {
            let mut handles = self.handles.lock().unwrap();
            handles.response = Some(Arc::downgrade(response));
            handles.stream = Some(stream);
        }
        self.buffers.lock().unwrap().content_length = response.content_length();
        let callback = self.on_response_init.lock().unwrap().take();
        if let Some(callback) = callback {
            callback(&**response);
        }
    }

    /// The transport response handle, if one was attached and is still
    /// alive. Backends pass this to [`handle_error`](RequestState::handle_error)
    /// when a failure happens after the response arrived.
    pub fn response(&self) -> Option<Arc<dyn TransportResponse>> {
        let handles = self.handles.lock().unwrap();
        handles.response.as_ref().and_then(|response| response.upgrade())
    }

    /// Hand the stored response stream to the reader loop.
    ///
    /// The stream is taken out so blocking reads never hold this state's
    /// locks.
    pub fn take_stream(&self) -> Option<Box<dyn ResponseStream>> {
        self.handles.lock().unwrap().stream.take()
    }

    /// Lock the response buffers for the reader loop.
    pub fn buffers(&self) -> MutexGuard<'_, ResponseBuffers> {
        self.buffers.lock().unwrap()
    }

    /// Schedule the timeout timer.
    ///
    /// No-op when no timer facility was injected or `timeout` is zero. Only
    /// one timer may be active per state; starting a new one assumes any
    /// previous one was already stopped.
    pub fn start_timer(self: &Arc<Self>, timeout: Duration)
    where
        T: 'static,
    {
        let Some(facility) = &self.timer_facility else {
            return;
        };
        if timeout.is_zero() {
            return;
        }
        let state = Arc::downgrade(self);
        let handle = facility.schedule(
            timeout,
            Box::new(move || {
                if let Some(state) = state.upgrade() {
                    state.handle_timeout();
                }
            }),
        );
        *self.timer.lock().unwrap() = Some(handle);
    }

    /// Cancel and release the timeout timer if one is active.
    ///
    /// Idempotent; safe from any thread, any number of times, including
    /// after disposal.
    pub fn stop_timer(&self) {
        let timer = self.timer.lock().unwrap().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    /// Timer-fired entry point.
    ///
    /// Only the caller that observes the completion counter's 0→1
    /// transition performs the abort side effect: mark the timed-out flag,
    /// then abort the transport so the in-flight read unblocks. Every caller
    /// stops the timer and disposes the state.
    pub fn handle_timeout(&self) {
        if self.completed.fetch_add(1, Ordering::SeqCst) == 0 {
            let request = {
                let handles = self.handles.lock().unwrap();
                handles.request.as_ref().and_then(|request| request.upgrade())
            };
            if let Some(request) = request {
                self.timed_out.store(true, Ordering::SeqCst);
                request.abort();
            }
        }

        self.stop_timer();
        self.dispose();
        self.mark_finished();
    }

    /// Deliver a successful response.
    ///
    /// Stops the timer first. Without a registered success callback this is
    /// a no-op apart from resolving [`finished`](RequestState::finished).
    pub fn handle_success(&self, response: T)
    where
        T: Send + 'static,
    {
        self.stop_timer();

        let callback = self.on_success.lock().unwrap().take();
        let Some(callback) = callback else {
            self.mark_finished();
            return;
        };

        self.deliver(move || callback(response));
        self.mark_finished();
    }

    /// Deliver a failure.
    ///
    /// Stops the timer first. When the timed-out flag is set the delivered
    /// error is replaced with the canonical timeout error, keeping `error`
    /// as its source; callers never see the raw abort-induced error when the
    /// true cause was a timeout.
    pub fn handle_error(&self, response: Option<Arc<dyn TransportResponse>>, error: Error) {
        self.stop_timer();

        let callback = self.on_error.lock().unwrap().take();
        let Some(callback) = callback else {
            self.mark_finished();
            return;
        };

        let error = if self.timed_out.load(Ordering::SeqCst) {
            Error::RequestTimeout(Box::new(error))
        } else {
            error
        };

        self.deliver(move || callback(response, error));
        self.mark_finished();
    }

    /// Resolves once any completion path has run.
    ///
    /// When the callback was posted to a dispatch context there is no
    /// ordering guarantee between this resolving and the callback having
    /// executed, only that at most one callback fires.
    pub fn finished(&self) -> impl Future<Output = ()> + '_ {
        poll_fn(move |cx| {
            if self.finished.load(Ordering::Acquire) {
                return Poll::Ready(());
            }
            // Register before the final check to avoid missing the wake-up
            // signal.
            self.waker.register(cx.waker());
            if self.finished.load(Ordering::Acquire) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
    }

    /// Release the per-request resources.
    ///
    /// Returns the text buffer to the pool, releases the byte buffer and
    /// cancels the timer. Idempotent from any thread; every release action
    /// takes effect once and later calls are no-ops.
    pub fn dispose(&self) {
        let (text, bytes) = {
            let mut buffers = self.buffers.lock().unwrap();
            (buffers.text.take(), buffers.bytes.take())
        };
        if let Some(text) = text {
            self.pool().release_text(text);
        }
        if let Some(bytes) = bytes {
            self.pool().release_bytes(bytes);
        }

        let timer = self.timer.lock().unwrap().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    fn pool(&self) -> &dyn BufferPool {
        match &self.pool {
            Some(pool) => &**pool,
            None => SharedBufferPool::global(),
        }
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
        self.waker.wake();
    }

    fn deliver(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(context) = &self.dispatch_context {
            context.post(Box::new(task));
        } else if self.deliver_on_foreground {
            match dispatch::foreground_context() {
                Some(context) => context.post(Box::new(task)),
                // No foreground context registered on this target; degrade
                // to direct invocation rather than failing the request.
                None => task(),
            }
        } else {
            task();
        }
    }
}

impl<T> fmt::Debug for RequestState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestState")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("completed", &self.completed.load(Ordering::SeqCst))
            .field("timed_out", &self.timed_out.load(Ordering::SeqCst))
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T> Drop for RequestState<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builder for [`RequestState`].
pub struct RequestStateBuilder<T> {
    buffer_size: usize,
    method: Cow<'static, str>,
    url: String,
    pool: Option<Arc<dyn BufferPool>>,
    timer_facility: Option<Arc<dyn TimerFacility>>,
    dispatch_context: Option<Arc<dyn DispatchContext>>,
    deliver_on_foreground: bool,
    token: CancellationToken,
    on_response_init: Option<OnResponseInit>,
    on_success: Option<OnSuccess<T>>,
    on_error: Option<OnError>,
}

impl<T> RequestStateBuilder<T> {
    /// HTTP method of the request, for diagnostics.
    pub fn method(mut self, method: impl Into<Cow<'static, str>>) -> Self {
        self.method = method.into();
        self
    }

    /// URL of the request, for diagnostics.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Use `pool` instead of the process-wide shared buffer pool.
    pub fn buffer_pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Inject the timer capability. Without one, timer operations are
    /// no-ops and the request never times out on its own.
    pub fn timer_facility(mut self, facility: Arc<dyn TimerFacility>) -> Self {
        self.timer_facility = Some(facility);
        self
    }

    /// Post callbacks to `context` instead of invoking them on the
    /// completing thread. Takes priority over foreground delivery.
    pub fn dispatch_context(mut self, context: Arc<dyn DispatchContext>) -> Self {
        self.dispatch_context = Some(context);
        self
    }

    /// Marshal callbacks onto the registered foreground context when no
    /// dispatch context is captured.
    pub fn deliver_on_foreground(mut self, deliver: bool) -> Self {
        self.deliver_on_foreground = deliver;
        self
    }

    /// Share `token` with the reader loop.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Invoke `callback` once when the transport response is attached.
    pub fn on_response_init(
        mut self,
        callback: impl FnOnce(&dyn TransportResponse) + Send + 'static,
    ) -> Self {
        self.on_response_init = Some(Box::new(callback));
        self
    }

    /// Invoke `callback` when the request completes successfully.
    pub fn on_success(mut self, callback: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Invoke `callback` when the request fails.
    pub fn on_error(
        mut self,
        callback: impl FnOnce(Option<Arc<dyn TransportResponse>>, Error) + Send + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Acquire the buffers and build the state.
    pub fn build(self) -> Arc<RequestState<T>> {
        let pool: &dyn BufferPool = match &self.pool {
            Some(pool) => &**pool,
            None => SharedBufferPool::global(),
        };
        let text = pool.acquire_text();
        let bytes = pool.acquire_bytes(self.buffer_size);

        Arc::new(RequestState {
            method: self.method,
            url: self.url,
            pool: self.pool,
            timer_facility: self.timer_facility,
            dispatch_context: self.dispatch_context,
            deliver_on_foreground: self.deliver_on_foreground,
            token: self.token,
            completed: AtomicU32::new(0),
            timed_out: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            waker: AtomicWaker::new(),
            timer: Mutex::new(None),
            buffers: Mutex::new(ResponseBuffers {
                text: Some(text),
                bytes: Some(bytes),
                scratch: vec![0; self.buffer_size].into_boxed_slice(),
                bytes_read: 0,
                content_length: None,
            }),
            handles: Mutex::new(TransportHandles {
                request: None,
                response: None,
                stream: None,
            }),
            on_response_init: Mutex::new(self.on_response_init),
            on_success: Mutex::new(self.on_success),
            on_error: Mutex::new(self.on_error),
        })
    }
}
