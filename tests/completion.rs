//! End-to-end completion races against a real timer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use ebbtide_completion::{Error, RequestState, ThreadTimer, TransportRequest};

/// Transport request whose abort unblocks a pretend reader thread, the way
/// aborting a real transfer fails the in-flight read.
struct AbortableTransfer {
    aborts: AtomicUsize,
    unblock_read: mpsc::Sender<()>,
}

impl TransportRequest for AbortableTransfer {
    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.unblock_read.send(()).ok();
    }
}

#[test]
fn timeout_wins_when_no_response_arrives() {
    let time_start = Instant::now();
    let (unblock_read, read_blocked) = mpsc::channel();
    let transfer = Arc::new(AbortableTransfer {
        aborts: AtomicUsize::new(0),
        unblock_read,
    });

    let (error_tx, error_rx) = mpsc::channel();
    let state = RequestState::<String>::builder(1024)
        .method("GET")
        .url("http://localhost/slow")
        .timer_facility(Arc::new(ThreadTimer))
        .on_success(|_| panic!("success must not be delivered"))
        .on_error(move |_response, error| error_tx.send(error).unwrap())
        .build();
    let transfer_dyn: Arc<dyn TransportRequest> = transfer.clone();
    state.set_request_handle(Arc::downgrade(&transfer_dyn));
    state.start_timer(Duration::from_millis(50));

    // Pretend reader: blocked on the network until the abort fails the read.
    let reader = {
        let state = state.clone();
        thread::spawn(move || {
            read_blocked.recv_timeout(Duration::from_secs(10)).unwrap();
            state.handle_error(
                None,
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "transfer aborted",
                )),
            );
        })
    };

    futures::executor::block_on(state.finished());
    reader.join().unwrap();

    assert_eq!(transfer.aborts.load(Ordering::SeqCst), 1);
    let delivered = error_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    match delivered {
        Error::RequestTimeout(source) => assert!(matches!(*source, Error::Io(_))),
        other => panic!("expected timeout error, got {other:?}"),
    }
    let buffers = state.buffers();
    assert!(buffers.text.is_none());
    assert!(buffers.bytes.is_none());
    assert!(time_start.elapsed() < Duration::from_secs(10));
}

#[test]
fn early_success_wins_against_the_timer() {
    let (unblock_read, _read_blocked) = mpsc::channel();
    let transfer = Arc::new(AbortableTransfer {
        aborts: AtomicUsize::new(0),
        unblock_read,
    });

    let (success_tx, success_rx) = mpsc::channel();
    let state = RequestState::<String>::builder(1024)
        .timer_facility(Arc::new(ThreadTimer))
        .on_success(move |body| success_tx.send(body).unwrap())
        .on_error(|_, error| panic!("error must not be delivered: {error:?}"))
        .build();
    let transfer_dyn: Arc<dyn TransportRequest> = transfer.clone();
    state.set_request_handle(Arc::downgrade(&transfer_dyn));
    state.start_timer(Duration::from_millis(50));

    thread::sleep(Duration::from_millis(10));
    state.handle_success("response body".into());

    assert_eq!(
        success_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        "response body"
    );
    assert!(success_rx.recv_timeout(Duration::from_millis(120)).is_err());
    assert_eq!(transfer.aborts.load(Ordering::SeqCst), 0);
}
