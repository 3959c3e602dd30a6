//! End-to-end call flows over the loopback transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rpcprims_call::{
    Call, CallOutcome, CallState, MessageConsumer, MessageProducer, SequenceProducer,
};
use rpcprims_metadata::{HeaderMap, TrailerMap};
use rpcprims_status::{ErrorKind, RpcError, TRAILERS_KEY};
use rpcprims_transport::{Destination, LoopbackTransport, ServerStream, StreamStatus};

#[derive(Default)]
struct ConsumerLog {
    messages: Mutex<Vec<Vec<u8>>>,
    outcome: Mutex<Option<Result<(), RpcError>>>,
}

impl ConsumerLog {
    fn messages(&self) -> Vec<Vec<u8>> {
        self.messages.lock().unwrap().clone()
    }

    fn wait_outcome(&self) -> Result<(), RpcError> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(outcome) = self.outcome.lock().unwrap().clone() {
                return outcome;
            }
            assert!(Instant::now() < deadline, "no terminal completion arrived");
            thread::sleep(Duration::from_millis(2));
        }
    }
}

struct TestConsumer {
    log: Arc<ConsumerLog>,
}

impl MessageConsumer for TestConsumer {
    fn on_message(&mut self, payload: Bytes) {
        self.log.messages.lock().unwrap().push(payload.to_vec());
    }

    fn on_complete(&mut self, outcome: Result<(), RpcError>) {
        *self.log.outcome.lock().unwrap() = Some(outcome);
    }
}

fn dest() -> Destination {
    Destination::new("loopback.test", "/test/Stream")
}

fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn clean_streaming_call() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_by_server = Arc::clone(&received);
    let transport = LoopbackTransport::new(move |mut server: ServerStream| {
        assert_eq!(
            server.request_headers().get_text("x-request-id"),
            Some("42")
        );
        assert!(server.request_headers().is_frozen());

        // Drain the half-closed request side first.
        let mut got = Vec::new();
        while let Some(payload) = server.recv_message() {
            got.push(payload.to_vec());
        }
        *received_by_server.lock().unwrap() = got;

        let mut headers = HeaderMap::new();
        headers.set("status", "ok");
        server.send_headers(headers);
        server.send_message("A");
        server.send_message("B");
        let mut trailers = TrailerMap::new();
        trailers.set("status", "ok");
        server.finish(trailers);
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::new(["ping-1", "ping-2"])),
    );
    call.request_headers().set("X-Request-Id", "42");

    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    assert!(log.wait_outcome().is_ok());
    assert_eq!(log.messages(), [b"A".to_vec(), b"B".to_vec()]);
    assert_eq!(call.state(), CallState::Finished(CallOutcome::Success));
    assert!(call.error().is_none());

    let headers = call.response_headers().expect("headers set");
    assert_eq!(headers.get_text("status"), Some("ok"));
    let trailers = call.response_trailers().expect("trailers set");
    assert_eq!(trailers.get_text("status"), Some("ok"));

    assert_eq!(
        *received.lock().unwrap(),
        vec![b"ping-1".to_vec(), b"ping-2".to_vec()]
    );
}

#[test]
fn metadata_is_sequenced_around_messages() {
    struct Probe {
        call: Call,
        log: Arc<ConsumerLog>,
        violations: Arc<Mutex<Vec<String>>>,
    }

    impl MessageConsumer for Probe {
        fn on_message(&mut self, payload: Bytes) {
            if self.call.response_headers().is_none() {
                self.violations
                    .lock()
                    .unwrap()
                    .push("message before headers".into());
            }
            if self.call.response_trailers().is_some() {
                self.violations
                    .lock()
                    .unwrap()
                    .push("trailers before last message".into());
            }
            self.log.messages.lock().unwrap().push(payload.to_vec());
        }

        fn on_complete(&mut self, outcome: Result<(), RpcError>) {
            if self.call.response_trailers().is_none() {
                self.violations
                    .lock()
                    .unwrap()
                    .push("terminal before trailers".into());
            }
            *self.log.outcome.lock().unwrap() = Some(outcome);
        }
    }

    let transport = LoopbackTransport::new(|server: ServerStream| {
        server.send_headers(HeaderMap::new());
        server.send_message("m1");
        server.send_message("m2");
        server.send_message("m3");
        server.finish(TrailerMap::new());
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::empty()),
    );
    let log = Arc::new(ConsumerLog::default());
    let violations = Arc::new(Mutex::new(Vec::new()));
    call.start(Probe {
        call: call.clone(),
        log: Arc::clone(&log),
        violations: Arc::clone(&violations),
    });

    assert!(log.wait_outcome().is_ok());
    assert_eq!(
        log.messages(),
        [b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()]
    );
    assert_eq!(*violations.lock().unwrap(), Vec::<String>::new());
}

#[test]
fn duplicate_response_headers_keep_the_first() {
    let transport = LoopbackTransport::new(|server: ServerStream| {
        let mut first = HeaderMap::new();
        first.set("attempt", "first");
        server.send_headers(first);
        let mut second = HeaderMap::new();
        second.set("attempt", "second");
        server.send_headers(second);
        server.send_message("m");
        server.finish(TrailerMap::new());
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::empty()),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    assert!(log.wait_outcome().is_ok());
    assert_eq!(log.messages(), [b"m".to_vec()]);
    assert_eq!(
        call.response_headers().unwrap().get_text("attempt"),
        Some("first")
    );
}

#[test]
fn non_success_status_maps_to_error_with_trailers() {
    let transport = LoopbackTransport::new(|server: ServerStream| {
        server.send_headers(HeaderMap::new());
        server.send_message("partial");
        let mut trailers = TrailerMap::new();
        trailers.set("retryable", "false");
        server.finish_with_status(trailers, StreamStatus::error(5, "missing"));
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::empty()),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    let err = log.wait_outcome().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.message(), Some("missing"));
    let trailers = err.trailers().expect("trailers attached");
    assert_eq!(trailers.get_text("retryable"), Some("false"));
    assert!(err.headers().is_some());
    assert_eq!(err.attachment(TRAILERS_KEY), err.trailers());

    // Partial delivery is not retracted.
    assert_eq!(log.messages(), [b"partial".to_vec()]);
    assert_eq!(call.state(), CallState::Finished(CallOutcome::Error));
    assert_eq!(call.error().unwrap().kind(), ErrorKind::NotFound);
    assert!(call.response_trailers().is_some());
}

#[test]
fn transport_abort_after_headers() {
    let transport = LoopbackTransport::new(|server: ServerStream| {
        let mut headers = HeaderMap::new();
        headers.set("server", "flaky");
        server.send_headers(headers);
        server.abort(RpcError::new(ErrorKind::NotFound).with_message("gone"));
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::empty()),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    let err = log.wait_outcome().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    // Headers observed before the abort ride along on the error.
    assert_eq!(
        err.headers().expect("headers attached").get_text("server"),
        Some("flaky")
    );
    assert!(log.messages().is_empty());
    assert_eq!(call.state(), CallState::Finished(CallOutcome::Error));
}

#[test]
fn cancel_before_start_never_opens_a_stream() {
    let opened = Arc::new(AtomicBool::new(false));
    let opened_by_server = Arc::clone(&opened);
    let transport = LoopbackTransport::new(move |_server: ServerStream| {
        opened_by_server.store(true, Ordering::SeqCst);
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::new(["never-sent"])),
    );
    call.cancel();
    assert_eq!(call.state(), CallState::Finished(CallOutcome::Cancelled));

    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    let err = log.wait_outcome().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(log.messages().is_empty());
    assert!(!opened.load(Ordering::SeqCst), "stream was opened");
}

#[test]
fn cancel_after_completion_is_a_noop() {
    let transport = LoopbackTransport::new(|server: ServerStream| {
        server.send_headers(HeaderMap::new());
        let mut trailers = TrailerMap::new();
        trailers.set("outcome", "done");
        server.finish(trailers);
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::empty()),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });
    assert!(log.wait_outcome().is_ok());

    call.cancel();
    call.cancel();
    assert_eq!(call.state(), CallState::Finished(CallOutcome::Success));
    assert!(call.error().is_none());
    assert_eq!(
        call.response_trailers().unwrap().get_text("outcome"),
        Some("done")
    );
}

#[test]
fn cancel_during_delivery_stops_the_stream() {
    struct CancelOnFirst {
        call: Call,
        log: Arc<ConsumerLog>,
    }

    impl MessageConsumer for CancelOnFirst {
        fn on_message(&mut self, payload: Bytes) {
            self.log.messages.lock().unwrap().push(payload.to_vec());
            self.call.cancel();
        }

        fn on_complete(&mut self, outcome: Result<(), RpcError>) {
            *self.log.outcome.lock().unwrap() = Some(outcome);
        }
    }

    let transport = LoopbackTransport::new(|server: ServerStream| {
        server.send_headers(HeaderMap::new());
        server.send_message("first");
        // Dropped by the cancelled call.
        server.send_message("second");
        server.finish(TrailerMap::new());
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::empty()),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(CancelOnFirst {
        call: call.clone(),
        log: Arc::clone(&log),
    });

    let err = log.wait_outcome().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(log.messages(), [b"first".to_vec()]);
    assert_eq!(call.state(), CallState::Finished(CallOutcome::Cancelled));
}

#[test]
fn producer_is_pulled_one_capacity_grant_at_a_time() {
    struct CountingProducer {
        items: VecDeque<Bytes>,
        pulls: Arc<AtomicUsize>,
    }

    impl MessageProducer for CountingProducer {
        fn next_message(&mut self) -> Result<Option<Bytes>, RpcError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.pop_front())
        }
    }

    let gate = Arc::new(AtomicBool::new(false));
    let gate_for_server = Arc::clone(&gate);
    let transport = LoopbackTransport::new(move |mut server: ServerStream| {
        // Consume one message, withhold further capacity until released.
        let first = server.recv_message();
        assert!(first.is_some());
        while !gate_for_server.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        while server.recv_message().is_some() {}
        server.send_headers(HeaderMap::new());
        server.finish(TrailerMap::new());
    });

    let pulls = Arc::new(AtomicUsize::new(0));
    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(CountingProducer {
            items: ["m1", "m2", "m3"].into_iter().map(Bytes::from).collect(),
            pulls: Arc::clone(&pulls),
        }),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    // m1 was pulled and sent; its capacity grant released the pull of m2.
    // m2's grant is withheld, so m3 must not be pulled yet.
    wait_until("second pull", || pulls.load(Ordering::SeqCst) == 2);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        pulls.load(Ordering::SeqCst),
        2,
        "producer was pulled past the withheld capacity grant"
    );

    gate.store(true, Ordering::SeqCst);
    assert!(log.wait_outcome().is_ok());
    // Three messages plus the end-of-stream pull.
    assert_eq!(pulls.load(Ordering::SeqCst), 4);
}

#[test]
fn producer_failure_fails_the_call_and_resets_the_stream() {
    struct FailingProducer {
        sent_one: bool,
    }

    impl MessageProducer for FailingProducer {
        fn next_message(&mut self) -> Result<Option<Bytes>, RpcError> {
            if self.sent_one {
                Err(RpcError::new(ErrorKind::DataLoss).with_message("upstream broke"))
            } else {
                self.sent_one = true;
                Ok(Some(Bytes::from_static(b"only")))
            }
        }
    }

    let server_saw_reset = Arc::new(AtomicBool::new(false));
    let reset_flag = Arc::clone(&server_saw_reset);
    let transport = LoopbackTransport::new(move |mut server: ServerStream| {
        while server.recv_message().is_some() {}
        if server.is_cancelled() {
            reset_flag.store(true, Ordering::SeqCst);
        }
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(FailingProducer { sent_one: false }),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    let err = log.wait_outcome().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataLoss);
    assert_eq!(err.message(), Some("upstream broke"));
    assert_eq!(call.state(), CallState::Finished(CallOutcome::Error));

    wait_until("server observing the reset", || {
        server_saw_reset.load(Ordering::SeqCst)
    });
}

#[test]
fn empty_request_stream_half_closes_immediately() {
    let transport = LoopbackTransport::new(|mut server: ServerStream| {
        // No request messages: the drain returns None straight away.
        assert!(server.recv_message().is_none());
        assert!(!server.is_cancelled());
        server.send_headers(HeaderMap::new());
        server.send_message("reply");
        server.finish(TrailerMap::new());
    });

    let call = Call::new(
        Arc::new(transport),
        dest(),
        Box::new(SequenceProducer::empty()),
    );
    let log = Arc::new(ConsumerLog::default());
    call.start(TestConsumer { log: Arc::clone(&log) });

    assert!(log.wait_outcome().is_ok());
    assert_eq!(log.messages(), [b"reply".to_vec()]);
}
