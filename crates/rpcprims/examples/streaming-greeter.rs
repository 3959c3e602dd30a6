//! Streaming greeter — one call, several names out, several greetings back.
//!
//! Run with:
//!   cargo run --example streaming-greeter
//!
//! The loopback transport stands in for a real wire: the "server" runs in
//! this process, one thread per stream.

use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;
use rpcprims::call::{Call, MessageConsumer, SequenceProducer};
use rpcprims::logging::{init_logging, LogFormat, LogLevel};
use rpcprims::metadata::{HeaderMap, TrailerMap};
use rpcprims::status::RpcError;
use rpcprims::transport::{Destination, LoopbackTransport, ServerStream};

struct PrintingConsumer {
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl MessageConsumer for PrintingConsumer {
    fn on_message(&mut self, payload: Bytes) {
        println!("<- {}", String::from_utf8_lossy(&payload));
    }

    fn on_complete(&mut self, outcome: Result<(), RpcError>) {
        match outcome {
            Ok(()) => println!("call completed"),
            Err(e) => println!("call failed: {e}"),
        }
        let (flag, cond) = &*self.done;
        *flag.lock().unwrap() = true;
        cond.notify_all();
    }
}

fn main() {
    init_logging(LogFormat::Text, LogLevel::Debug);

    let transport = Arc::new(LoopbackTransport::new(|mut server: ServerStream| {
        let mut headers = HeaderMap::new();
        headers.set("greeter-version", "1");
        server.send_headers(headers);

        while let Some(name) = server.recv_message() {
            let greeting = format!("hello, {}!", String::from_utf8_lossy(&name));
            server.send_message(greeting.into_bytes());
        }
        server.finish(TrailerMap::new());
    }));

    let call = Call::new(
        transport,
        Destination::new("greeter.local", "/greeter/SayHello"),
        Box::new(SequenceProducer::new(["ada", "grace", "barbara"])),
    );
    call.request_headers().set("x-caller", "streaming-greeter-example");

    let done = Arc::new((Mutex::new(false), Condvar::new()));
    call.start(PrintingConsumer {
        done: Arc::clone(&done),
    });

    let (flag, cond) = &*done;
    let mut finished = flag.lock().unwrap();
    while !*finished {
        finished = cond.wait(finished).unwrap();
    }
}
