#![no_main]
//! Fuzzes the frame-boundary determinism invariant from the core spec: for
//! any byte sequence, feeding it to the dispatcher one byte at a time must
//! deliver the identical sequence of frames, in the same order, as feeding
//! the same bytes in a single chunk.
//!
//! Grounded in the teacher crate's own `fuzz/fuzz_targets/` pack, which
//! fuzzed NFS XDR round-trips the same way: drive the real parser twice over
//! two framings of the same bytes and diff the observed callback sequence.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use libfuzzer_sys::fuzz_target;
use routecore::dispatch::ErrorCode;
use routecore::protocol::FrameDescriptor;
use routecore::{FrameCallbacks, FrameDispatcher, ProxyConfig};

#[derive(Default)]
struct Observed {
    umbrella: Vec<FrameDescriptor>,
    caret: Vec<FrameDescriptor>,
    ascii_calls: usize,
}

struct Recorder(Arc<Mutex<Observed>>);

#[async_trait]
impl FrameCallbacks for Recorder {
    async fn on_umbrella_message(&mut self, frame: FrameDescriptor, _bytes: &[u8]) -> bool {
        self.0.lock().unwrap().umbrella.push(frame);
        true
    }

    async fn on_caret_message(&mut self, frame: FrameDescriptor, _bytes: &[u8]) -> bool {
        self.0.lock().unwrap().caret.push(frame);
        true
    }

    async fn on_ascii(&mut self, pending: &[u8]) -> usize {
        self.0.lock().unwrap().ascii_calls += 1;
        // No real sub-parser here either; consume everything so a fuzz
        // input classified as ascii can't grow the buffer without bound.
        pending.len()
    }

    fn parse_error(&mut self, _code: ErrorCode, _detail: &str) {}
}

async fn drive_single_chunk(data: &[u8]) -> Observed {
    let observed = Arc::new(Mutex::new(Observed::default()));
    let mut dispatcher = FrameDispatcher::new(ProxyConfig::default(), Recorder(observed.clone()));
    if let Ok(tail) = dispatcher.acquire_write_region() {
        let n = tail.len().min(data.len());
        tail[..n].copy_from_slice(&data[..n]);
        dispatcher.commit_read(n);
    }
    dispatcher.dispatch_available().await;
    Arc::try_unwrap(observed).unwrap().into_inner().unwrap()
}

async fn drive_byte_at_a_time(data: &[u8]) -> Observed {
    let observed = Arc::new(Mutex::new(Observed::default()));
    let mut dispatcher = FrameDispatcher::new(ProxyConfig::default(), Recorder(observed.clone()));
    for &byte in data {
        let acquired = dispatcher.acquire_write_region();
        match acquired {
            Ok(tail) => tail[0] = byte,
            Err(_) => break,
        }
        dispatcher.commit_read(1);
        if !dispatcher.dispatch_available().await {
            break;
        }
    }
    Arc::try_unwrap(observed).unwrap().into_inner().unwrap()
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let single = runtime.block_on(drive_single_chunk(data));
    let piecewise = runtime.block_on(drive_byte_at_a_time(data));

    assert_eq!(single.umbrella, piecewise.umbrella);
    assert_eq!(single.caret, piecewise.caret);
    assert_eq!(single.ascii_calls > 0, piecewise.ascii_calls > 0);
});
