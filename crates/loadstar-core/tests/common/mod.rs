//! Scripted stand-in for an interface board, on the far end of a duplex pipe

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadstar_core::protocol::{ConnectionConfig, HandshakeConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// What the stub does with one request
pub enum Reply {
    /// Write these lines right away
    Lines(Vec<String>),
    /// Push these lines one per millisecond until the next request
    Stream(Vec<String>),
    /// Say nothing
    Silent,
}

/// Shorthand for a [`Reply::Lines`]
pub fn lines(lines: &[&str]) -> Reply {
    Reply::Lines(lines.iter().map(|l| l.to_string()).collect())
}

/// Running stub board
pub struct StubDevice {
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl StubDevice {
    /// Spawn a board that answers with CR+LF and prints `boot` first
    pub fn spawn<F>(boot: &[&str], responder: F) -> (DuplexStream, StubDevice)
    where
        F: FnMut(&str) -> Reply + Send + 'static,
    {
        Self::spawn_with_terminator("\r\n", boot, responder)
    }

    /// Spawn a board with an explicit response terminator
    pub fn spawn_with_terminator<F>(
        terminator: &'static str,
        boot: &[&str],
        mut responder: F,
    ) -> (DuplexStream, StubDevice)
    where
        F: FnMut(&str) -> Reply + Send + 'static,
    {
        let (host, device) = tokio::io::duplex(4096);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        let boot: Vec<String> = boot.iter().map(|l| l.to_string()).collect();

        let task = tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(device);
            for line in &boot {
                if wr.write_all(format!("{line}{terminator}").as_bytes()).await.is_err() {
                    return;
                }
            }

            let mut pending = Vec::new();
            let mut streaming: VecDeque<String> = VecDeque::new();
            let mut tick = tokio::time::interval(Duration::from_millis(1));
            let mut buf = [0u8; 256];

            loop {
                tokio::select! {
                    n = rd.read(&mut buf) => {
                        let n = match n {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        pending.extend_from_slice(&buf[..n]);
                        while let Some(pos) = pending.iter().position(|b| *b == b'\r') {
                            let raw: Vec<u8> = pending.drain(..=pos).collect();
                            let request = String::from_utf8_lossy(&raw[..pos]).to_string();
                            log.lock().unwrap().push(request.clone());
                            streaming.clear();

                            match responder(&request) {
                                Reply::Lines(lines) => {
                                    for line in lines {
                                        let out = format!("{line}{terminator}");
                                        if wr.write_all(out.as_bytes()).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Reply::Stream(lines) => streaming = lines.into(),
                                Reply::Silent => {}
                            }
                        }
                    }
                    _ = tick.tick(), if !streaming.is_empty() => {
                        if let Some(line) = streaming.pop_front() {
                            let out = format!("{line}{terminator}");
                            if wr.write_all(out.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        (host, StubDevice { requests, task })
    }

    /// Every request received so far, without terminator
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// How many times `request` was received
    pub fn count(&self, request: &str) -> usize {
        self.requests().iter().filter(|r| *r == request).count()
    }

    /// Drop the board's end of the pipe
    pub async fn hangup(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Timings short enough for tests
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        timeout_ms: 20,
        read_attempts: 5,
        retry_delay_ms: 1,
        stop_settle_ms: 10,
        handshake: HandshakeConfig {
            drain_timeout_ms: 20,
            probe_attempts: 20,
            probe_interval_ms: 1,
            max_silent_probes: 3,
            stop_stream_on_open: true,
        },
        ..ConnectionConfig::for_port("stub")
    }
}

/// Route `RUST_LOG` output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
