//! Handshake and resynchronization
//!
//! Interface boards print boot chatter and may still hold responses from a
//! previous session. Before any data response is trusted the channel is
//! drained, then probed with empty requests until the board answers with
//! the good-response token.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::channel::ByteChannel;
use super::commands::Request;
use super::{Connection, ProtocolError, DEFAULT_READ_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    /// Discarding buffered frames
    Draining,
    /// Sending pings until the good response comes back
    Probing,
    /// Framing confirmed
    Ready,
    /// Probe budget exhausted
    Failed,
}

/// Handshake tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Per-read timeout while draining
    pub drain_timeout_ms: u64,
    /// Maximum number of probes
    pub probe_attempts: u32,
    /// Delay between probes
    pub probe_interval_ms: u64,
    /// Consecutive unanswered probes after which nobody is assumed listening
    pub max_silent_probes: u32,
    /// Send the stop token before draining, ending a stream left running
    pub stop_stream_on_open: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 100,
            probe_attempts: DEFAULT_READ_ATTEMPTS,
            probe_interval_ms: DEFAULT_RETRY_DELAY_MS,
            max_silent_probes: 10,
            stop_stream_on_open: true,
        }
    }
}

impl HandshakeConfig {
    fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Outcome of a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Stale frames discarded while draining
    pub drained: usize,
    /// Probes sent until the good response arrived
    pub probes: u32,
}

/// One handshake run over a connection
pub(crate) struct Handshake<'a, S> {
    conn: &'a Connection<S>,
    config: &'a HandshakeConfig,
    state: HandshakeState,
}

impl<'a, S: ByteChannel> Handshake<'a, S> {
    pub(crate) fn new(conn: &'a Connection<S>, config: &'a HandshakeConfig) -> Self {
        Self {
            conn,
            config,
            state: HandshakeState::Draining,
        }
    }

    pub(crate) async fn run(mut self) -> Result<HandshakeReport, ProtocolError> {
        self.enter(HandshakeState::Draining);
        if self.config.stop_stream_on_open {
            self.conn.channel().write(Request::ping()).await?;
        }
        let drained = self
            .conn
            .channel()
            .drain(self.config.drain_timeout())
            .await?;

        self.enter(HandshakeState::Probing);
        match self.probe().await {
            Ok(probes) => {
                self.enter(HandshakeState::Ready);
                Ok(HandshakeReport { drained, probes })
            }
            Err(e) => {
                self.enter(HandshakeState::Failed);
                Err(e)
            }
        }
    }

    /// Ping until the good response comes back.
    ///
    /// Bounded by try count, not by time.
    pub(crate) async fn probe(&mut self) -> Result<u32, ProtocolError> {
        let good = &self.conn.config().firmware.good_response;
        let mut silent = 0u32;
        let mut last_response: Option<String> = None;

        for attempt in 1..=self.config.probe_attempts {
            let frame = self.conn.exchange(Request::ping()).await?;
            if frame.matches(good) {
                tracing::debug!(attempt, "probe answered");
                return Ok(attempt);
            }

            if frame.is_empty() {
                silent += 1;
                tracing::trace!(attempt, silent, "probe unanswered");
                if silent >= self.config.max_silent_probes {
                    return Err(self.not_found(attempt));
                }
            } else {
                silent = 0;
                tracing::debug!(attempt, ?frame, "unexpected probe response");
                last_response = Some(frame.text().into_owned());
            }

            tokio::time::sleep(self.config.probe_interval()).await;
        }

        let attempts = self.config.probe_attempts;
        Err(match last_response {
            Some(last_response) => ProtocolError::HandshakeFailed {
                attempts,
                last_response,
            },
            None => self.not_found(attempts),
        })
    }

    fn not_found(&self, attempts: u32) -> ProtocolError {
        ProtocolError::DeviceNotFound {
            port: self.conn.config().port_name.clone(),
            attempts,
        }
    }

    fn enter(&mut self, state: HandshakeState) {
        tracing::debug!(from = ?self.state, to = ?state, "handshake");
        self.state = state;
    }
}
