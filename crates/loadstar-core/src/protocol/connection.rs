//! Connection management
//!
//! Owns the framed channel and serializes every write-then-read exchange on
//! it. Also hosts the handshake and hands the wire over to the acquisition
//! controller while streaming.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{Instrument, Span};

use super::channel::{ByteChannel, FramedChannel};
use super::handshake::{Handshake, HandshakeConfig, HandshakeReport};
use super::{
    Frame, FirmwareProfile, ProtocolError, Request, DEFAULT_BAUD_RATE, DEFAULT_READ_ATTEMPTS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
use crate::acquisition::{AcquisitionController, AcquisitionStats, AcquisitionTiming};
use crate::values::{Sample, ValueCodec};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Channel open, handshake not run yet
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake complete, transactions allowed
    Connected,
    /// Continuous acquisition owns the wire
    Streaming,
    /// Hard failure (no device, channel lost)
    Error,
    /// Closed locally
    Closed,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name, used for logging and by [`super::open_port`]
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Timeout for a single response read in milliseconds
    pub timeout_ms: u64,
    /// Attempts for single-shot requests before giving up
    pub read_attempts: u32,
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Pause between the stream stop token and cancelling the reader
    pub stop_settle_ms: u64,
    /// Discard already-buffered frames before each request
    pub discard_stale: bool,
    /// Re-run the probe phase before each request
    pub probe_before_request: bool,
    /// Handshake tuning
    pub handshake: HandshakeConfig,
    /// Firmware generation constants
    pub firmware: FirmwareProfile,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            read_attempts: DEFAULT_READ_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            stop_settle_ms: 50,
            discard_stale: true,
            probe_before_request: false,
            handshake: HandshakeConfig::default(),
            firmware: FirmwareProfile::default(),
        }
    }
}

impl ConnectionConfig {
    /// Config for the given port with defaults everywhere else
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ProtocolError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay between attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Pause after the stream stop token
    pub fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.stop_settle_ms)
    }
}

/// Sensor connection over a supplied byte channel
pub struct Connection<S> {
    /// Framed wire, shared with the acquisition task
    channel: Arc<FramedChannel<S>>,
    /// Connection configuration
    config: ConnectionConfig,
    /// Held for a whole write-then-read exchange
    transaction: Mutex<()>,
    /// Current connection state
    state: std::sync::Mutex<ConnectionState>,
    /// Continuous mode controller
    acquisition: AcquisitionController<S>,
    /// Per-session tracing span
    span: Span,
}

impl<S: ByteChannel> Connection<S> {
    /// Wrap an already-open stream. Run [`Connection::handshake`] before
    /// trusting any response.
    pub fn new(stream: S, config: ConnectionConfig) -> Self {
        let channel = Arc::new(FramedChannel::new(
            stream,
            config.firmware.response_terminator,
        ));
        let acquisition = AcquisitionController::new(
            channel.clone(),
            AcquisitionTiming {
                poll_timeout: config.timeout(),
                drain_timeout: Duration::from_millis(config.handshake.drain_timeout_ms),
                stop_settle: config.stop_settle(),
            },
        );
        let span = tracing::info_span!("loadstar_session", port = %config.port_name);

        Self {
            channel,
            config,
            transaction: Mutex::new(()),
            state: std::sync::Mutex::new(ConnectionState::Disconnected),
            acquisition,
            span,
        }
    }

    /// Replace the session span, e.g. to nest it under the caller's span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Session span
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests written and frames read so far
    pub fn counters(&self) -> (u64, u64) {
        self.channel.counters()
    }

    /// Check if continuous acquisition owns the wire
    pub fn is_streaming(&self) -> bool {
        self.acquisition.is_streaming()
    }

    /// Statistics of the last completed acquisition session
    pub fn last_stats(&self) -> Option<AcquisitionStats> {
        self.acquisition.last_stats()
    }

    pub(crate) fn channel(&self) -> &FramedChannel<S> {
        &self.channel
    }

    /// Drain stale frames, then probe until the sensor answers.
    pub async fn handshake(&self) -> Result<HandshakeReport, ProtocolError> {
        async {
            let _guard = self.transaction.lock().await;
            if self.acquisition.is_streaming() {
                return Err(ProtocolError::Streaming);
            }
            self.set_state(ConnectionState::Connecting);

            let result = Handshake::new(self, &self.config.handshake).run().await;
            match &result {
                Ok(report) => {
                    tracing::info!(
                        drained = report.drained,
                        probes = report.probes,
                        "sensor ready"
                    );
                    self.set_state(ConnectionState::Connected);
                }
                Err(e) => {
                    tracing::error!(error = %e, "handshake failed");
                    self.set_state(ConnectionState::Error);
                }
            }
            result
        }
        .instrument(self.span.clone())
        .await
    }

    /// Probe again without draining; returns the number of probes used
    pub async fn resync(&self) -> Result<u32, ProtocolError> {
        async {
            let _guard = self.transaction.lock().await;
            if self.acquisition.is_streaming() {
                return Err(ProtocolError::Streaming);
            }
            let result = Handshake::new(self, &self.config.handshake).probe().await;
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Write one request and read its response as one atomic unit.
    ///
    /// Returns the raw frame; an empty frame means the sensor did not answer
    /// within the read timeout.
    pub async fn transact(&self, request: impl Into<Request>) -> Result<Frame, ProtocolError> {
        let request = request.into();
        async {
            let _guard = self.transaction.lock().await;
            if self.acquisition.is_streaming() {
                return Err(ProtocolError::Streaming);
            }
            if self.config.probe_before_request {
                let probe = Handshake::new(self, &self.config.handshake).probe().await;
                self.observe(probe)?;
            }
            let result = self.exchange(request).await;
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Write one request and collect response lines until the sensor goes
    /// quiet or sends the good-response token.
    pub async fn transact_lines(
        &self,
        request: impl Into<Request>,
    ) -> Result<Vec<String>, ProtocolError> {
        let request = request.into();
        async {
            let _guard = self.transaction.lock().await;
            if self.acquisition.is_streaming() {
                return Err(ProtocolError::Streaming);
            }
            let good = &self.config.firmware.good_response;
            let mut lines = Vec::new();
            let mut frame = self.observe(self.exchange(request).await)?;
            while !frame.is_empty() && !frame.matches(good) {
                lines.push(frame.text().into_owned());
                if lines.len() >= self.config.read_attempts as usize {
                    tracing::warn!(lines = lines.len(), "multi-line response truncated");
                    break;
                }
                frame = self.observe(self.channel.read_frame(self.config.timeout()).await)?;
            }
            Ok(lines)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Switch the sensor into continuous mode and feed every numeric frame,
    /// converted by `codec`, to `callback`.
    ///
    /// Returns `false` without touching the wire if already streaming.
    pub async fn start_streaming<F, Fut>(
        &self,
        codec: ValueCodec,
        callback: F,
    ) -> Result<bool, ProtocolError>
    where
        F: FnMut(Sample) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        async {
            let _guard = self.transaction.lock().await;
            let result = self
                .acquisition
                .start(codec, callback, self.span.clone())
                .await;
            let started = self.observe(result)?;
            if started {
                self.set_state(ConnectionState::Streaming);
            }
            Ok(started)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Leave continuous mode. Returns `None` if not streaming.
    pub async fn stop_streaming(&self) -> Result<Option<AcquisitionStats>, ProtocolError> {
        async {
            let _guard = self.transaction.lock().await;
            let result = self.acquisition.stop().await;
            if self.state() == ConnectionState::Streaming {
                self.set_state(ConnectionState::Connected);
            }
            self.observe(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Stop any acquisition and close the channel
    pub async fn close(&self) -> Result<(), ProtocolError> {
        if self.acquisition.is_streaming() {
            if let Err(e) = self.stop_streaming().await {
                tracing::warn!(parent: &self.span, error = %e, "stop on close failed");
            }
        }
        let _guard = self.transaction.lock().await;
        self.set_state(ConnectionState::Closed);
        self.channel.close().await
    }

    /// Unlocked write-then-read. Callers hold the transaction lock.
    pub(crate) async fn exchange(&self, request: Request) -> Result<Frame, ProtocolError> {
        if self.config.discard_stale {
            let stale = self.channel.drain(Duration::ZERO).await?;
            if stale > 0 {
                tracing::debug!(stale, "discarded stale frames before request");
            }
        }
        tokio::task::yield_now().await;
        self.channel.write(request).await?;
        self.channel.read_frame(self.config.timeout()).await
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != ConnectionState::Closed {
            *current = state;
        }
    }

    fn observe<T>(&self, result: Result<T, ProtocolError>) -> Result<T, ProtocolError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.set_state(ConnectionState::Error);
            }
        }
        result
    }
}
