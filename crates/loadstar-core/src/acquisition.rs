//! Continuous acquisition
//!
//! In continuous mode (`wc`) the sensor pushes readings without being asked.
//! A background task owns the read side of the wire for the duration of the
//! session and hands every numeric frame to a caller-supplied callback.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::protocol::{ByteChannel, Command, FramedChannel, ProtocolError, Request};
use crate::values::{self, Sample, ValueCodec};

/// Throughput of a completed acquisition session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionStats {
    /// Frames that parsed as numbers
    pub sample_count: u64,
    /// Time between start and stop
    pub duration: Duration,
    /// `sample_count / duration`
    pub samples_per_second: f64,
}

impl AcquisitionStats {
    fn new(sample_count: u64, duration: Duration) -> Self {
        let secs = duration.as_secs_f64();
        let samples_per_second = if secs > 0.0 {
            sample_count as f64 / secs
        } else {
            0.0
        };
        Self {
            sample_count,
            duration,
            samples_per_second,
        }
    }
}

/// Timing of the acquisition loop and its shutdown
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionTiming {
    /// Read timeout inside the loop
    pub poll_timeout: Duration,
    /// Read timeout for the final drain
    pub drain_timeout: Duration,
    /// Pause between the stop token and cancellation
    pub stop_settle: Duration,
}

struct Session {
    started: Instant,
    sample_count: Arc<AtomicU64>,
    token: CancellationToken,
    task: JoinHandle<Result<(), ProtocolError>>,
}

/// Starts and stops continuous mode on a shared channel
pub struct AcquisitionController<S> {
    channel: Arc<FramedChannel<S>>,
    timing: AcquisitionTiming,
    session: Mutex<Option<Session>>,
    streaming: AtomicBool,
    last_stats: std::sync::Mutex<Option<AcquisitionStats>>,
}

impl<S: ByteChannel> AcquisitionController<S> {
    /// Create an idle controller
    pub fn new(channel: Arc<FramedChannel<S>>, timing: AcquisitionTiming) -> Self {
        Self {
            channel,
            timing,
            session: Mutex::new(None),
            streaming: AtomicBool::new(false),
            last_stats: std::sync::Mutex::new(None),
        }
    }

    /// Check if a session is running
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Statistics of the last completed session
    pub fn last_stats(&self) -> Option<AcquisitionStats> {
        *self
            .last_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `wc` and spawn the reader. Returns `false` if already streaming.
    pub async fn start<F, Fut>(
        &self,
        codec: ValueCodec,
        callback: F,
        span: Span,
    ) -> Result<bool, ProtocolError>
    where
        F: FnMut(Sample) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut session = self.session.lock().await;
        if session.is_some() {
            tracing::debug!("already streaming");
            return Ok(false);
        }

        let sample_count = Arc::new(AtomicU64::new(0));
        let started = Instant::now();
        self.channel.write(Command::StartStreaming).await?;

        let token = CancellationToken::new();
        let task = tokio::spawn(
            stream_loop(
                self.channel.clone(),
                codec,
                callback,
                sample_count.clone(),
                token.clone(),
                self.timing.poll_timeout,
            )
            .instrument(span),
        );

        self.streaming.store(true, Ordering::Release);
        *session = Some(Session {
            started,
            sample_count,
            token,
            task,
        });
        tracing::info!("acquisition started");
        Ok(true)
    }

    /// Send the stop token, cancel the reader and flush trailing frames.
    ///
    /// Returns `None` if no session was running.
    pub async fn stop(&self) -> Result<Option<AcquisitionStats>, ProtocolError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.take() else {
            tracing::debug!("stop requested while idle");
            return Ok(None);
        };

        let stop_sent = self.channel.write(Request::ping()).await;
        if stop_sent.is_ok() {
            // Let frames already on the wire reach the loop
            tokio::time::sleep(self.timing.stop_settle).await;
        }
        session.token.cancel();
        let loop_result = match session.task.await {
            Ok(result) => result,
            Err(e) => Err(ProtocolError::TaskFailed(e.to_string())),
        };

        let stats = AcquisitionStats::new(
            session.sample_count.load(Ordering::Acquire),
            session.started.elapsed(),
        );
        self.streaming.store(false, Ordering::Release);
        *self
            .last_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stats);

        stop_sent?;
        loop_result?;

        let drained = self.channel.drain(self.timing.drain_timeout).await?;
        tracing::info!(
            samples = stats.sample_count,
            duration_ms = stats.duration.as_millis() as u64,
            rate = stats.samples_per_second,
            drained,
            "acquisition stopped"
        );
        Ok(Some(stats))
    }
}

impl<S> Drop for AcquisitionController<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut() {
            session.token.cancel();
        }
    }
}

async fn stream_loop<S, F, Fut>(
    channel: Arc<FramedChannel<S>>,
    codec: ValueCodec,
    mut callback: F,
    sample_count: Arc<AtomicU64>,
    token: CancellationToken,
    poll_timeout: Duration,
) -> Result<(), ProtocolError>
where
    S: ByteChannel,
    F: FnMut(Sample) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = token.cancelled() => break,
            frame = channel.read_frame(poll_timeout) => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "acquisition read failed");
                return Err(e);
            }
        };
        if frame.is_empty() {
            continue;
        }

        let raw = match values::parse_float(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "dropping frame");
                continue;
            }
        };
        sample_count.fetch_add(1, Ordering::AcqRel);
        callback(codec.convert(raw)).await;
    }
    tracing::debug!("acquisition loop cancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_rate() {
        let stats = AcquisitionStats::new(500, Duration::from_millis(250));
        assert_eq!(stats.sample_count, 500);
        assert!((stats.samples_per_second - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_zero_duration() {
        let stats = AcquisitionStats::new(3, Duration::ZERO);
        assert_eq!(stats.samples_per_second, 0.0);
    }
}
