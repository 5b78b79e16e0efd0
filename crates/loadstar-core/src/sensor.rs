//! Device facade
//!
//! Named operations of a Loadstar interface board on top of a
//! [`Connection`]. Single-shot reads are retried a bounded number of times
//! and come back as `None` when the board never gives a usable answer;
//! channel loss, a missing device and an active stream are errors.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::acquisition::AcquisitionStats;
use crate::protocol::{
    ByteChannel, Command, Connection, ConnectionConfig, Frame, HandshakeReport, ProtocolError,
    Request,
};
use crate::units::Unit;
use crate::values::{self, Sample, ScaleFactor, ValueCodec};

/// Identity and averaging settings of a connected board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Port the board was opened on
    pub port: String,
    /// Model name, e.g. `DI-1000U`
    pub model: Option<String>,
    /// Serial id
    pub id: Option<String>,
    /// Unit token the board reports in
    pub native_units: Option<String>,
    /// Full-scale load, calibrated like any other reading
    pub load_capacity: Option<Sample>,
    /// Averaging window in samples
    pub averaging_window: Option<u32>,
    /// Averaging threshold in percent of capacity
    pub averaging_threshold: Option<u32>,
}

/// A Loadstar Sensors interface board
pub struct LoadstarSensor<S> {
    connection: Connection<S>,
    codec: ValueCodec,
}

impl<S: ByteChannel> LoadstarSensor<S> {
    /// Wrap a stream without talking to the board yet
    pub fn new(stream: S, config: ConnectionConfig) -> Self {
        Self::from_connection(Connection::new(stream, config))
    }

    /// Wrap an existing connection
    pub fn from_connection(connection: Connection<S>) -> Self {
        Self {
            connection,
            codec: ValueCodec::default(),
        }
    }

    /// Wrap a stream and run the handshake
    pub async fn connect(stream: S, config: ConnectionConfig) -> Result<Self, ProtocolError> {
        let sensor = Self::new(stream, config);
        sensor.handshake().await?;
        Ok(sensor)
    }

    /// Drain and probe until the board answers
    pub async fn handshake(&self) -> Result<HandshakeReport, ProtocolError> {
        self.connection.handshake().await
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection<S> {
        &self.connection
    }

    /// Calibration shared with every reading, including streamed ones
    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Port name from the configuration
    pub fn port(&self) -> &str {
        &self.connection.config().port_name
    }

    /// Calibrated load reading (`w`)
    pub async fn sensor_value(&self) -> Result<Option<Sample>, ProtocolError> {
        let codec = self.codec.clone();
        self.query(Command::Weight, move |frame| codec.decode(frame))
            .await
    }

    /// Raw ADC counts (`r`), never calibrated
    pub async fn adc_value(&self) -> Result<Option<f64>, ProtocolError> {
        self.query(Command::RawAdc, values::parse_float).await
    }

    /// Model name
    pub async fn model(&self) -> Result<Option<String>, ProtocolError> {
        self.query(Command::Model, text).await
    }

    /// Serial id
    pub async fn id(&self) -> Result<Option<String>, ProtocolError> {
        self.query(Command::Id, text).await
    }

    /// Unit token the board reports in, verbatim
    pub async fn native_units(&self) -> Result<Option<String>, ProtocolError> {
        self.query(Command::NativeUnit, text).await
    }

    /// Native unit, if the token is one we know
    pub async fn native_unit(&self) -> Result<Option<Unit>, ProtocolError> {
        Ok(self
            .native_units()
            .await?
            .and_then(|token| Unit::from_token(&token)))
    }

    /// Full-scale load (`lc`), calibrated
    pub async fn load_capacity(&self) -> Result<Option<Sample>, ProtocolError> {
        let codec = self.codec.clone();
        self.query(Command::LoadCapacity, move |frame| codec.decode(frame))
            .await
    }

    /// Averaging window in samples (`css`)
    pub async fn averaging_window(&self) -> Result<Option<u32>, ProtocolError> {
        self.query(Command::AveragingWindow, |frame| {
            let samples = values::parse_integer(frame)?;
            u32::try_from(samples)
                .map_err(|_| ProtocolError::InvalidResponse(frame.text().into_owned()))
        })
        .await
    }

    /// Set the averaging window. Out-of-range values are clamped to
    /// 1..=1024; returns the value sent.
    pub async fn set_averaging_window(&self, samples: u32) -> Result<u32, ProtocolError> {
        let samples = values::clamp_averaging_window(samples);
        let request = self
            .connection
            .config()
            .firmware
            .set_averaging_window(samples);
        self.send(request).await?;
        Ok(samples)
    }

    /// Averaging threshold in percent of capacity (`cla`)
    ///
    /// Rounded to the nearest percent and clamped to 1..=100, where the legacy
    /// vendor tool truncated and did not clamp.
    pub async fn averaging_threshold(&self) -> Result<Option<u32>, ProtocolError> {
        let firmware = self.connection.config().firmware.clone();
        self.query(Command::AveragingThreshold, move |frame| {
            let reported = values::parse_threshold_response(frame)?;
            Ok(threshold_percent(firmware.threshold_to_percent(reported)))
        })
        .await
    }

    /// Set the averaging threshold. Out-of-range values are clamped to
    /// 1..=100 and sent as a fraction; returns the percentage sent.
    /// 100 % goes out as `cla 1`, not `cla 1.0`.
    pub async fn set_averaging_threshold(&self, percent: u32) -> Result<u32, ProtocolError> {
        let percent = values::clamp_averaging_threshold(percent);
        let request = self
            .connection
            .config()
            .firmware
            .set_averaging_threshold(threshold_fraction(percent));
        self.send(request).await?;
        Ok(percent)
    }

    /// Zero the current reading. Returns `false` if the board never
    /// acknowledged.
    pub async fn tare(&self) -> Result<bool, ProtocolError> {
        let firmware = self.connection.config().firmware.clone();
        let acked = self
            .query(Command::Tare, move |frame| {
                if firmware.is_tare_ok(&frame.text()) {
                    Ok(())
                } else {
                    Err(ProtocolError::InvalidResponse(frame.text().into_owned()))
                }
            })
            .await?;
        Ok(acked.is_some())
    }

    /// Multi-line settings dump
    pub async fn settings(&self) -> Result<Vec<String>, ProtocolError> {
        self.connection.transact_lines(Command::Settings).await
    }

    /// Query identity and averaging settings in one go
    pub async fn device_info(&self) -> Result<DeviceInfo, ProtocolError> {
        Ok(DeviceInfo {
            port: self.port().to_string(),
            model: self.model().await?,
            id: self.id().await?,
            native_units: self.native_units().await?,
            load_capacity: self.load_capacity().await?,
            averaging_window: self.averaging_window().await?,
            averaging_threshold: self.averaging_threshold().await?,
        })
    }

    /// Switch to simple-scale mode
    pub fn set_scale_factor(&self, factor: ScaleFactor) {
        self.codec.set_scale_factor(factor);
    }

    /// Switch to unit-system mode, e.g. `("lb", "kg")`
    pub fn set_output_unit(&self, native: &str, output: &str) -> Result<(), ProtocolError> {
        self.codec.set_output_unit(native, output)
    }

    /// Start continuous acquisition. Returns `false` if already streaming.
    pub async fn start_streaming<F, Fut>(&self, callback: F) -> Result<bool, ProtocolError>
    where
        F: FnMut(Sample) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connection
            .start_streaming(self.codec.clone(), callback)
            .await
    }

    /// Stop continuous acquisition. Returns `None` if not streaming.
    pub async fn stop_streaming(&self) -> Result<Option<AcquisitionStats>, ProtocolError> {
        self.connection.stop_streaming().await
    }

    /// Stream for `duration` and return everything collected
    pub async fn sample_for_duration(
        &self,
        duration: Duration,
    ) -> Result<(Vec<Sample>, AcquisitionStats), ProtocolError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let started = self
            .start_streaming(move |sample| {
                let tx = tx.clone();
                async move {
                    // Receiver outlives the session
                    let _ = tx.send(sample);
                }
            })
            .await?;
        if !started {
            return Err(ProtocolError::Streaming);
        }

        tokio::time::sleep(duration).await;
        let stats = self.stop_streaming().await?.ok_or_else(|| {
            ProtocolError::TaskFailed("acquisition session vanished before stop".to_string())
        })?;

        let mut samples = Vec::with_capacity(stats.sample_count as usize);
        while let Ok(sample) = rx.try_recv() {
            samples.push(sample);
        }
        Ok((samples, stats))
    }

    /// Stop any acquisition and close the channel
    pub async fn close(&self) -> Result<(), ProtocolError> {
        self.connection.close().await
    }

    /// Transact until `parse` accepts a response or attempts run out
    async fn query<T>(
        &self,
        request: impl Into<Request>,
        parse: impl Fn(&Frame) -> Result<T, ProtocolError>,
    ) -> Result<Option<T>, ProtocolError> {
        let request = request.into();
        let config = self.connection.config();
        let attempts = config.read_attempts.max(1);

        async {
            for attempt in 1..=attempts {
                let frame = self.connection.transact(request.clone()).await?;
                if frame.is_empty() {
                    tracing::debug!(%request, attempt, "no response");
                } else {
                    match parse(&frame) {
                        Ok(value) => return Ok(Some(value)),
                        Err(e) => {
                            tracing::debug!(%request, attempt, error = %e, "unusable response")
                        }
                    }
                }
                tokio::time::sleep(config.retry_delay()).await;
            }
            tracing::warn!(%request, attempts, "no usable response");
            Ok(None)
        }
        .instrument(self.connection.span().clone())
        .await
    }

    /// Write a setting; the board's echo, if any, is only logged
    async fn send(&self, request: Request) -> Result<(), ProtocolError> {
        let frame = self.connection.transact(request.clone()).await?;
        tracing::debug!(parent: self.connection.span(), %request, ?frame, "setting sent");
        Ok(())
    }
}

fn text(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(values::parse_text(frame))
}

/// Fraction of capacity sent for a threshold percentage
fn threshold_fraction(percent: u32) -> f64 {
    f64::from(percent) / f64::from(values::AVERAGING_THRESHOLD_MAX)
}

/// Nearest whole percent, within range
fn threshold_percent(percent: f64) -> u32 {
    let rounded = percent.round().clamp(0.0, f64::from(u32::MAX)) as u32;
    values::clamp_averaging_threshold(rounded)
}
