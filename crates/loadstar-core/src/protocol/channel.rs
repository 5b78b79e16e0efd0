//! Framed byte channel
//!
//! Wraps the supplied duplex stream in a line codec. Reads and writes are
//! guarded independently so a background reader never blocks a writer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::{Frame, FrameCodec, ResponseTerminator};
use super::{commands::Request, ProtocolError};

/// Any duplex byte stream the sensor can be reached through
pub trait ByteChannel: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> ByteChannel for T {}

/// Line-framed view of a [`ByteChannel`]
pub struct FramedChannel<S> {
    writer: Mutex<FramedWrite<WriteHalf<S>, FrameCodec>>,
    reader: Mutex<FramedRead<ReadHalf<S>, FrameCodec>>,
    closed: AtomicBool,
    tx_frames: AtomicU64,
    rx_frames: AtomicU64,
}

impl<S: ByteChannel> FramedChannel<S> {
    /// Frame an already-open stream
    pub fn new(stream: S, response_terminator: ResponseTerminator) -> Self {
        let codec = FrameCodec::new(response_terminator);
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            writer: Mutex::new(FramedWrite::new(write_half, codec.clone())),
            reader: Mutex::new(FramedRead::new(read_half, codec)),
            closed: AtomicBool::new(false),
            tx_frames: 0.into(),
            rx_frames: 0.into(),
        }
    }

    /// Write one request followed by the request terminator
    pub async fn write(&self, request: impl Into<Request>) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        let request = request.into();
        let mut writer = self.writer.lock().await;
        tracing::trace!(%request, "write");
        if let Err(e) = writer.send(request).await {
            return Err(self.fail(e));
        }
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read the next response frame.
    ///
    /// Returns [`Frame::empty`] when nothing complete arrives within `timeout`.
    /// Bytes of a partially received line are kept for the next call.
    pub async fn read_frame(&self, timeout: Duration) -> Result<Frame, ProtocolError> {
        self.ensure_open()?;
        let mut reader = self.reader.lock().await;
        match tokio::time::timeout(timeout, reader.next()).await {
            Err(_elapsed) => Ok(Frame::empty()),
            Ok(None) => {
                self.closed.store(true, Ordering::Release);
                Err(ProtocolError::ChannelClosed)
            }
            Ok(Some(Err(e))) => Err(self.fail(e)),
            Ok(Some(Ok(frame))) => {
                tracing::trace!(?frame, "read");
                self.rx_frames.fetch_add(1, Ordering::Relaxed);
                Ok(frame)
            }
        }
    }

    /// Read and discard frames until one read comes back empty.
    ///
    /// Returns the number of frames thrown away.
    pub async fn drain(&self, timeout: Duration) -> Result<usize, ProtocolError> {
        let mut discarded = 0;
        loop {
            let frame = self.read_frame(timeout).await?;
            if frame.is_empty() {
                break;
            }
            tracing::debug!(?frame, "drained stale frame");
            discarded += 1;
        }
        Ok(discarded)
    }

    /// Flush and shut down the write side. The channel cannot be reused.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        match writer.close().await {
            Ok(()) => Ok(()),
            Err(e) => match hangup(e) {
                ProtocolError::ChannelClosed => Ok(()),
                other => Err(other),
            },
        }
    }

    /// Check if the channel has been closed or lost
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames written and frames read so far
    pub fn counters(&self) -> (u64, u64) {
        (
            self.tx_frames.load(Ordering::Relaxed),
            self.rx_frames.load(Ordering::Relaxed),
        )
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.is_closed() {
            Err(ProtocolError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    fn fail(&self, err: ProtocolError) -> ProtocolError {
        let err = hangup(err);
        if matches!(err, ProtocolError::ChannelClosed) {
            self.closed.store(true, Ordering::Release);
        }
        err
    }
}

fn hangup(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::IoError(e) => ProtocolError::from_io(e),
        other => other,
    }
}
