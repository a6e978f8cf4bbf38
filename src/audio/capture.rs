//! Microphone side of the pipeline: device abstraction plus the pump that
//! turns raw float buffers into PCM frames for the transmit queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::frame::{AudioFrame, DEFAULT_FRAME_SAMPLES};
use super::meter::VolumeMeter;
use super::pcm;
use crate::error::{Error, Result};
use crate::protocol::models::INPUT_SAMPLE_RATE;
use crate::sdk::transmit::TransmitSender;

/// A mono audio input.
///
/// Implementations deliver fixed-size float buffers in `[-1.0, 1.0]` over the
/// returned channel until [`CaptureDevice::close`] is called.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Acquire the device. Permission or hardware failures must map to
    /// [`Error::DeviceUnavailable`].
    async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>>;

    /// Release the device. Safe to call more than once.
    async fn close(&mut self);

    fn sample_rate(&self) -> u32;

    /// Device name for logging.
    fn name(&self) -> &str;
}

/// Level and quantized frame for one raw buffer.
#[must_use]
pub fn encode_buffer(raw: &[f32], sample_rate_hz: u32) -> (AudioFrame, f32) {
    (AudioFrame::from_float(raw, sample_rate_hz), pcm::rms(raw))
}

/// Rate and frame size of the frames handed to the transmit queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate_hz: u32,
    pub frame_samples: usize,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: INPUT_SAMPLE_RATE,
            frame_samples: DEFAULT_FRAME_SAMPLES,
        }
    }
}

/// Resamples device buffers to the outbound rate and cuts them into
/// fixed-size frames. A trailing partial frame waits for more input.
#[derive(Debug)]
struct Reframer {
    device_rate: u32,
    format: CaptureFormat,
    pending: Vec<f32>,
}

impl Reframer {
    fn new(device_rate: u32, format: CaptureFormat) -> Self {
        Self {
            device_rate,
            format,
            pending: Vec::with_capacity(format.frame_samples),
        }
    }

    fn push(&mut self, buffer: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend(pcm::resample(
            buffer,
            self.device_rate,
            self.format.sample_rate_hz,
        ));
        let size = self.format.frame_samples.max(1);
        let mut frames = Vec::new();
        while self.pending.len() >= size {
            let rest = self.pending.split_off(size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }
}

/// Owns an open capture device and the task forwarding its buffers.
pub struct CaptureEncoder {
    device: Box<dyn CaptureDevice>,
    pump: Option<JoinHandle<()>>,
    volume: VolumeMeter,
}

impl std::fmt::Debug for CaptureEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEncoder")
            .field("device", &self.device.name())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl CaptureEncoder {
    /// Open `device` and start pumping frames shaped by `format` into `sink`.
    ///
    /// # Errors
    /// Returns [`Error::DeviceUnavailable`] if the device cannot be acquired.
    pub async fn start(
        mut device: Box<dyn CaptureDevice>,
        sink: TransmitSender,
        volume: VolumeMeter,
        format: CaptureFormat,
    ) -> Result<Self> {
        let raw_rx = device.open().await.map_err(|err| match err {
            Error::DeviceUnavailable(_) => err,
            other => Error::DeviceUnavailable(other.to_string()),
        })?;
        let rate = device.sample_rate();
        tracing::info!(
            device = device.name(),
            rate,
            out_rate = format.sample_rate_hz,
            frame_samples = format.frame_samples,
            "Capture started"
        );

        let reframer = Reframer::new(rate, format);
        let pump = tokio::spawn(run_pump(raw_rx, reframer, sink, volume.clone()));
        Ok(Self {
            device,
            pump: Some(pump),
            volume,
        })
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.pump.is_some()
    }

    /// Stop the pump and release the device. Idempotent.
    pub async fn stop(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };
        pump.abort();
        self.device.close().await;
        self.volume.reset();
        tracing::info!(device = self.device.name(), "Capture stopped");
    }
}

async fn run_pump(
    mut raw_rx: mpsc::Receiver<Vec<f32>>,
    mut reframer: Reframer,
    sink: TransmitSender,
    volume: VolumeMeter,
) {
    let rate = reframer.format.sample_rate_hz;
    'pump: while let Some(buffer) = raw_rx.recv().await {
        if buffer.is_empty() {
            continue;
        }
        volume.set(pcm::rms(&buffer));
        for samples in reframer.push(&buffer) {
            let (frame, _) = encode_buffer(&samples, rate);
            if !sink.offer(frame) {
                break 'pump;
            }
        }
    }
    volume.reset();
    tracing::debug!("Capture pump finished");
}

/// Capture device fed by the host application, typically from its own audio
/// callback. Pair with the [`CaptureFeed`] returned by [`PushCaptureDevice::new`].
#[derive(Debug)]
pub struct PushCaptureDevice {
    name: String,
    sample_rate: u32,
    raw_rx: Option<mpsc::Receiver<Vec<f32>>>,
    active: Arc<AtomicBool>,
}

/// Host-side handle. Re-chunks arbitrary callback sizes into fixed frames
/// and never blocks; frames that do not fit are dropped and counted.
#[derive(Debug)]
pub struct CaptureFeed {
    frame_samples: usize,
    pending: Vec<f32>,
    tx: mpsc::Sender<Vec<f32>>,
    active: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl PushCaptureDevice {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        sample_rate: u32,
        frame_samples: usize,
        capacity: usize,
    ) -> (Self, CaptureFeed) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let active = Arc::new(AtomicBool::new(false));
        let device = Self {
            name: name.into(),
            sample_rate,
            raw_rx: Some(rx),
            active: Arc::clone(&active),
        };
        let frame_samples = frame_samples.max(1);
        let feed = CaptureFeed {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
            tx,
            active,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (device, feed)
    }

    /// 16 kHz device with the standard frame size.
    #[must_use]
    pub fn standard(name: impl Into<String>) -> (Self, CaptureFeed) {
        Self::new(name, INPUT_SAMPLE_RATE, DEFAULT_FRAME_SAMPLES, 8)
    }
}

#[async_trait]
impl CaptureDevice for PushCaptureDevice {
    async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        let rx = self
            .raw_rx
            .take()
            .ok_or_else(|| Error::DeviceUnavailable(format!("{} is already in use", self.name)))?;
        self.active.store(true, Ordering::Release);
        Ok(rx)
    }

    async fn close(&mut self) {
        self.active.store(false, Ordering::Release);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl CaptureFeed {
    /// Append mono samples. Returns `false` once the device is closed.
    pub fn push(&mut self, samples: &[f32]) -> bool {
        if !self.active.load(Ordering::Acquire) {
            self.pending.clear();
            return false;
        }
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.frame_samples {
            let frame: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            match self.tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }
        true
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::transmit::transmit_channel;

    #[test]
    fn encode_buffer_reports_level() {
        let (frame, level) = encode_buffer(&[0.5, -0.5, 0.5, -0.5], 16_000);
        assert_eq!(frame.samples, vec![16384, -16384, 16384, -16384]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn reframer_resamples_and_holds_partial_frames() {
        let mut reframer = Reframer::new(
            16_000,
            CaptureFormat {
                sample_rate_hz: 48_000,
                frame_samples: 960,
            },
        );
        assert!(reframer.push(&[0.2; 160]).is_empty());
        let frames = reframer.push(&[0.2; 160]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 960);
        assert!(reframer.pending.is_empty());
    }

    #[tokio::test]
    async fn feed_is_inactive_until_opened() {
        let (mut device, mut feed) = PushCaptureDevice::new("test", 16_000, 4, 2);
        assert!(!feed.push(&[0.0; 4]));
        let _rx = device.open().await.unwrap();
        assert!(feed.push(&[0.0; 4]));
        assert!(matches!(
            device.open().await,
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn feed_rechunks_and_drops_on_overflow() {
        let (mut device, mut feed) = PushCaptureDevice::new("test", 16_000, 4, 1);
        let mut rx = device.open().await.unwrap();
        assert!(feed.push(&[0.1; 3]));
        assert!(feed.push(&[0.1; 6]));
        assert_eq!(feed.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn encoder_forwards_frames_and_stops_once() {
        let (device, mut feed) = PushCaptureDevice::new("test", 16_000, 8, 4);
        let (tx, mut frames) = transmit_channel(4);
        let volume = VolumeMeter::new();
        let format = CaptureFormat {
            sample_rate_hz: 16_000,
            frame_samples: 8,
        };
        let mut encoder = CaptureEncoder::start(Box::new(device), tx, volume.clone(), format)
            .await
            .unwrap();

        assert!(feed.push(&[0.25; 8]));
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.samples.len(), 8);
        assert_eq!(frame.sample_rate_hz, 16_000);

        encoder.stop().await;
        encoder.stop().await;
        assert!(!encoder.is_running());
        assert!(!feed.is_active());
        assert!(volume.get().abs() < f32::EPSILON);
    }
}
