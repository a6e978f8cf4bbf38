//! System microphone and speaker through cpal.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread and is
//! torn down by dropping a stop channel.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::capture::{CaptureDevice, PushCaptureDevice};
use super::frame::DEFAULT_FRAME_SAMPLES;
use super::pcm::resample;
use super::playback::{PlaybackSink, PlaybackUnit};
use crate::error::{Error, Result};
use crate::protocol::models::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

/// Average interleaved channels down to mono.
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Default (or named) system microphone, delivered as mono frames at the
/// configured rate (16 kHz unless changed with [`CpalCaptureDevice::with_format`]).
pub struct CpalCaptureDevice {
    preferred: Option<String>,
    name: String,
    sample_rate: u32,
    frame_samples: usize,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CpalCaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalCaptureDevice")
            .field("name", &self.name)
            .field("sample_rate", &self.sample_rate)
            .field("open", &self.stop_tx.is_some())
            .finish_non_exhaustive()
    }
}

impl CpalCaptureDevice {
    #[must_use]
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            name: preferred.clone().unwrap_or_else(|| "default input".to_string()),
            preferred,
            sample_rate: INPUT_SAMPLE_RATE,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            stop_tx: None,
            thread: None,
        }
    }

    /// Deliver frames of `frame_samples` at `sample_rate` instead of the defaults.
    #[must_use]
    pub const fn with_format(mut self, sample_rate: u32, frame_samples: usize) -> Self {
        self.sample_rate = sample_rate;
        self.frame_samples = frame_samples;
        self
    }

    /// Names of the available input devices.
    ///
    /// # Errors
    /// Returns [`Error::DeviceUnavailable`] if the host cannot enumerate inputs.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn find_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.preferred {
            Some(name) => host
                .input_devices()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| &n == name))
                .ok_or_else(|| Error::DeviceUnavailable(format!("input device '{name}' not found"))),
            None => host
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no default input device".to_string())),
        }
    }
}

#[async_trait]
impl CaptureDevice for CpalCaptureDevice {
    async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.stop_tx.is_some() {
            return Err(Error::DeviceUnavailable(format!("{} is already open", self.name)));
        }
        let device = self.find_device()?;
        if let Ok(name) = device.name() {
            self.name = name;
        }
        let target_rate = self.sample_rate;
        let (mut push_device, mut feed) =
            PushCaptureDevice::new(self.name.clone(), target_rate, self.frame_samples, 8);
        let rx = push_device.open().await?;

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let thread = std::thread::spawn(move || {
            let stream = (|| -> Result<cpal::Stream> {
                let supported = device
                    .default_input_config()
                    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
                let format = supported.sample_format();
                let config: StreamConfig = supported.into();
                let rate = config.sample_rate.0;
                let channels = usize::from(config.channels.max(1));
                let err_fn = |err: cpal::StreamError| tracing::warn!("Capture stream error: {err}");
                let stream = match format {
                    SampleFormat::F32 => device.build_input_stream(
                        &config,
                        move |data: &[f32], _| {
                            let mono = downmix(data, channels);
                            feed.push(&resample(&mono, rate, target_rate));
                        },
                        err_fn,
                        None,
                    ),
                    SampleFormat::I16 => device.build_input_stream(
                        &config,
                        move |data: &[i16], _| {
                            let floats: Vec<f32> =
                                data.iter().map(|&s| f32::from(s) / 32_768.0).collect();
                            let mono = downmix(&floats, channels);
                            feed.push(&resample(&mono, rate, target_rate));
                        },
                        err_fn,
                        None,
                    ),
                    other => {
                        return Err(Error::DeviceUnavailable(format!(
                            "unsupported sample format: {other:?}"
                        )));
                    }
                }
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
                stream
                    .play()
                    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
                Ok(stream)
            })();
            match stream {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            }
        });

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .map_err(|_| Error::DeviceUnavailable("capture thread exited".to_string()))?;
        ready?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        Ok(rx)
    }

    async fn close(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Default system speaker. Units are appended to a shared queue in schedule
/// order, which matches their back-to-back placement on the timeline.
///
/// `unit.start` is not honored: the queue drains on the device clock, so
/// output latency or an underrun delays the audio relative to the scheduler.
/// [`PlaybackScheduler::is_speaking`](super::playback::PlaybackScheduler::is_speaking)
/// follows the scheduler clock and may end slightly before the speaker does.
pub struct CpalPlaybackSink {
    queue: Arc<Mutex<VecDeque<f32>>>,
    _stop_tx: std_mpsc::Sender<()>,
}

impl std::fmt::Debug for CpalPlaybackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalPlaybackSink").finish_non_exhaustive()
    }
}

impl CpalPlaybackSink {
    /// Open the default output device at 24 kHz.
    ///
    /// # Errors
    /// Returns [`Error::DeviceUnavailable`] if no output stream can be built.
    pub fn open_default() -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let shared = Arc::clone(&queue);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        std::thread::spawn(move || {
            let stream = (|| -> Result<cpal::Stream> {
                let device = cpal::default_host()
                    .default_output_device()
                    .ok_or_else(|| Error::DeviceUnavailable("no default output device".into()))?;
                let channels = device
                    .default_output_config()
                    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
                    .channels()
                    .max(1);
                let config = StreamConfig {
                    channels,
                    sample_rate: SampleRate(OUTPUT_SAMPLE_RATE),
                    buffer_size: cpal::BufferSize::Default,
                };
                let channels = usize::from(channels);
                let stream = device
                    .build_output_stream(
                        &config,
                        move |out: &mut [f32], _| {
                            let mut queue = match shared.lock() {
                                Ok(queue) => queue,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            for frame in out.chunks_mut(channels) {
                                let sample = queue.pop_front().unwrap_or(0.0);
                                frame.fill(sample);
                            }
                        },
                        |err: cpal::StreamError| tracing::warn!("Playback stream error: {err}"),
                        None,
                    )
                    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
                stream
                    .play()
                    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
                Ok(stream)
            })();
            match stream {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            }
        });

        ready_rx
            .recv()
            .map_err(|_| Error::DeviceUnavailable("playback thread exited".to_string()))??;
        Ok(Self {
            queue,
            _stop_tx: stop_tx,
        })
    }

    fn with_queue(&self, f: impl FnOnce(&mut VecDeque<f32>)) {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut queue);
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn schedule(&mut self, unit: &PlaybackUnit) {
        let samples = resample(&unit.samples, unit.sample_rate_hz, OUTPUT_SAMPLE_RATE);
        self.with_queue(|queue| queue.extend(samples));
    }

    fn stop_all(&mut self) {
        self.with_queue(VecDeque::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_format_is_configurable() {
        let device = CpalCaptureDevice::new(None).with_format(48_000, 960);
        assert_eq!(device.sample_rate(), 48_000);
        assert_eq!(device.frame_samples, 960);
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
    }
}
