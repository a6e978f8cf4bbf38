pub mod capture;
#[cfg(feature = "cpal")]
pub mod cpal_device;
pub mod frame;
pub mod meter;
pub mod pcm;
pub mod playback;

pub use capture::{CaptureDevice, CaptureEncoder, CaptureFeed, CaptureFormat, PushCaptureDevice};
#[cfg(feature = "cpal")]
pub use cpal_device::{CpalCaptureDevice, CpalPlaybackSink};
pub use frame::{AudioFrame, DEFAULT_FRAME_SAMPLES};
pub use meter::VolumeMeter;
pub use playback::{
    ChannelPlaybackSink, ManualClock, MonotonicClock, NullSink, PlaybackClock, PlaybackCommand,
    PlaybackScheduler, PlaybackSink, PlaybackUnit,
};
