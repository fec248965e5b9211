pub mod backend;
pub mod capture;
pub mod chunk;
pub mod codec;
pub mod file;
pub mod playback;

#[cfg(feature = "cpal")]
pub mod cpal_device;

pub use backend::{AudioFrame, CaptureConstraints, CaptureDevice};
pub use capture::{CaptureSession, CaptureSettings};
pub use chunk::{CaptureChunk, ChunkConfig, ChunkedRecorder};
pub use codec::{ChunkPayload, DecodedAudio, EncodedAudio};
pub use file::{FileCaptureDevice, WavFilePlaybackDevice};
pub use playback::{PlaybackCompletion, PlaybackDevice, PlaybackOutcome, PlaybackSession};

#[cfg(feature = "cpal")]
pub use cpal_device::{CpalCaptureDevice, CpalPlaybackDevice};
