use tokio::sync::mpsc;

use crate::error::CaptureError;

/// Device audio as delivered by the hardware (f32, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw samples in [-1, 1], interleaved
    pub samples: Vec<f32>,
    /// Native sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frame_count() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Constraints requested when acquiring the microphone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Requested channel count (1 = mono)
    pub channels: u16,
    /// Requested native sample rate; kept high so downsampling has headroom
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 48000,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Microphone abstraction
///
/// Implementations:
/// - `CpalCaptureDevice` (feature `cpal`): default input device
/// - `FileCaptureDevice`: replays an audio file in real time
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    /// Acquire the device (permission prompt). Must be called before `start`.
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError>;

    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing audio; the device stays acquired
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Release the hardware tracks. Safe to call repeatedly.
    fn release(&mut self) -> Result<(), CaptureError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
