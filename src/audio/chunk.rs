use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::backend::AudioFrame;
use super::codec;

/// Chunk configuration
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Duration of each chunk in milliseconds (default: 1000)
    pub timeslice_ms: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { timeslice_ms: 1000 }
    }
}

/// One finalized slice of captured audio, as a WAV container
#[derive(Debug, Clone)]
pub struct CaptureChunk {
    /// Chunk number (0-indexed)
    pub index: usize,
    /// Wall-clock time the chunk was finalized
    pub captured_at: DateTime<Utc>,
    /// Start time in milliseconds since capture started
    pub start_ms: u64,
    /// Audio duration carried by the chunk
    pub duration_ms: u64,
    /// Native sample rate
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Number of samples in this chunk (all channels)
    pub sample_count: usize,
    /// Container bytes
    pub bytes: Vec<u8>,
}

/// Chunked audio recorder
///
/// Receives device frames and cuts them into fixed-duration container chunks.
/// Frames are split at the slice boundary so every chunk but the last carries
/// exactly one time slice of audio.
pub struct ChunkedRecorder {
    config: ChunkConfig,
    current: Option<ChunkBuffer>,
    chunk_index: usize,
}

impl ChunkedRecorder {
    pub fn new(config: ChunkConfig) -> Self {
        debug!("Chunked recorder initialized ({}ms slices)", config.timeslice_ms);

        Self {
            config,
            current: None,
            chunk_index: 0,
        }
    }

    /// Buffer a frame, returning every chunk it completed
    pub fn push(&mut self, frame: &AudioFrame) -> Result<Vec<CaptureChunk>> {
        let mut finished = Vec::new();

        if frame.channels == 0 || frame.sample_rate == 0 {
            return Ok(finished);
        }

        // A format change closes the running chunk
        if let Some(current) = &self.current {
            if current.sample_rate != frame.sample_rate || current.channels != frame.channels {
                if let Some(chunk) = self.flush()? {
                    finished.push(chunk);
                }
            }
        }

        let channels = frame.channels as usize;
        let slice_frames = self.slice_frames(frame.sample_rate);
        let mut offset = 0;

        // Only whole interleaved frames are kept
        let usable = frame.samples.len() - frame.samples.len() % channels;
        if usable < frame.samples.len() {
            warn!(
                "Dropping {} trailing samples of a partial {}-channel frame",
                frame.samples.len() - usable,
                channels
            );
        }

        while offset < usable {
            let chunk_index = self.chunk_index;
            let frame_offset_ms = (offset / channels) as u64 * 1000 / frame.sample_rate as u64;
            let current = self.current.get_or_insert_with(|| ChunkBuffer {
                index: chunk_index,
                start_ms: frame.timestamp_ms + frame_offset_ms,
                sample_rate: frame.sample_rate,
                channels: frame.channels,
                samples: Vec::new(),
            });

            let room = slice_frames.saturating_sub(current.frame_count()) * channels;
            let take = room.min(usable - offset);
            current
                .samples
                .extend(frame.samples[offset..offset + take].iter().copied().map(codec::quantize));
            offset += take;

            if current.frame_count() >= slice_frames {
                if let Some(chunk) = self.flush()? {
                    finished.push(chunk);
                }
            }
        }

        Ok(finished)
    }

    /// Emit whatever is buffered, if anything
    pub fn flush(&mut self) -> Result<Option<CaptureChunk>> {
        let Some(buffer) = self.current.take() else {
            return Ok(None);
        };

        if buffer.samples.is_empty() {
            return Ok(None);
        }

        let chunk = buffer.finish()?;
        self.chunk_index += 1;

        debug!(
            "Chunk {} complete: {:.1}s - {:.1}s ({} samples)",
            chunk.index,
            chunk.start_ms as f64 / 1000.0,
            (chunk.start_ms + chunk.duration_ms) as f64 / 1000.0,
            chunk.sample_count
        );

        Ok(Some(chunk))
    }

    /// Milliseconds of audio waiting for the next boundary
    pub fn buffered_ms(&self) -> u64 {
        self.current.as_ref().map(|c| c.duration_ms()).unwrap_or(0)
    }

    pub fn chunks_emitted(&self) -> usize {
        self.chunk_index
    }

    fn slice_frames(&self, sample_rate: u32) -> usize {
        ((sample_rate as u64 * self.config.timeslice_ms) / 1000).max(1) as usize
    }
}

struct ChunkBuffer {
    index: usize,
    start_ms: u64,
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

impl ChunkBuffer {
    fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    fn duration_ms(&self) -> u64 {
        self.frame_count() as u64 * 1000 / self.sample_rate as u64
    }

    fn finish(self) -> Result<CaptureChunk> {
        let bytes = codec::wav_bytes(&self.samples, self.sample_rate, self.channels)
            .context("Failed to write chunk container")?;

        Ok(CaptureChunk {
            index: self.index,
            captured_at: Utc::now(),
            start_ms: self.start_ms,
            duration_ms: self.duration_ms(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_count: self.samples.len(),
            bytes,
        })
    }
}
