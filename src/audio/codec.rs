//! Sample-format and rate conversion between device audio and the wire.
//!
//! Devices hand us interleaved `f32` samples at whatever rate the hardware
//! runs at; the media stream wants mono 16-bit signed PCM at 8 kHz, base64
//! encoded. Inbound speech arrives as an opaque container which is decoded
//! here with symphonia.

use std::io::Cursor;

use base64::Engine;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Wire sample rate for outbound speech
pub const WIRE_SAMPLE_RATE: u32 = 8000;

/// Wire channel count for outbound speech
pub const WIRE_CHANNELS: u16 = 1;

/// Encoding name announced in the `start` frame
pub const WIRE_ENCODING: &str = "audio/l16";

const PCM16_SCALE: f32 = 32767.0;

/// PCM16 audio ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    /// Quantized mono samples at the target rate
    pub pcm: Vec<i16>,
    /// Base64 of the little-endian PCM bytes
    pub payload: String,
}

/// Result of encoding one captured chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPayload {
    pub payload: String,
    /// Number of PCM samples carried (0 for passthrough)
    pub sample_count: usize,
    /// True when the container could not be decoded and raw bytes were forwarded
    pub passthrough: bool,
}

/// Decoded media, interleaved
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1000 / self.sample_rate as u64
    }

    /// Average all channels into one
    pub fn to_mono(&self) -> Vec<f32> {
        downmix(&self.samples, self.channels)
    }
}

/// Linear-interpolation resampler.
///
/// Produces `round(n / (source_rate / target_rate))` samples. Each output
/// sample `i` is interpolated between the input samples around the
/// fractional index `i * ratio`; the upper neighbour clamps to the last input.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let position = i as f64 * ratio;
        let index = (position.floor() as usize).min(last);
        let next = (index + 1).min(last);
        let frac = (position - index as f64) as f32;
        let sample = samples[index] + (samples[next] - samples[index]) * frac;
        out.push(sample);
    }

    out
}

/// Average interleaved channels into mono
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Clamp to [-1, 1] and scale to a signed 16-bit sample
pub fn quantize(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * PCM16_SCALE).round() as i16
}

pub fn dequantize(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Little-endian bytes back to samples; a trailing odd byte is ignored
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(text.trim())
}

/// Resample mono float samples and encode them as base64 PCM16
pub fn encode(samples: &[f32], source_rate: u32, target_rate: u32) -> EncodedAudio {
    let resampled = resample(samples, source_rate, target_rate);
    let pcm: Vec<i16> = resampled.iter().copied().map(quantize).collect();
    let payload = encode_base64(&pcm16_to_bytes(&pcm));
    EncodedAudio { pcm, payload }
}

/// Decode any container symphonia can probe into interleaved f32 samples
pub fn decode_media(bytes: &[u8]) -> Result<DecodedAudio, String> {
    if bytes.is_empty() {
        return Err("empty media buffer".to_string());
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("failed to probe media: {}", e))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| "no audio track".to_string())?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("unsupported codec: {}", e))?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(format!("failed to read packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(format!("decoder failed: {}", e)),
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err("media contains no audio frames".to_string());
    }

    debug!(
        "Decoded media: {} samples, {}Hz, {} channels",
        samples.len(),
        sample_rate,
        channels
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Turn a captured container chunk into a wire payload.
///
/// Falls back to forwarding the raw container bytes when the chunk cannot be
/// decoded; delivery is preferred over fidelity.
pub fn encode_chunk(container: &[u8], target_rate: u32) -> ChunkPayload {
    match decode_media(container) {
        Ok(decoded) => {
            let mono = decoded.to_mono();
            let encoded = encode(&mono, decoded.sample_rate, target_rate);
            ChunkPayload {
                sample_count: encoded.pcm.len(),
                payload: encoded.payload,
                passthrough: false,
            }
        }
        Err(e) => {
            warn!(
                "Could not decode captured chunk ({} bytes), forwarding raw container: {}",
                container.len(),
                e
            );
            ChunkPayload {
                payload: encode_base64(container),
                sample_count: 0,
                passthrough: true,
            }
        }
    }
}

/// Write mono PCM16 samples into an in-memory WAV container
pub fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
