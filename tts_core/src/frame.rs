//! Raw PCM frames as they travel from the synthesizer to the container writer.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::AudioFormatError;

/// Every synthesizer in this crate emits signed 16-bit little-endian PCM.
pub const PCM16_BITS: u16 = 16;

/// Sample layout shared by all frames of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: PCM16_BITS,
        }
    }

    pub const fn with_channels(self, channels: u16) -> Self {
        Self { channels, ..self }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Bytes per multi-channel sample frame.
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// A block of raw samples plus the format that describes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    pub payload: Bytes,
}

impl AudioFrame {
    /// Wraps `payload`, rejecting data that ends in a partial sample frame.
    pub fn new(format: AudioFormat, payload: impl Into<Bytes>) -> Result<Self, AudioFormatError> {
        if format.bits_per_sample == 0 || format.bits_per_sample % 8 != 0 {
            return Err(AudioFormatError::UnsupportedBitDepth(format.bits_per_sample));
        }
        let payload = payload.into();
        let block_align = format.block_align();
        if block_align == 0 || payload.len() % block_align != 0 {
            return Err(AudioFormatError::Misaligned {
                len: payload.len(),
                block_align,
            });
        }
        Ok(Self { format, payload })
    }

    /// `samples` sample frames of digital silence.
    pub fn silence(format: AudioFormat, samples: usize) -> Self {
        Self {
            format,
            payload: Bytes::from(vec![0u8; samples * format.block_align()]),
        }
    }

    /// Encode mono `[-1.0, 1.0]` floats as a 16-bit frame.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        const I16_MAX_F32: f32 = i16::MAX as f32;
        let mut buf = BytesMut::with_capacity(samples.len() * 2);
        for &s in samples {
            buf.put_i16_le((s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16);
        }
        Self {
            format: AudioFormat::pcm16(sample_rate, 1),
            payload: buf.freeze(),
        }
    }

    /// Build a 16-bit frame from already-quantised samples.
    pub fn from_i16(samples: &[i16], format: AudioFormat) -> Self {
        Self {
            format,
            payload: i16_to_bytes(samples),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Number of sample frames (one sample per channel each).
    pub fn sample_frames(&self) -> usize {
        self.payload.len() / self.format.block_align()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.sample_frames() as u64 * 1000) / u64::from(self.format.sample_rate.max(1))
    }
}

pub fn bytes_to_i16(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn i16_to_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(s);
    }
    buf.freeze()
}
