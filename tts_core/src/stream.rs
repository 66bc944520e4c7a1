//! Turning arbitrary synthesizer byte chunks into fixed-size aligned frames.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::AudioFormatError;
use crate::frame::{bytes_to_i16, i16_to_bytes, AudioFormat, AudioFrame, PCM16_BITS};
use crate::resample::StreamResampler;

/// Re-chunks a byte stream into frames of `frame_bytes`, each holding whole
/// sample frames.
#[derive(Debug)]
pub struct FrameAligner {
    format: AudioFormat,
    frame_bytes: usize,
    pending: BytesMut,
}

impl FrameAligner {
    /// `frame_bytes` is rounded down to a multiple of the block size.
    pub fn new(format: AudioFormat, frame_bytes: usize) -> Self {
        let block = format.block_align().max(1);
        let frame_bytes = (frame_bytes / block).max(1) * block;
        Self {
            format,
            frame_bytes,
            pending: BytesMut::with_capacity(frame_bytes),
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_bytes {
            let payload = self.pending.split_to(self.frame_bytes).freeze();
            frames.push(self.frame(payload));
        }
        frames
    }

    /// Emit whatever whole samples are left; a dangling partial sample is dropped.
    pub fn finish(&mut self) -> Option<AudioFrame> {
        let block = self.format.block_align().max(1);
        let usable = self.pending.len() / block * block;
        if usable < self.pending.len() {
            debug!(
                dropped = self.pending.len() - usable,
                "discarding trailing partial sample"
            );
        }
        let payload = self.pending.split_to(usable).freeze();
        self.pending.clear();
        (!payload.is_empty()).then(|| self.frame(payload))
    }

    fn frame(&self, payload: Bytes) -> AudioFrame {
        AudioFrame {
            format: self.format,
            payload,
        }
    }
}

/// Source bytes in, output-rate frames out: alignment plus optional resampling.
#[derive(Debug)]
pub struct FrameAssembler {
    resampler: Option<StreamResampler>,
    carry: Option<u8>,
    aligner: FrameAligner,
}

impl FrameAssembler {
    pub fn new(
        source: AudioFormat,
        output_rate: u32,
        frame_bytes: usize,
    ) -> Result<Self, AudioFormatError> {
        if source.bits_per_sample != PCM16_BITS {
            return Err(AudioFormatError::UnsupportedBitDepth(source.bits_per_sample));
        }

        let resampler = if source.sample_rate == output_rate {
            None
        } else if source.channels == 1 {
            Some(StreamResampler::new(source.sample_rate, output_rate)?)
        } else {
            return Err(AudioFormatError::UnsupportedChannels {
                from: source.channels,
                to: 1,
            });
        };

        let output = AudioFormat::pcm16(output_rate, source.channels);
        Ok(Self {
            resampler,
            carry: None,
            aligner: FrameAligner::new(output, frame_bytes),
        })
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<AudioFrame>, AudioFormatError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(self.aligner.push(bytes));
        };

        // keep an odd trailing byte for the next chunk
        let mut joined;
        let mut input = bytes;
        if let Some(b) = self.carry.take() {
            joined = Vec::with_capacity(bytes.len() + 1);
            joined.push(b);
            joined.extend_from_slice(bytes);
            input = &joined;
        }
        if input.len() % 2 == 1 {
            self.carry = input.last().copied();
            input = &input[..input.len() - 1];
        }

        let samples = resampler.push(&bytes_to_i16(input))?;
        Ok(self.aligner.push(&i16_to_bytes(&samples)))
    }

    pub fn finish(&mut self) -> Result<Vec<AudioFrame>, AudioFormatError> {
        let mut frames = Vec::new();
        if let Some(resampler) = self.resampler.as_mut() {
            let tail = resampler.finish()?;
            frames.extend(self.aligner.push(&i16_to_bytes(&tail)));
        }
        frames.extend(self.aligner.finish());
        Ok(frames)
    }
}
