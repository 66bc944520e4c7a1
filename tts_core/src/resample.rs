//! Incremental sample-rate conversion for links whose native rate differs from
//! the response rate.

use rubato::{FftFixedIn, Resampler};

use crate::error::AudioFormatError;

const CHUNK: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Mono 16-bit resampler fed in arbitrary pieces.
///
/// The FFT resampler works on fixed input blocks and delays its output by a
/// few hundred samples. Both are hidden here: the leading delay is dropped
/// and [`StreamResampler::finish`] pads the tail, so the total output length
/// is `ceil(input * to / from)`.
pub struct StreamResampler {
    inner: FftFixedIn<f64>,
    from: u32,
    to: u32,
    pending: Vec<f64>,
    delay_remaining: usize,
    consumed: u64,
    produced: u64,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl StreamResampler {
    pub fn new(from: u32, to: u32) -> Result<Self, AudioFormatError> {
        let inner = FftFixedIn::<f64>::new(from as usize, to as usize, CHUNK, SUB_CHUNKS, 1)
            .map_err(|e| AudioFormatError::Resampler(format!("init {from}->{to}: {e}")))?;
        let delay_remaining = inner.output_delay();
        Ok(Self {
            inner,
            from,
            to,
            pending: Vec::with_capacity(CHUNK),
            delay_remaining,
            consumed: 0,
            produced: 0,
        })
    }

    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<i16>, AudioFormatError> {
        self.consumed += samples.len() as u64;
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut out = Vec::new();
        while self.pending.len() >= self.inner.input_frames_next() {
            let block: Vec<f64> = self.pending.drain(..self.inner.input_frames_next()).collect();
            self.process_block(block, &mut out)?;
        }
        Ok(out)
    }

    /// Flush the tail. The resampler cannot be reused afterwards.
    pub fn finish(&mut self) -> Result<Vec<i16>, AudioFormatError> {
        let expected = self.expected_output();
        let mut out = Vec::new();

        // zero-padded blocks until the delayed tail has come out
        let needed = expected.saturating_sub(self.produced) as usize + self.delay_remaining;
        let max_blocks = 2 + needed / self.inner.output_frames_next().max(1);
        for _ in 0..max_blocks {
            if self.produced >= expected {
                break;
            }
            let mut block = std::mem::take(&mut self.pending);
            block.resize(self.inner.input_frames_next(), 0.0);
            self.process_block(block, &mut out)?;
        }

        let surplus = self.produced.saturating_sub(expected) as usize;
        out.truncate(out.len().saturating_sub(surplus));
        self.produced = self.produced.min(expected);
        Ok(out)
    }

    fn expected_output(&self) -> u64 {
        (self.consumed * u64::from(self.to)).div_ceil(u64::from(self.from))
    }

    fn process_block(&mut self, block: Vec<f64>, out: &mut Vec<i16>) -> Result<(), AudioFormatError> {
        let result = self
            .inner
            .process(&[block], None)
            .map_err(|e| AudioFormatError::Resampler(format!("process: {e}")))?;
        let Some(channel) = result.into_iter().next() else {
            return Ok(());
        };

        let skip = self.delay_remaining.min(channel.len());
        self.delay_remaining -= skip;
        for &s in &channel[skip..] {
            out.push(s.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16);
        }
        self.produced += (channel.len() - skip) as u64;
        Ok(())
    }
}
