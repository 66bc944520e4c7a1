use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning text into audio frames.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Every candidate in the fallback chain failed, or a single synthesizer
    /// could not produce audio.
    #[error("synthesis unavailable: {0}")]
    Unavailable(String),

    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    #[error("audio format error: {0}")]
    Format(#[from] AudioFormatError),
}

/// Raw PCM data that does not fit the declared format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioFormatError {
    #[error("payload of {len} bytes is not a whole number of {block_align}-byte sample frames")]
    Misaligned { len: usize, block_align: usize },

    #[error("cannot adapt {from} channel(s) to {to}")]
    UnsupportedChannels { from: u16, to: u16 },

    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("resampler: {0}")]
    Resampler(String),
}

/// The consumer of the byte stream went away (client disconnect).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("output sink closed")]
pub struct SinkClosed;
