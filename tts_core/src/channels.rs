//! Mono to multi-channel expansion.

use bytes::BytesMut;

use crate::error::AudioFormatError;
use crate::frame::AudioFrame;

/// Duplicate every mono sample into `target` interleaved channels.
///
/// `[a, b, c]` at mono becomes `[a, a, b, b, c, c]` at stereo. A frame that
/// already has `target` channels is returned untouched.
pub fn adapt_channels(frame: AudioFrame, target: u16) -> Result<AudioFrame, AudioFormatError> {
    let from = frame.format.channels;
    if from == target {
        return Ok(frame);
    }
    if from != 1 || target == 0 {
        return Err(AudioFormatError::UnsupportedChannels { from, to: target });
    }

    let width = frame.format.bytes_per_sample();
    let mut out = BytesMut::with_capacity(frame.payload.len() * usize::from(target));
    for sample in frame.payload.chunks_exact(width) {
        for _ in 0..target {
            out.extend_from_slice(sample);
        }
    }

    Ok(AudioFrame {
        format: frame.format.with_channels(target),
        payload: out.freeze(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{bytes_to_i16, AudioFormat};

    #[test]
    fn test_mono_to_stereo_duplicates_samples() {
        let mono = AudioFrame::from_i16(&[5, -3], AudioFormat::pcm16(22050, 1));
        let stereo = adapt_channels(mono, 2).unwrap();

        assert_eq!(stereo.format.channels, 2);
        assert_eq!(bytes_to_i16(&stereo.payload), vec![5, 5, -3, -3]);
    }

    #[test]
    fn test_output_length_is_exact_multiple() {
        let samples: Vec<i16> = (0..1000).map(|i| (i * 31 % 2000 - 1000) as i16).collect();
        let mono = AudioFrame::from_i16(&samples, AudioFormat::pcm16(16000, 1));
        let input_len = mono.len();

        for target in 1..=4u16 {
            let out = adapt_channels(mono.clone(), target).unwrap();
            assert_eq!(out.len(), input_len * usize::from(target));
            assert_eq!(out.sample_frames(), samples.len());
        }
    }

    #[test]
    fn test_same_channel_count_is_noop() {
        let stereo = AudioFrame::from_i16(&[1, 2, 3, 4], AudioFormat::pcm16(22050, 2));
        let out = adapt_channels(stereo.clone(), 2).unwrap();
        assert_eq!(out, stereo);
    }

    #[test]
    fn test_downmix_is_rejected() {
        let stereo = AudioFrame::from_i16(&[1, 2], AudioFormat::pcm16(22050, 2));
        assert_eq!(
            adapt_channels(stereo, 1),
            Err(AudioFormatError::UnsupportedChannels { from: 2, to: 1 })
        );
    }

    #[test]
    fn test_empty_frame_stays_empty() {
        let empty = AudioFrame::from_i16(&[], AudioFormat::pcm16(22050, 1));
        let out = adapt_channels(empty, 2).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.format.channels, 2);
    }
}
