//! WAV (RIFF) output: a streaming writer whose length fields are unknown when
//! the header goes out, plus exact-length encoding for complete buffers.
//!
//! The streaming header declares both the RIFF size and the `data` size as
//! the largest representable value. Players that read until end-of-stream
//! handle this fine; strict validators that compare the declared length with
//! the real one will flag the file. Knowing the real length would require
//! buffering the whole reply, so the sentinel stays.
use base64::{engine::general_purpose, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::error::SinkClosed;
use crate::frame::AudioFormat;
use crate::sink::OutputSink;

/// Canonical PCM header size (RIFF + fmt + data chunk headers).
pub const HEADER_LEN: usize = 44;
/// RIFF chunk size written while the total length is unknown.
pub const STREAMING_RIFF_SIZE: u32 = u32::MAX - 8;
/// `data` chunk size written while the total length is unknown.
pub const STREAMING_DATA_SIZE: u32 = u32::MAX;

/// Build a 44-byte PCM header with the given size fields.
pub fn wav_header(format: &AudioFormat, riff_size: u32, data_size: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN);

    // RIFF header
    out.put_slice(b"RIFF");
    out.put_u32_le(riff_size);
    out.put_slice(b"WAVE");

    // fmt chunk
    out.put_slice(b"fmt ");
    out.put_u32_le(16); // fmt chunk size
    out.put_u16_le(1); // PCM
    out.put_u16_le(format.channels);
    out.put_u32_le(format.sample_rate);
    out.put_u32_le(format.byte_rate());
    out.put_u16_le(format.block_align() as u16);
    out.put_u16_le(format.bits_per_sample);

    // data chunk
    out.put_slice(b"data");
    out.put_u32_le(data_size);

    out.freeze()
}

/// Header for a stream whose total length is not known yet.
pub fn streaming_header(format: &AudioFormat) -> Bytes {
    wav_header(format, STREAMING_RIFF_SIZE, STREAMING_DATA_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    HeaderPending,
    Streaming,
    Closed,
}

/// Per-response bookkeeping for the container writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    phase: StreamPhase,
    payload_bytes: u64,
}

impl StreamState {
    fn new() -> Self {
        Self {
            phase: StreamPhase::HeaderPending,
            payload_bytes: 0,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn header_written(&self) -> bool {
        self.phase != StreamPhase::HeaderPending
    }

    /// Audio payload bytes written after the header.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    pub fn is_closed(&self) -> bool {
        self.phase == StreamPhase::Closed
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainerError {
    #[error(transparent)]
    SinkClosed(#[from] SinkClosed),

    #[error("frame format {got:?} does not match stream format {expected:?}")]
    FormatMismatch {
        expected: AudioFormat,
        got: AudioFormat,
    },
}

/// Writes one WAV stream onto an [`OutputSink`].
///
/// `HeaderPending --(first write)--> Streaming --(finish / abort / sink error)--> Closed`.
/// There is no way back to `HeaderPending`, so at most one header is ever
/// written. Payload bytes are forwarded as-is with no per-utterance framing.
pub struct StreamingWavWriter<S> {
    sink: S,
    format: AudioFormat,
    state: StreamState,
}

impl<S: OutputSink> StreamingWavWriter<S> {
    pub fn new(sink: S, format: AudioFormat) -> Self {
        Self {
            sink,
            format,
            state: StreamState::new(),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Emit the header if it has not gone out yet.
    pub async fn write_header(&mut self) -> Result<(), SinkClosed> {
        match self.state.phase {
            StreamPhase::HeaderPending => {
                let header = streaming_header(&self.format);
                self.forward(header).await?;
                if self.state.phase == StreamPhase::HeaderPending {
                    self.state.phase = StreamPhase::Streaming;
                }
                Ok(())
            }
            StreamPhase::Streaming => Ok(()),
            StreamPhase::Closed => Err(SinkClosed),
        }
    }

    /// Append raw frame payload, writing the header first when needed.
    pub async fn write_payload(
        &mut self,
        format: AudioFormat,
        payload: Bytes,
    ) -> Result<(), ContainerError> {
        if format != self.format {
            return Err(ContainerError::FormatMismatch {
                expected: self.format,
                got: format,
            });
        }
        self.write_header().await?;
        if payload.is_empty() {
            return Ok(());
        }
        let len = payload.len() as u64;
        self.forward(payload).await?;
        self.state.payload_bytes += len;
        Ok(())
    }

    /// Close normally. A stream that never carried audio still gets its
    /// header so the client always receives a well-formed container.
    pub async fn finish(&mut self) -> Result<(), SinkClosed> {
        let result = self.write_header().await;
        self.state.phase = StreamPhase::Closed;
        result
    }

    /// Stop emitting without touching the sink again.
    pub fn abort(&mut self) {
        self.state.phase = StreamPhase::Closed;
    }

    /// Resolves once the sink's consumer has gone away.
    pub async fn sink_closed(&self) {
        self.sink.closed().await
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    async fn forward(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        if self.state.is_closed() {
            return Err(SinkClosed);
        }
        match self.sink.send(chunk).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.phase = StreamPhase::Closed;
                Err(e)
            }
        }
    }
}

/// Encode interleaved 16-bit PCM as a complete WAV file with exact length fields.
pub fn encode_wav(pcm: &[u8], format: AudioFormat) -> anyhow::Result<Vec<u8>> {
    use std::io::Cursor;

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    // Pre-allocate buffer: WAV header (44 bytes) + samples
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(HEADER_LEN + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;
        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(cursor.into_inner())
}

/// Convenience: complete WAV file as Base64.
pub fn encode_wav_base64(pcm: &[u8], format: AudioFormat) -> anyhow::Result<String> {
    let wav = encode_wav(pcm, format)?;
    Ok(general_purpose::STANDARD.encode(wav))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use async_trait::async_trait;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_streaming_header_layout() {
        let header = streaming_header(&AudioFormat::pcm16(22050, 2));

        assert_eq!(header.len(), HEADER_LEN);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32_at(&header, 4), u32::MAX - 8);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(u32_at(&header, 16), 16);
        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 22050);
        assert_eq!(u32_at(&header, 28), 22050 * 4);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32_at(&header, 40), u32::MAX);
    }

    #[tokio::test]
    async fn test_single_header_then_raw_payload() {
        let format = AudioFormat::pcm16(16000, 1);
        let mut writer = StreamingWavWriter::new(MemorySink::new(), format);
        assert_eq!(writer.state().phase(), StreamPhase::HeaderPending);

        writer
            .write_payload(format, Bytes::from_static(&[1, 0, 2, 0]))
            .await
            .unwrap();
        assert_eq!(writer.state().phase(), StreamPhase::Streaming);
        writer.write_header().await.unwrap();
        writer
            .write_payload(format, Bytes::from_static(&[3, 0]))
            .await
            .unwrap();
        writer.finish().await.unwrap();

        assert_eq!(writer.state().payload_bytes(), 6);
        let sink = writer.into_sink();
        assert_eq!(sink.chunks().len(), 3);
        let bytes = sink.into_bytes();
        assert_eq!(bytes.windows(4).filter(|w| w == b"RIFF").count(), 1);
        assert_eq!(&bytes[HEADER_LEN..], &[1, 0, 2, 0, 3, 0]);
    }

    #[tokio::test]
    async fn test_finish_without_audio_still_emits_header() {
        let format = AudioFormat::pcm16(22050, 2);
        let mut writer = StreamingWavWriter::new(MemorySink::new(), format);
        writer.finish().await.unwrap();

        assert!(writer.state().is_closed());
        assert_eq!(writer.into_sink().into_bytes(), streaming_header(&format).to_vec());
    }

    #[tokio::test]
    async fn test_format_mismatch_is_rejected() {
        let format = AudioFormat::pcm16(22050, 2);
        let mut writer = StreamingWavWriter::new(MemorySink::new(), format);
        let err = writer
            .write_payload(format.with_channels(1), Bytes::from_static(&[0, 0]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::FormatMismatch { .. }));
        assert!(!writer.state().header_written());
    }

    struct FailingSink {
        accepted: usize,
        attempts: usize,
    }

    #[async_trait]
    impl OutputSink for FailingSink {
        async fn send(&mut self, _chunk: Bytes) -> Result<(), SinkClosed> {
            self.attempts += 1;
            if self.attempts > self.accepted {
                return Err(SinkClosed);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_closed_sink_is_never_written_again() {
        let format = AudioFormat::pcm16(22050, 1);
        let sink = FailingSink { accepted: 1, attempts: 0 };
        let mut writer = StreamingWavWriter::new(sink, format);

        writer.write_header().await.unwrap();
        let first = writer.write_payload(format, Bytes::from_static(&[0, 0])).await;
        assert_eq!(first, Err(ContainerError::SinkClosed(SinkClosed)));
        assert!(writer.state().is_closed());

        let second = writer.write_payload(format, Bytes::from_static(&[0, 0])).await;
        assert_eq!(second, Err(ContainerError::SinkClosed(SinkClosed)));
        assert_eq!(writer.finish().await, Err(SinkClosed));
        assert_eq!(writer.into_sink().attempts, 2);
    }

    #[test]
    fn test_encode_wav_has_exact_lengths() {
        let format = AudioFormat::pcm16(8000, 2);
        let pcm = vec![0u8; 400];
        let wav = encode_wav(&pcm, format).unwrap();

        assert_eq!(wav.len(), HEADER_LEN + 400);
        assert_eq!(u32_at(&wav, 4), (wav.len() - 8) as u32);
        assert_eq!(u32_at(&wav, 40), 400);

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 200);
    }

    #[test]
    fn test_encode_wav_base64_roundtrips_through_decoder() {
        let b64 = encode_wav_base64(&[1, 0, 255, 255], AudioFormat::pcm16(16000, 1)).unwrap();
        let raw = general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(&raw[0..4], b"RIFF");
        assert_eq!(&raw[HEADER_LEN..], &[1, 0, 255, 255]);
    }
}
