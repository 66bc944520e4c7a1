//! Piper, driven as a subprocess that writes raw PCM to stdout.
//!
//! One process per sentence. The child is owned by the returned byte stream
//! and spawned with `kill_on_drop`, so dropping the stream (request
//! cancelled, sentence timed out) terminates it. Nothing is shared between
//! calls.

use std::process::Stdio;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::error::SynthesisError;
use crate::frame::AudioFormat;
use crate::synth::{RawAudio, RawBody, SpeechSynthesizer, VoiceSelector};
use crate::voices::VoiceMap;

const READ_CHUNK: usize = 4096;
const NOISE_SCALE: &str = "0.667";
const NOISE_W: &str = "0.8";

#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    binary: String,
    voices: VoiceMap,
    speed: f32,
}

impl PiperSynthesizer {
    pub fn new(binary: impl Into<String>, voices: VoiceMap, speed: f32) -> Self {
        Self {
            binary: binary.into(),
            voices,
            speed: if speed > 0.0 { speed } else { 1.0 },
        }
    }

    pub fn voices(&self) -> &VoiceMap {
        &self.voices
    }

    fn length_scale(&self) -> String {
        format!("{:.3}", 1.0 / self.speed)
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    fn name(&self) -> &str {
        "piper"
    }

    fn supports(&self, language: &str) -> bool {
        self.voices.get(language).is_some()
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSelector,
    ) -> Result<RawAudio, SynthesisError> {
        let entry = self.voices.get(&voice.language).ok_or_else(|| {
            SynthesisError::Unavailable(format!("no piper voice for '{}'", voice.language))
        })?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model")
            .arg(&entry.model)
            .arg("--output-raw")
            .arg("--length_scale")
            .arg(self.length_scale())
            .arg("--noise_scale")
            .arg(NOISE_SCALE)
            .arg("--noise_w")
            .arg(NOISE_W);
        if let Some(speaker) = entry.speaker {
            cmd.arg("--speaker").arg(speaker.to_string());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SynthesisError::Unavailable(format!("failed to spawn {}: {e}", self.binary)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SynthesisError::Unavailable("piper stdin not captured".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SynthesisError::Unavailable("piper stdout not captured".into()))?;

        let mut line = text.replace('\n', " ");
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SynthesisError::Unavailable(format!("piper stdin: {e}")))?;
        // EOF tells piper there is nothing more to read
        drop(stdin);

        let body = stream! {
            let mut child = child;
            let mut produced = 0usize;
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        produced += n;
                        yield Ok(Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(e) => {
                        yield Err(SynthesisError::Unavailable(format!("piper stdout: {e}")));
                        return;
                    }
                }
            }
            match child.wait().await {
                Ok(status) if !status.success() && produced == 0 => {
                    yield Err(SynthesisError::Unavailable(format!("piper exited with {status}")));
                }
                Ok(status) => debug!(%status, bytes = produced, "piper finished"),
                Err(e) => {
                    yield Err(SynthesisError::Unavailable(format!("piper wait: {e}")));
                }
            }
        };

        Ok(RawAudio {
            format: AudioFormat::pcm16(entry.sample_rate, 1),
            body: RawBody::Stream(Box::pin(body)),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::voices::VoiceEntry;
    use futures_util::StreamExt;

    fn voices() -> VoiceMap {
        VoiceMap::from_entries([(
            "en".to_string(),
            VoiceEntry {
                model: "model.onnx".into(),
                sample_rate: 16000,
                speaker: None,
            },
        )])
    }

    async fn collect(audio: RawAudio) -> Result<Vec<u8>, SynthesisError> {
        let RawBody::Stream(mut s) = audio.body else {
            panic!("piper should stream");
        };
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[test]
    fn test_length_scale_from_speed() {
        assert_eq!(PiperSynthesizer::new("piper", voices(), 2.0).length_scale(), "0.500");
        assert_eq!(PiperSynthesizer::new("piper", voices(), 0.0).length_scale(), "1.000");
    }

    #[tokio::test]
    async fn test_unknown_language_is_unavailable() {
        let piper = PiperSynthesizer::new("piper", voices(), 1.0);
        assert!(!piper.supports("de"));
        let err = piper
            .synthesize("Hallo", &VoiceSelector::language("de"))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let piper = PiperSynthesizer::new("/nonexistent/piper-binary", voices(), 1.0);
        let err = piper
            .synthesize("Hello.", &VoiceSelector::language("en"))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_streams_stdout_of_child() {
        // stand-in binary: ignores the flags and echoes stdin
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-piper");
        std::fs::write(&script, "#!/bin/sh\ncat\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let piper = PiperSynthesizer::new(script.to_string_lossy(), voices(), 1.0);
        let audio = piper
            .synthesize("abcd", &VoiceSelector::language("en"))
            .await
            .unwrap();
        assert_eq!(audio.format, AudioFormat::pcm16(16000, 1));
        assert_eq!(collect(audio).await.unwrap(), b"abcd\n");
    }

    #[tokio::test]
    async fn test_failing_child_without_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken-piper");
        std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\nexit 3\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let piper = PiperSynthesizer::new(script.to_string_lossy(), voices(), 1.0);
        let audio = piper
            .synthesize("abcd", &VoiceSelector::language("en"))
            .await
            .unwrap();
        assert!(matches!(collect(audio).await, Err(SynthesisError::Unavailable(_))));
    }
}
