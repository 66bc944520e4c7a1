//! Audio side of the voice pipeline: sentence segmentation, text cleanup,
//! synthesis with fallback, channel adaptation and streaming WAV output.

pub mod channels;
pub mod cloud;
pub mod error;
pub mod frame;
pub mod normalize;
pub mod piper;
pub mod resample;
pub mod segment;
pub mod sink;
pub mod stage;
pub mod stream;
pub mod synth;
pub mod voices;
pub mod wav;

pub use channels::adapt_channels;
pub use cloud::{CloudSynthesizer, CloudTtsConfig};
pub use error::{AudioFormatError, SinkClosed, SynthesisError};
pub use frame::{AudioFormat, AudioFrame};
pub use normalize::normalize;
pub use piper::PiperSynthesizer;
pub use segment::{Boundary, SentenceSegmenter, SentenceUnit};
pub use sink::{channel_sink, ChannelSink, MemorySink, OutputSink};
pub use stage::{FrameStream, SynthesisStage};
pub use synth::{RawAudio, RawBody, SpeechSynthesizer, VoiceSelector};
pub use voices::{detect_language, VoiceEntry, VoiceMap};
pub use wav::{encode_wav, encode_wav_base64, ContainerError, StreamingWavWriter};
