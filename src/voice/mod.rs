//! Voice processing module
//!
//! Handles microphone capture, speech playback, and the STT/TTS service clients.

mod capture;
mod playback;
mod stt;
mod tts;

pub use capture::{
    AudioClip, CLIP_FILE_NAME, CLIP_MIME_TYPE, CaptureController, CaptureDevice, CaptureState,
    CaptureStream, MicrophoneDevice, PendingClip, SAMPLE_RATE, calculate_rms, samples_to_wav,
};
pub use playback::{
    AudioSink, DecodedAudio, PlaybackController, PlaybackEvent, PlaybackEventKind,
    PlaybackHandle, SpeakerSink, decode_audio,
};
pub use stt::{Transcriber, Transcription, TranscriptionClient};
pub use tts::{SynthesisClient, Synthesizer};
