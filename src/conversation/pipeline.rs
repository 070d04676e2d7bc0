//! The turn pipeline as explicit stages
//!
//! Each stage takes its input plus the collaborator it needs and returns the
//! stage's output or a failure already mapped to that stage's error variant.
//! The orchestrator composes them and decides which failures end the turn.

use crate::query::{QueryBackend, QueryResult};
use crate::voice::{AudioClip, Synthesizer, Transcriber, Transcription};
use crate::{Error, Result};

use super::PendingTurn;

/// Result of one text turn
#[derive(Debug)]
pub enum TurnOutcome {
    /// Nothing was sent: blank text, a turn already in flight, or the microphone active
    Ignored,
    /// The query failed; the user message stays in history
    Aborted(Error),
    /// The assistant answered; speech is a separate outcome
    Answered {
        /// The query service's answer
        result: QueryResult,
        /// What happened to the spoken answer
        speech: SpeechOutcome,
    },
}

/// Spoken half of an answered turn
#[derive(Debug)]
pub enum SpeechOutcome {
    /// Synthesized and handed to playback as this utterance
    Playing(u64),
    /// Synthesis failed; the text answer stands
    Skipped(Error),
}

/// Result of one voice-button press
#[derive(Debug)]
pub enum VoiceOutcome {
    /// Nothing happened: finalizing a clip, or a turn in flight
    Ignored,
    /// Recording started
    Recording,
    /// Capture or transcription failed; no message was added
    Failed(Error),
    /// The transcript went through the text path
    Turn(TurnOutcome),
}

impl TurnOutcome {
    /// The assistant's text, if the turn was answered
    #[must_use]
    pub fn response_text(&self) -> Option<&str> {
        match self {
            Self::Answered { result, .. } => Some(&result.response_text),
            _ => None,
        }
    }
}

/// Map any failure into `wrap`, keeping errors that already carry it
fn stage_error(err: Error, wrap: fn(String) -> Error) -> Error {
    let sample = wrap(String::new());
    if std::mem::discriminant(&err) == std::mem::discriminant(&sample) {
        err
    } else {
        wrap(err.to_string())
    }
}

/// Clip to transcript
///
/// # Errors
///
/// `TranscriptionFailed` for an empty clip, a service failure, or no recognized speech
pub async fn transcribe_stage(
    transcriber: &dyn Transcriber,
    clip: &AudioClip,
) -> Result<Transcription> {
    if clip.is_empty() {
        return Err(Error::TranscriptionFailed("no audio was captured".to_string()));
    }

    let transcription = transcriber
        .transcribe(clip)
        .await
        .map_err(|e| stage_error(e, Error::TranscriptionFailed))?;

    if transcription.text.trim().is_empty() {
        return Err(Error::TranscriptionFailed("no speech recognized".to_string()));
    }
    Ok(transcription)
}

/// Pending turn to answer
///
/// # Errors
///
/// `QueryFailed` on any service failure
pub async fn query_stage(backend: &dyn QueryBackend, turn: &PendingTurn) -> Result<QueryResult> {
    backend
        .query(&turn.query, &turn.history)
        .await
        .map_err(|e| stage_error(e, Error::QueryFailed))
}

/// Answer text to an encoded audio payload
///
/// # Errors
///
/// `SynthesisFailed` on any service failure
pub async fn synthesize_stage(synthesizer: &dyn Synthesizer, text: &str) -> Result<Vec<u8>> {
    synthesizer
        .synthesize(text)
        .await
        .map_err(|e| stage_error(e, Error::SynthesisFailed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_keeps_matching_variant() {
        let err = stage_error(Error::QueryFailed("boom".into()), Error::QueryFailed);
        assert_eq!(err.to_string(), "query failed: boom");
    }

    #[test]
    fn stage_error_wraps_other_variants() {
        let err = stage_error(
            Error::Config("bad url".into()),
            Error::SynthesisFailed,
        );
        assert!(matches!(
            err,
            Error::SynthesisFailed(msg) if msg == "configuration error: bad url"
        ));
    }
}
