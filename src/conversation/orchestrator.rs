//! Conversation orchestrator
//!
//! Sequences capture, transcription, query, synthesis and playback for the
//! typed and spoken paths. Every failure is caught here, reported through the
//! [`Notifier`], and the busy flag is cleared on every exit path.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::config::Config;
use crate::http::build_client;
use crate::notify::{Notification, NotificationCategory, Notifier};
use crate::query::{QueryBackend, QueryClient};
use crate::voice::{
    CaptureController, CaptureState, MicrophoneDevice, PlaybackController, SpeakerSink,
    SynthesisClient, Synthesizer, Transcriber, TranscriptionClient,
};
use crate::{Error, Result};

use super::pipeline::{
    SpeechOutcome, TurnOutcome, VoiceOutcome, query_stage, synthesize_stage, transcribe_stage,
};
use super::{ConversationMessage, ConversationSession};

/// Snapshot of what the client is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Microphone state
    pub capture: CaptureState,
    /// A turn is in flight
    pub busy: bool,
    /// An utterance is playing
    pub speaking: bool,
}

/// Holds the busy flag for one turn and clears it on drop
struct BusyGuard<'a> {
    session: &'a watch::Sender<ConversationSession>,
}

impl<'a> BusyGuard<'a> {
    /// Set the busy flag, or `None` if a turn already holds it
    fn acquire(session: &'a watch::Sender<ConversationSession>) -> Option<Self> {
        let acquired = session.send_if_modified(|s| {
            if s.is_busy() {
                false
            } else {
                *s = std::mem::take(s).set_busy(true);
                true
            }
        });
        acquired.then_some(Self { session })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.session
            .send_modify(|s| *s = std::mem::take(s).set_busy(false));
    }
}

/// Top-level coordinator for one conversation
pub struct Orchestrator {
    session: watch::Sender<ConversationSession>,
    capture: Mutex<CaptureController>,
    transcriber: Arc<dyn Transcriber>,
    query: Arc<dyn QueryBackend>,
    synthesizer: Arc<dyn Synthesizer>,
    playback: PlaybackController,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators
    ///
    /// Playback failures are reported to the notifier as they happen.
    #[must_use]
    pub fn new(
        capture: CaptureController,
        transcriber: Arc<dyn Transcriber>,
        query: Arc<dyn QueryBackend>,
        synthesizer: Arc<dyn Synthesizer>,
        mut playback: PlaybackController,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let reporter = Arc::clone(&notifier);
        playback.on_failure(move |utterance, message| {
            tracing::warn!(utterance, %message, "playback failed");
            reporter.notify(Notification::new(
                NotificationCategory::Audio,
                Error::PlaybackFailed(message.to_string()).to_string(),
            ));
        });

        let (session, _) = watch::channel(ConversationSession::new());
        Self {
            session,
            capture: Mutex::new(capture),
            transcriber,
            query,
            synthesizer,
            playback,
            notifier,
        }
    }

    /// Wire the real microphone, speakers and service clients
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = build_client(config.request_timeout)?;
        let endpoints = &config.endpoints;

        Ok(Self::new(
            CaptureController::new(Box::new(MicrophoneDevice::new())),
            Arc::new(TranscriptionClient::new(client.clone(), &endpoints.asr_url)),
            Arc::new(QueryClient::new(client.clone(), &endpoints.orchestrator_url)),
            Arc::new(SynthesisClient::new(
                client,
                &endpoints.tts_url,
                config.voice.tts_speed,
            )),
            PlaybackController::new(Arc::new(SpeakerSink::new())),
            notifier,
        ))
    }

    fn capture(&self) -> MutexGuard<'_, CaptureController> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, err: &Error) {
        if err.aborts_turn() {
            tracing::error!(error = %err, "turn failed");
        } else {
            tracing::warn!(error = %err, "speech skipped");
        }
        self.notifier.notify(Notification::from_error(err));
    }

    /// Send typed text as one turn
    ///
    /// Ignored while a turn is in flight, while the microphone is active, or
    /// when the text is blank.
    pub async fn send_text(&self, text: &str) -> TurnOutcome {
        let capture = self.capture().state();
        if capture != CaptureState::Idle {
            tracing::debug!(state = capture.label(), "text ignored while microphone active");
            return TurnOutcome::Ignored;
        }

        let Some(_busy) = BusyGuard::acquire(&self.session) else {
            tracing::debug!("text ignored while busy");
            return TurnOutcome::Ignored;
        };

        self.run_turn(text).await
    }

    /// Voice button: start recording when idle, finish the turn when recording
    pub async fn send_voice(&self) -> VoiceOutcome {
        let state = self.capture().state();
        match state {
            CaptureState::Idle => self.start_recording(),
            CaptureState::Recording => self.finish_recording().await,
            CaptureState::Processing => {
                tracing::debug!("voice ignored while finalizing a clip");
                VoiceOutcome::Ignored
            }
        }
    }

    fn start_recording(&self) -> VoiceOutcome {
        if self.session.borrow().is_busy() {
            tracing::debug!("voice ignored while busy");
            return VoiceOutcome::Ignored;
        }

        let started = self.capture().start();
        match started {
            Ok(()) => VoiceOutcome::Recording,
            Err(e) => {
                self.report(&e);
                VoiceOutcome::Failed(e)
            }
        }
    }

    async fn finish_recording(&self) -> VoiceOutcome {
        let Some(_busy) = BusyGuard::acquire(&self.session) else {
            return VoiceOutcome::Ignored;
        };

        let pending = self.capture().begin_stop();
        let pending = match pending {
            Ok(pending) => pending,
            Err(e) => {
                self.report(&e);
                return VoiceOutcome::Failed(e);
            }
        };

        let clip = pending.finalize().await;
        self.capture().finish();

        let transcription = match clip {
            Ok(clip) => transcribe_stage(self.transcriber.as_ref(), &clip).await,
            Err(e) => Err(e),
        };

        match transcription {
            Ok(transcription) => VoiceOutcome::Turn(self.run_turn(&transcription.text).await),
            Err(e) => {
                self.report(&e);
                VoiceOutcome::Failed(e)
            }
        }
    }

    /// Query, answer, speak. The caller holds the busy flag.
    async fn run_turn(&self, text: &str) -> TurnOutcome {
        let mut pending = None;
        self.session.send_if_modified(|s| {
            let (next, turn) = std::mem::take(s).submit(text);
            *s = next;
            pending = turn;
            pending.is_some()
        });
        let Some(turn) = pending else {
            return TurnOutcome::Ignored;
        };

        let result = match query_stage(self.query.as_ref(), &turn).await {
            Ok(result) => result,
            Err(e) => {
                self.report(&e);
                return TurnOutcome::Aborted(e);
            }
        };

        self.session
            .send_modify(|s| *s = std::mem::take(s).respond(result.response_text.as_str()));

        let speech = self.speak(&result.response_text).await;
        TurnOutcome::Answered { result, speech }
    }

    async fn speak(&self, text: &str) -> SpeechOutcome {
        match synthesize_stage(self.synthesizer.as_ref(), text).await {
            Ok(audio) => SpeechOutcome::Playing(self.playback.play(audio).utterance()),
            Err(e) => {
                self.report(&e);
                SpeechOutcome::Skipped(e)
            }
        }
    }

    /// Discard an active recording without transcribing it
    pub fn cancel_recording(&self) -> bool {
        self.capture().cancel()
    }

    /// Pull new microphone audio, returning its level while recording
    pub fn pump_capture(&self) -> Option<f32> {
        self.capture().pump()
    }

    /// Clear the history; refused while a turn or recording is active
    pub fn reset(&self) -> bool {
        if self.capture().state() != CaptureState::Idle {
            return false;
        }
        self.session.send_if_modified(|s| {
            if s.is_busy() {
                false
            } else {
                *s = std::mem::take(s).reset();
                true
            }
        })
    }

    /// Copy of the history
    #[must_use]
    pub fn history(&self) -> Vec<ConversationMessage> {
        self.session.borrow().history().to_vec()
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> Status {
        Status {
            capture: self.capture().state(),
            busy: self.session.borrow().is_busy(),
            speaking: self.playback.is_playing(),
        }
    }

    /// Observe session changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationSession> {
        self.session.subscribe()
    }

    /// Observe microphone state changes
    #[must_use]
    pub fn subscribe_capture(&self) -> watch::Receiver<CaptureState> {
        self.capture().subscribe()
    }

    /// The playback controller
    #[must_use]
    pub const fn playback(&self) -> &PlaybackController {
        &self.playback
    }
}
