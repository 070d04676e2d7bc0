//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jarvis_client::query::QueryBackend;
use jarvis_client::voice::{
    AudioClip, AudioSink, CaptureController, CaptureDevice, CaptureStream, DecodedAudio,
    PlaybackController, SAMPLE_RATE, Synthesizer, Transcriber, Transcription, samples_to_wav,
};
use jarvis_client::{
    ConversationMessage, Error, Notification, Notifier, Orchestrator, QueryResult, Result,
};

/// Generate sine wave audio samples
#[must_use]
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Short WAV payload standing in for synthesized speech
#[must_use]
pub fn speech_wav() -> Vec<u8> {
    samples_to_wav(&generate_sine_samples(440.0, 0.05, 0.3), SAMPLE_RATE).unwrap()
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Shared view into a fake microphone
#[derive(Clone, Default)]
pub struct MicProbe {
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    pending: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl MicProbe {
    /// Deliver a chunk as if the device produced it
    pub fn push(&self, chunk: Vec<f32>) {
        self.pending.lock().unwrap().push(chunk);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Microphone that delivers whatever the probe pushes
pub struct FakeDevice {
    probe: MicProbe,
    deny: bool,
}

impl FakeDevice {
    pub fn new(probe: &MicProbe) -> Self {
        Self {
            probe: probe.clone(),
            deny: false,
        }
    }

    /// Device that refuses access
    pub fn denied(probe: &MicProbe) -> Self {
        Self {
            probe: probe.clone(),
            deny: true,
        }
    }
}

impl CaptureDevice for FakeDevice {
    fn open(&mut self) -> Result<Box<dyn CaptureStream>> {
        if self.deny {
            return Err(Error::MicrophoneUnavailable("permission denied".to_string()));
        }
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            probe: self.probe.clone(),
        }))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

struct FakeStream {
    probe: MicProbe,
}

impl CaptureStream for FakeStream {
    fn take_chunks(&mut self) -> Vec<Vec<f32>> {
        std::mem::take(&mut *self.probe.pending.lock().unwrap())
    }

    fn release(&mut self) {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Remote services
// ---------------------------------------------------------------------------

/// Transcriber returning a fixed result
pub struct FakeTranscriber {
    result: std::result::Result<Transcription, String>,
    clips: Mutex<Vec<usize>>,
}

impl FakeTranscriber {
    pub fn hearing(text: &str, language: &str) -> Self {
        Self {
            result: Ok(Transcription {
                text: text.to_string(),
                language: language.to_string(),
                duration_seconds: Some(1.0),
            }),
            clips: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            result: Err(detail.to_string()),
            clips: Mutex::new(Vec::new()),
        }
    }

    /// Frame counts of the clips received
    pub fn clips(&self) -> Vec<usize> {
        self.clips.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcription> {
        self.clips.lock().unwrap().push(clip.frames());
        self.result.clone().map_err(Error::TranscriptionFailed)
    }
}

/// One recorded query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCall {
    pub query: String,
    pub history: Vec<ConversationMessage>,
}

type Responder = Box<dyn Fn(&str) -> Result<QueryResult> + Send + Sync>;

/// Query backend that records its calls
pub struct FakeQuery {
    respond: Responder,
    delay: Option<Duration>,
    calls: Mutex<Vec<QueryCall>>,
}

impl FakeQuery {
    /// Answer every query with `answer: <query>`
    pub fn echo() -> Self {
        Self::with(|q| Ok(QueryResult::text(format!("answer: {q}"))))
    }

    /// Answer every query with the same text
    pub fn answering(text: &str) -> Self {
        let text = text.to_string();
        Self::with(move |_| Ok(QueryResult::text(text.clone())))
    }

    pub fn failing(detail: &str) -> Self {
        let detail = detail.to_string();
        Self::with(move |_| Err(Error::QueryFailed(detail.clone())))
    }

    pub fn with(respond: impl Fn(&str) -> Result<QueryResult> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Take `delay` to answer
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<QueryCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryBackend for FakeQuery {
    async fn query(&self, text: &str, history: &[ConversationMessage]) -> Result<QueryResult> {
        self.calls.lock().unwrap().push(QueryCall {
            query: text.to_string(),
            history: history.to_vec(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(text)
    }
}

/// Synthesizer returning a short WAV, or failing
pub struct FakeSynth {
    fail: Option<String>,
    texts: Mutex<Vec<String>>,
}

impl FakeSynth {
    pub fn new() -> Self {
        Self {
            fail: None,
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            fail: Some(detail.to_string()),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        match &self.fail {
            Some(detail) => Err(Error::SynthesisFailed(detail.clone())),
            None => Ok(speech_wav()),
        }
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// How a fake sink behaves
#[derive(Debug, Clone)]
pub enum SinkMode {
    /// Return immediately
    Finish,
    /// Fail with this message
    Fail(String),
    /// Block until the stop flag is raised (bounded)
    HoldUntilStopped,
    /// Panic mid-playback
    Panic,
}

/// Output device that never touches hardware
pub struct FakeSink {
    mode: SinkMode,
    played: AtomicUsize,
    stopped_early: AtomicUsize,
}

impl FakeSink {
    pub fn new(mode: SinkMode) -> Self {
        Self {
            mode,
            played: AtomicUsize::new(0),
            stopped_early: AtomicUsize::new(0),
        }
    }

    pub fn played(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }

    pub fn stopped_early(&self) -> usize {
        self.stopped_early.load(Ordering::SeqCst)
    }
}

impl AudioSink for FakeSink {
    fn play_blocking(&self, _audio: &DecodedAudio, stop: &AtomicBool) -> Result<()> {
        self.played.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            SinkMode::Finish => Ok(()),
            SinkMode::Fail(message) => Err(Error::PlaybackFailed(message.clone())),
            SinkMode::HoldUntilStopped => {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !stop.load(Ordering::Acquire) && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                if stop.load(Ordering::Acquire) {
                    self.stopped_early.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
            SinkMode::Panic => panic!("output driver crashed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Notifier that keeps everything it is sent
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator harness
// ---------------------------------------------------------------------------

/// An orchestrator wired to fakes, with handles to inspect them
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub mic: MicProbe,
    pub transcriber: Arc<FakeTranscriber>,
    pub query: Arc<FakeQuery>,
    pub synth: Arc<FakeSynth>,
    pub sink: Arc<FakeSink>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    deny_mic: bool,
    transcriber: FakeTranscriber,
    query: FakeQuery,
    synth: FakeSynth,
    sink: SinkMode,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            deny_mic: false,
            transcriber: FakeTranscriber::hearing("hello", "en"),
            query: FakeQuery::echo(),
            synth: FakeSynth::new(),
            sink: SinkMode::Finish,
        }
    }

    /// Everything succeeds
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifier.notifications()
    }
}

impl HarnessBuilder {
    pub fn deny_mic(mut self) -> Self {
        self.deny_mic = true;
        self
    }

    pub fn transcriber(mut self, transcriber: FakeTranscriber) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn query(mut self, query: FakeQuery) -> Self {
        self.query = query;
        self
    }

    pub fn synth(mut self, synth: FakeSynth) -> Self {
        self.synth = synth;
        self
    }

    pub fn sink(mut self, mode: SinkMode) -> Self {
        self.sink = mode;
        self
    }

    pub fn build(self) -> Harness {
        let mic = MicProbe::default();
        let device = if self.deny_mic {
            FakeDevice::denied(&mic)
        } else {
            FakeDevice::new(&mic)
        };

        let transcriber = Arc::new(self.transcriber);
        let query = Arc::new(self.query);
        let synth = Arc::new(self.synth);
        let sink = Arc::new(FakeSink::new(self.sink));
        let notifier = Arc::new(RecordingNotifier::default());

        let orchestrator = Orchestrator::new(
            CaptureController::new(Box::new(device)),
            transcriber.clone(),
            query.clone(),
            synth.clone(),
            PlaybackController::new(sink.clone()),
            notifier.clone(),
        );

        Harness {
            orchestrator,
            mic,
            transcriber,
            query,
            synth,
            sink,
            notifier,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Serve `app` on an ephemeral local port, returning its base URL
pub async fn spawn_server(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Wait until `check` holds, polling briefly
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
