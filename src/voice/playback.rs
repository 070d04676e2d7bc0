//! Audio playback to speakers
//!
//! [`PlaybackController::play`] is fire-and-forget: each call decodes and plays
//! its payload on the blocking pool and reports `started`, then exactly one of
//! `ended` or `error`, tagged with the call's utterance id.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::broadcast;

use crate::{Error, Result};

/// Capacity of the lifecycle event channel
const EVENT_CAPACITY: usize = 64;

/// Extra time allowed past the nominal clip length before giving up
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Decoded mono samples ready for an output device
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl DecodedAudio {
    /// Wrap mono samples
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Mono samples in `[-1.0, 1.0]`
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Nominal playing time
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let ms = (self.samples.len() as u64 * 1000) / u64::from(self.sample_rate);
        Duration::from_millis(ms)
    }
}

/// Output device seam
///
/// The real implementation is [`SpeakerSink`]; tests substitute a fake.
pub trait AudioSink: Send + Sync {
    /// Play samples to completion, returning early once `stop` is raised
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or fails mid-stream
    fn play_blocking(&self, audio: &DecodedAudio, stop: &AtomicBool) -> Result<()>;
}

/// Lifecycle stage of one playback attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEventKind {
    /// Audio started playing
    Started,
    /// Audio finished or was abandoned for a newer utterance
    Ended,
    /// Decoding or output failed
    Error(String),
}

/// Playback lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    /// Utterance the event belongs to
    pub utterance: u64,
    /// What happened
    pub kind: PlaybackEventKind,
}

/// Per-call playback state
///
/// Releasing is idempotent: only the first call reports `true`.
#[derive(Debug)]
pub struct PlaybackHandle {
    utterance: u64,
    released: AtomicBool,
    stop: AtomicBool,
}

impl PlaybackHandle {
    fn new(utterance: u64) -> Self {
        Self {
            utterance,
            released: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    /// Utterance id carried by this attempt's events
    #[must_use]
    pub const fn utterance(&self) -> u64 {
        self.utterance
    }

    /// Release the attempt's resources; `true` only for the first release
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Whether the attempt has been released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Ask the sink to stop early
    pub fn abandon(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

type CurrentSlot = Arc<Mutex<Option<Arc<PlaybackHandle>>>>;

/// Called with the utterance id and message of every failed attempt
type FailureHook = Arc<dyn Fn(u64, &str) + Send + Sync>;

fn lock_slot(slot: &Mutex<Option<Arc<PlaybackHandle>>>) -> MutexGuard<'_, Option<Arc<PlaybackHandle>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Plays synthesized speech and publishes lifecycle events
pub struct PlaybackController {
    sink: Arc<dyn AudioSink>,
    events: broadcast::Sender<PlaybackEvent>,
    current: CurrentSlot,
    next_utterance: AtomicU64,
    on_failure: Option<FailureHook>,
}

impl PlaybackController {
    /// Create a controller over an output sink
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sink,
            events,
            current: Arc::new(Mutex::new(None)),
            next_utterance: AtomicU64::new(0),
            on_failure: None,
        }
    }

    /// Run `hook` for every failed attempt, before its `error` event is sent
    ///
    /// The hook runs on the playback thread.
    pub fn on_failure(&mut self, hook: impl Fn(u64, &str) + Send + Sync + 'static) {
        self.on_failure = Some(Arc::new(hook));
    }

    /// Observe lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Whether an utterance is currently playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        lock_slot(&self.current).is_some()
    }

    /// Start playing an encoded payload (WAV or MP3) without waiting for it
    ///
    /// A playback already in flight is abandoned. Must be called within a Tokio runtime.
    pub fn play(&self, payload: Vec<u8>) -> Arc<PlaybackHandle> {
        let utterance = self.next_utterance.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Arc::new(PlaybackHandle::new(utterance));

        if let Some(previous) = lock_slot(&self.current).replace(Arc::clone(&handle)) {
            tracing::debug!(
                previous = previous.utterance(),
                utterance,
                "abandoning previous playback"
            );
            previous.abandon();
        }

        let attempt = Attempt {
            handle: Arc::clone(&handle),
            events: self.events.clone(),
            current: Arc::clone(&self.current),
            on_failure: self.on_failure.clone(),
        };
        let sink = Arc::clone(&self.sink);

        tracing::debug!(utterance, payload_bytes = payload.len(), "playback queued");
        tokio::task::spawn_blocking(move || attempt.run(sink.as_ref(), &payload));

        handle
    }

    /// Abandon whatever is playing
    pub fn stop(&self) {
        if let Some(current) = lock_slot(&self.current).as_ref() {
            current.abandon();
        }
    }
}

/// One fire-and-forget playback run
struct Attempt {
    handle: Arc<PlaybackHandle>,
    events: broadcast::Sender<PlaybackEvent>,
    current: CurrentSlot,
    on_failure: Option<FailureHook>,
}

impl Attempt {
    fn run(self, sink: &dyn AudioSink, payload: &[u8]) {
        let audio = match decode_audio(payload) {
            Ok(audio) => audio,
            Err(e) => return self.finish(PlaybackEventKind::Error(failure_message(e))),
        };

        if self.handle.is_abandoned() {
            return self.finish(PlaybackEventKind::Ended);
        }

        self.emit(PlaybackEventKind::Started);
        let result = sink.play_blocking(&audio, &self.handle.stop);
        drop(audio);

        match result {
            Ok(()) => self.finish(PlaybackEventKind::Ended),
            Err(e) => self.finish(PlaybackEventKind::Error(failure_message(e))),
        }
    }

    fn emit(&self, kind: PlaybackEventKind) {
        // No subscribers is fine
        let _ = self.events.send(PlaybackEvent {
            utterance: self.handle.utterance(),
            kind,
        });
    }

    fn finish(&self, kind: PlaybackEventKind) {
        if !self.handle.release() {
            return;
        }

        {
            let mut current = lock_slot(&self.current);
            if current
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, &self.handle))
            {
                *current = None;
            }
        }

        tracing::debug!(utterance = self.handle.utterance(), ?kind, "playback finished");
        if let (PlaybackEventKind::Error(message), Some(hook)) = (&kind, &self.on_failure) {
            hook(self.handle.utterance(), message);
        }
        self.emit(kind);
    }
}

impl Drop for Attempt {
    // Covers a sink that panics before reporting; no-op once finished
    fn drop(&mut self) {
        self.finish(PlaybackEventKind::Error("playback task aborted".to_string()));
    }
}

fn failure_message(err: Error) -> String {
    match err {
        Error::PlaybackFailed(message) => message,
        other => other.to_string(),
    }
}

/// Plays audio on the default output device
#[derive(Debug, Default)]
pub struct SpeakerSink;

impl SpeakerSink {
    /// Create a sink for the default output device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioSink for SpeakerSink {
    fn play_blocking(&self, audio: &DecodedAudio, stop: &AtomicBool) -> Result<()> {
        if audio.samples().is_empty() {
            return Ok(());
        }

        let failed = |e: &dyn std::fmt::Display| Error::PlaybackFailed(e.to_string());
        let rate = SampleRate(audio.sample_rate());

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::PlaybackFailed("no output device available".to_string()))?;

        let fits_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        };
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| failed(&e))?
            .find(|c| c.channels() == 1 && fits_rate(c))
            .or_else(|| {
                // Fallback: try stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| c.channels() == 2 && fits_rate(c))
            })
            .ok_or_else(|| Error::PlaybackFailed("no suitable output config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();
        let channels = usize::from(config.channels.max(1));

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = audio.sample_rate(),
            channels,
            "audio playback initialized"
        );

        let samples = Arc::clone(&audio.samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let cb_position = Arc::clone(&position);
        let cb_finished = Arc::clone(&finished);
        let cb_failure = Arc::clone(&failure);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = cb_position.load(Ordering::Relaxed);
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            cb_finished.store(true, Ordering::Release);
                            0.0
                        });
                        if pos < samples.len() {
                            cb_position.store(pos + 1, Ordering::Relaxed);
                        }
                        frame.fill(sample);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    if let Ok(mut slot) = cb_failure.lock() {
                        slot.get_or_insert_with(|| err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| failed(&e))?;

        stream.play().map_err(|e| failed(&e))?;

        // Poll for completion with timeout
        let deadline = Instant::now() + audio.duration() + DRAIN_GRACE;
        while !finished.load(Ordering::Acquire) && !stop.load(Ordering::Acquire) {
            if lock_failure(&failure).is_some() || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(stream);

        if let Some(message) = lock_failure(&failure).take() {
            return Err(Error::PlaybackFailed(message));
        }

        tracing::debug!(
            samples = position.load(Ordering::Relaxed),
            stopped_early = stop.load(Ordering::Acquire),
            "playback complete"
        );
        Ok(())
    }
}

fn lock_failure(slot: &Mutex<Option<String>>) -> MutexGuard<'_, Option<String>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decode a WAV or MP3 payload to mono f32 samples
///
/// # Errors
///
/// Returns error if the payload is empty or cannot be decoded
pub fn decode_audio(payload: &[u8]) -> Result<DecodedAudio> {
    if payload.is_empty() {
        return Err(Error::Audio("empty audio payload".to_string()));
    }

    if payload.starts_with(b"RIFF") {
        decode_wav(payload)
    } else {
        decode_mp3(payload)
    }
}

/// Decode WAV bytes, averaging channels down to mono
#[allow(clippy::cast_precision_loss)]
fn decode_wav(wav_data: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, hound::Error>>(),
        hound::SampleFormat::Int => {
            let scale = (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()
        }
    }
    .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(DecodedAudio::new(samples, spec.sample_rate))
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate.get_or_insert(frame.sample_rate);

                // Convert i16 samples to f32 and handle stereo to mono
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let sample_rate = sample_rate
        .and_then(|r| u32::try_from(r).ok())
        .ok_or_else(|| Error::Audio("no MP3 frames found".to_string()))?;

    Ok(DecodedAudio::new(samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, frames: &[Vec<i16>]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in frames {
                for &s in frame {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_mono_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let wav = wav_bytes(spec, &[vec![16384], vec![-16384], vec![0]]);

        let audio = decode_audio(&wav).unwrap();
        assert_eq!(audio.sample_rate(), 22050);
        assert_eq!(audio.samples().len(), 3);
        assert!((audio.samples()[0] - 0.5).abs() < 1e-3);
        assert!((audio.samples()[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let wav = wav_bytes(spec, &[vec![16384, 0], vec![-16384, -16384]]);

        let audio = decode_audio(&wav).unwrap();
        assert_eq!(audio.samples().len(), 2);
        assert!((audio.samples()[0] - 0.25).abs() < 1e-3);
        assert!((audio.samples()[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn empty_payload_is_an_error() {
        assert!(decode_audio(&[]).is_err());
    }

    #[test]
    fn garbage_is_not_mp3() {
        assert!(decode_audio(b"definitely not audio data").is_err());
    }

    #[test]
    fn duration_from_rate() {
        let audio = DecodedAudio::new(vec![0.0; 24000], 24000);
        assert_eq!(audio.duration(), Duration::from_secs(1));
        assert_eq!(DecodedAudio::new(vec![0.0; 10], 0).duration(), Duration::ZERO);
    }

    #[test]
    fn release_is_idempotent() {
        let handle = PlaybackHandle::new(7);
        assert!(!handle.is_released());
        assert!(handle.release());
        assert!(!handle.release());
        assert!(handle.is_released());
        assert_eq!(handle.utterance(), 7);
    }
}
