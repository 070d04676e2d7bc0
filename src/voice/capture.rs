//! Microphone capture state machine
//!
//! `idle --start--> recording --stop--> processing --finalize--> idle`
//!
//! The device stream is owned by a `RecordingSession` and released when the
//! session finishes or is dropped, so no exit path leaves the microphone open.

use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::watch;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Container type of finished clips
pub const CLIP_MIME_TYPE: &str = "audio/wav";

/// File name finished clips are uploaded under
pub const CLIP_FILE_NAME: &str = "audio.wav";

/// Recording state, observable through [`CaptureController::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No recording session
    #[default]
    Idle,
    /// Microphone open, chunks accumulating
    Recording,
    /// Device stopped, clip being assembled
    Processing,
}

impl CaptureState {
    /// Human-readable label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Processing => "processing",
        }
    }
}

/// A finished recording ready for transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    frames: usize,
}

impl AudioClip {
    /// Wrap WAV bytes, validating the header
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a readable WAV file
    pub fn from_wav(bytes: Vec<u8>) -> Result<Self> {
        let reader =
            hound::WavReader::new(Cursor::new(&bytes)).map_err(|e| Error::Audio(e.to_string()))?;
        let frames = reader.duration() as usize;
        Ok(Self { bytes, frames })
    }

    /// Encoded clip bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of audio frames in the clip
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.frames
    }

    /// Whether the clip carries no audio
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames == 0 || self.bytes.is_empty()
    }

    /// MIME type of the encoded clip
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        CLIP_MIME_TYPE
    }

    /// Upload file name
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        CLIP_FILE_NAME
    }
}

/// Source of microphone streams
///
/// The real implementation is [`MicrophoneDevice`]; tests substitute a fake.
pub trait CaptureDevice {
    /// Request microphone access and begin delivering chunks
    ///
    /// # Errors
    ///
    /// Returns error if access is denied or the device fails
    fn open(&mut self) -> Result<Box<dyn CaptureStream>>;

    /// Sample rate of the delivered samples
    fn sample_rate(&self) -> u32;
}

/// An open microphone stream
pub trait CaptureStream {
    /// Take the chunks delivered since the last call
    fn take_chunks(&mut self) -> Vec<Vec<f32>>;

    /// Stop the device and release its tracks
    fn release(&mut self);
}

/// One capture attempt: the open stream plus the chunks it produced
struct RecordingSession {
    stream: Box<dyn CaptureStream>,
    chunks: Vec<Vec<f32>>,
    released: bool,
}

impl RecordingSession {
    fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self {
            stream,
            chunks: Vec::new(),
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stream.release();
            tracing::debug!("microphone released");
        }
    }

    /// Move chunks delivered so far into the session, returning the new ones
    fn pump(&mut self) -> &[Vec<f32>] {
        let fresh = self.stream.take_chunks();
        let start = self.chunks.len();
        self.chunks.extend(fresh);
        &self.chunks[start..]
    }

    /// Stop the device, then flush whatever it buffered before stopping
    fn finish(mut self) -> Vec<Vec<f32>> {
        self.release();
        let tail = self.stream.take_chunks();
        let mut chunks = std::mem::take(&mut self.chunks);
        chunks.extend(tail);
        chunks
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Samples from a stopped session, not yet encoded
#[derive(Debug)]
pub struct PendingClip {
    chunks: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PendingClip {
    /// Concatenate the chunks and encode them as a WAV clip
    ///
    /// Encoding runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub async fn finalize(self) -> Result<AudioClip> {
        let Self {
            chunks,
            sample_rate,
        } = self;

        tokio::task::spawn_blocking(move || {
            let samples = chunks.concat();
            let frames = samples.len();
            let bytes = samples_to_wav(&samples, sample_rate)?;
            tracing::debug!(frames, bytes = bytes.len(), "clip assembled");
            Ok(AudioClip { bytes, frames })
        })
        .await
        .map_err(|e| Error::Audio(format!("clip encoding task failed: {e}")))?
    }
}

/// Owns the microphone and the recording state machine
pub struct CaptureController {
    device: Box<dyn CaptureDevice>,
    session: Option<RecordingSession>,
    state: watch::Sender<CaptureState>,
}

impl CaptureController {
    /// Create a controller in the `idle` state
    #[must_use]
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            device,
            session: None,
            state,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Observe state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// Whether a recording session object exists
    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// `idle -> recording`
    ///
    /// # Errors
    ///
    /// `CaptureAlreadyInProgress` outside `idle`; `MicrophoneUnavailable` if
    /// the device cannot be opened (state stays `idle`)
    pub fn start(&mut self) -> Result<()> {
        if self.state() != CaptureState::Idle {
            return Err(Error::CaptureAlreadyInProgress);
        }

        let stream = self.device.open().map_err(|e| match e {
            Error::MicrophoneUnavailable(_) => e,
            other => Error::MicrophoneUnavailable(other.to_string()),
        })?;

        self.session = Some(RecordingSession::new(stream));
        self.state.send_replace(CaptureState::Recording);
        tracing::info!("recording started");
        Ok(())
    }

    /// `recording -> processing`: stop the device and hand back its samples
    ///
    /// # Errors
    ///
    /// `NoActiveCapture` when not recording; no state change in that case
    pub fn begin_stop(&mut self) -> Result<PendingClip> {
        if self.state() != CaptureState::Recording {
            return Err(Error::NoActiveCapture);
        }
        let session = self.session.take().ok_or(Error::NoActiveCapture)?;

        self.state.send_replace(CaptureState::Processing);
        let chunks = session.finish();
        tracing::debug!(chunks = chunks.len(), "recording stopped");

        Ok(PendingClip {
            chunks,
            sample_rate: self.device.sample_rate(),
        })
    }

    /// `processing -> idle`
    pub fn finish(&mut self) {
        self.state.send_if_modified(|state| {
            if *state == CaptureState::Processing {
                *state = CaptureState::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Stop recording and produce the finished clip
    ///
    /// The controller returns to `idle` whether or not encoding succeeds.
    ///
    /// # Errors
    ///
    /// `NoActiveCapture` when not recording, or an encoding failure
    pub async fn stop(&mut self) -> Result<AudioClip> {
        let pending = self.begin_stop()?;
        let clip = pending.finalize().await;
        self.finish();
        clip
    }

    /// Pull newly delivered chunks into the session
    ///
    /// Returns the RMS level of the new audio, or `None` when not recording.
    pub fn pump(&mut self) -> Option<f32> {
        let session = self.session.as_mut()?;
        let fresh = session.pump();
        let samples: Vec<f32> = fresh.iter().flatten().copied().collect();
        Some(calculate_rms(&samples))
    }

    /// Drop any active session without producing a clip
    ///
    /// Returns `true` if a recording was discarded. Outside `recording` this
    /// is a no-op; a clip being finalized is left to [`Self::finish`].
    pub fn cancel(&mut self) -> bool {
        if self.state() != CaptureState::Recording {
            return false;
        }
        let cancelled = self.session.take().is_some();
        self.state.send_replace(CaptureState::Idle);
        if cancelled {
            tracing::info!("recording cancelled");
        }
        cancelled
    }
}

/// Default input device via cpal
#[derive(Debug, Default)]
pub struct MicrophoneDevice;

impl MicrophoneDevice {
    /// Create a handle to the default input device
    ///
    /// The device is opened lazily on each recording.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CaptureDevice for MicrophoneDevice {
    fn open(&mut self) -> Result<Box<dyn CaptureStream>> {
        let unavailable = |e: &dyn std::fmt::Display| Error::MicrophoneUnavailable(e.to_string());

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::MicrophoneUnavailable("no input device available".to_string()))?;

        let fits_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        };
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| unavailable(&e))?
            .find(|c| c.channels() == 1 && fits_rate(c))
            .or_else(|| {
                // Fallback: any channel count, downmixed in the callback
                device.supported_input_configs().ok()?.find(fits_rate)
            })
            .ok_or_else(|| {
                Error::MicrophoneUnavailable("no suitable audio config found".to_string())
            })?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();
        let channels = usize::from(config.channels.max(1));

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels,
            "audio capture initialized"
        );

        let chunks = Arc::new(Mutex::new(Vec::<Vec<f32>>::new()));
        let sink = Arc::clone(&chunks);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if data.is_empty() {
                        return;
                    }
                    #[allow(clippy::cast_precision_loss)]
                    let chunk: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                            .collect()
                    };
                    if let Ok(mut buf) = sink.lock() {
                        buf.push(chunk);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| unavailable(&e))?;

        stream.play().map_err(|e| unavailable(&e))?;

        Ok(Box::new(MicrophoneStream {
            stream: Some(stream),
            chunks,
        }))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// A live cpal input stream
struct MicrophoneStream {
    stream: Option<Stream>,
    chunks: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl CaptureStream for MicrophoneStream {
    fn take_chunks(&mut self) -> Vec<Vec<f32>> {
        let mut buf = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buf)
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "failed to pause input stream");
            }
            drop(stream);
        }
    }
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
