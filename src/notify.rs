//! User-visible notifications
//!
//! Every failure caught by the orchestrator ends up here as a short category
//! label plus the underlying message.

use std::fmt;

use crate::Error;

/// Notification category, shown as the title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    /// Microphone access or capture failure
    Microphone,
    /// Speech-to-text failure
    Transcription,
    /// Speech synthesis failure
    Synthesis,
    /// Audio decoding or playback failure
    Audio,
    /// Anything else, including query failures
    Error,
}

impl NotificationCategory {
    /// Title shown to the user
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Microphone => "Microphone error",
            Self::Transcription => "Speech recognition error",
            Self::Synthesis => "Speech synthesis error",
            Self::Audio => "Audio error",
            Self::Error => "Error",
        }
    }
}

/// A failure reported to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Category label
    pub category: NotificationCategory,
    /// Underlying message text
    pub message: String,
}

impl Notification {
    /// Build a notification
    #[must_use]
    pub fn new(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Categorize an error
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        let category = match err {
            Error::MicrophoneUnavailable(_)
            | Error::NoActiveCapture
            | Error::CaptureAlreadyInProgress => NotificationCategory::Microphone,
            Error::TranscriptionFailed(_) => NotificationCategory::Transcription,
            Error::SynthesisFailed(_) => NotificationCategory::Synthesis,
            Error::PlaybackFailed(_) | Error::Audio(_) => NotificationCategory::Audio,
            _ => NotificationCategory::Error,
        };
        Self::new(category, err.to_string())
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category.label(), self.message)
    }
}

/// Receives user-visible notifications
pub trait Notifier: Send + Sync {
    /// Show a notification
    fn notify(&self, notification: Notification);
}

/// Prints notifications to stderr
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        eprintln!("[{}] {}", notification.category.label(), notification.message);
    }
}
