//! Jarvis client - voice and text chat with a remote assistant
//!
//! This library provides the client side of a Jarvis conversation:
//! - Microphone capture as an explicit `idle -> recording -> processing` state machine
//! - Clients for the speech-to-text, query and text-to-speech services
//! - Speech playback with per-utterance lifecycle events
//! - A conversation orchestrator that sequences the pipeline and reports failures
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   clip   ┌──────────────┐  text  ┌──────────────┐
//! │   Capture    ├─────────►│ Transcription├───────►│              │
//! └──────────────┘          └──────────────┘        │              │
//!                                     typed text ──►│ Orchestrator │
//! ┌──────────────┐  audio   ┌──────────────┐ answer │              │◄──► Query
//! │   Playback   │◄─────────┤  Synthesis   │◄───────┤              │
//! └──────────────┘          └──────────────┘        └──────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod health;
pub mod http;
pub mod notify;
pub mod query;
pub mod voice;

pub use config::Config;
pub use conversation::{
    ConversationMessage, ConversationSession, Orchestrator, Role, SpeechOutcome, Status,
    TurnOutcome, VoiceOutcome,
};
pub use error::{Error, Result};
pub use notify::{ConsoleNotifier, Notification, NotificationCategory, Notifier};
pub use query::{QueryBackend, QueryClient, QueryResult, ToolCall, ToolResult};
