//! Conversation state and turn orchestration

mod orchestrator;
pub mod pipeline;
mod session;

pub use orchestrator::{Orchestrator, Status};
pub use pipeline::{SpeechOutcome, TurnOutcome, VoiceOutcome};
pub use session::{ConversationMessage, ConversationSession, PendingTurn, Role};
