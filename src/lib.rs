//! voxchat: a chat client that speaks its replies while they stream in.
//!
//! A user message goes to a remote chat endpoint; the reply arrives either
//! whole or as a `data:` event stream:
//! chat transport → decoder → accumulator → segmenter → TTS → speaker
//!
//! # Architecture
//!
//! - **Chat transport**: [`llm::HttpChatTransport`] posts the message with
//!   prior turns and detects streamed vs. complete replies
//! - **Decoder**: [`llm::decode_events`] turns the body into content deltas
//! - **Segmenter**: cuts speakable units off the pending text
//! - **Synthesis**: one [`tts::SpeechSynthesizer`] call per unit, concurrently
//! - **Playback**: clips play one at a time in emission order
//! - **Controller**: [`ConversationController`] runs turns, live mode and
//!   conversation history

pub mod audio;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod tts;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use pipeline::coordinator::{ConversationController, TurnHandle, TurnOutcome};
pub use pipeline::messages::Transcript;
pub use runtime::{ConversationEvent, ConversationMode};
