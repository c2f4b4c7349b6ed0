//! Chatbot module - wellness conversations relayed to a completion API.

pub mod commands;
pub mod comparison;
pub mod completion;
pub mod crisis;
pub mod database;
pub mod dedup;
pub mod engine;
pub mod history;
pub mod message;
pub mod profile;
pub mod prompt;
pub mod replies;
pub mod telegram;


pub use completion::OpenAiClient;
pub use database::Database;
pub use engine::{ChatbotEngine, EngineConfig};
pub use history::ConversationStore;
pub use message::{InboundContent, InboundMessage};
pub use profile::ModeSelector;
pub use telegram::TelegramClient;
