pub mod analysis;
pub mod chat;
pub mod embedding;
pub mod tts;

pub use analysis::AnalysisClient;
pub use chat::{ChatClient, ChatSurface, ChatTransport, Conversation, HttpChatTransport};
pub use embedding::EmbeddingClient;
pub use tts::TtsClient;
