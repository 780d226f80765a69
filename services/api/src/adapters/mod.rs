pub mod claude_llm;
pub mod db;
pub mod gemini_llm;
pub mod memory;
pub mod openai_llm;
mod sse;

pub use claude_llm::ClaudeChatAdapter;
pub use db::DbAdapter;
pub use gemini_llm::GeminiChatAdapter;
pub use memory::MemoryStore;
pub use openai_llm::OpenAiChatAdapter;
