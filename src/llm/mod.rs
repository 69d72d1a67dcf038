//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Ollama / Mock）与嵌入 API

pub mod embedding;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod traits;

pub use embedding::{EmbeddingProvider, OllamaEmbedder, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use ollama::{OllamaClient, OLLAMA_BASE_URL};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{CompletionOptions, LlmClient, Message, Role};
