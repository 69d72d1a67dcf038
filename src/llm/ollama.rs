//! Ollama 原生 API 客户端
//!
//! 调用本地 Ollama 的 /api/chat（非流式），适合跑量化小模型作为工具调用后端。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{CompletionOptions, LlmClient, Message, Role};

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Ollama 客户端：持有 reqwest Client 与 model 名
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatRequestOptions,
}

#[derive(Serialize)]
struct ChatRequestOptions {
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or(OLLAMA_BASE_URL).trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn to_ollama_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| ChatMessage {
                role: match m.role {
                    Role::System => "system".to_string(),
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, String> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::to_ollama_messages(messages),
            stream: false,
            options: ChatRequestOptions {
                temperature: options.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("Ollama API error: HTTP {}", response.status()));
        }

        let body: ChatResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(body.message.content)
    }
}
