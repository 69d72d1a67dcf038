//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 返回构造时注入的固定补全文本，便于离线跑通 提取 → 解释执行 全流程。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, Message};

/// Mock 客户端：按注入顺序依次返回预置补全；用尽后重复最后一条
#[derive(Debug, Default)]
pub struct MockLlmClient {
    completions: Vec<String>,
    next: Mutex<usize>,
}

impl MockLlmClient {
    pub fn with_completion(completion: impl Into<String>) -> Self {
        Self {
            completions: vec![completion.into()],
            next: Mutex::new(0),
        }
    }

    pub fn with_completions(completions: Vec<String>) -> Self {
        Self {
            completions,
            next: Mutex::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, String> {
        if self.completions.is_empty() {
            return Err("MockLlmClient has no completions".to_string());
        }
        let mut next = self.next.lock().map_err(|e| e.to_string())?;
        let idx = (*next).min(self.completions.len() - 1);
        *next += 1;
        Ok(self.completions[idx].clone())
    }
}
