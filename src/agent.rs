//! 工具调用 Agent 编排
//!
//! run() 的数据流：归一化输入消息 → 选定暴露的工具目录（全量，或经工具索引取
//! 与查询最近的 top-k）→ 渲染系统消息插入队首 → 调用后端取补全 →
//! dry_run 时原样返回，否则交给 pythonic 引擎提取并执行。
//! 工具描述符与索引只读、可跨并发运行共享；执行环境与调用台账每次运行独占。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::config::{load_config, AppConfig, BackendKind};
use crate::error::AgentError;
use crate::llm::{
    CompletionOptions, EmbeddingProvider, LlmClient, Message, OllamaClient, OllamaEmbedder,
    OpenAiClient, OpenAiEmbedder, Role,
};
use crate::pythonic::{execute_tool_call, ExecutionOptions, ExecutionResults};
use crate::tools::{Tool, ToolDescriptor, ToolIndex, ToolRegistry};

/// 系统提示模板；{{functions_schema}} 替换为选定工具的函数描述块
const SYSTEM_PROMPT: &str = r#"You are an expert AI assistant that solves tasks by writing short Python code which calls the functions provided below.

You may only call these functions:
<|functions_schema|>
{{functions_schema}}
<|end_functions_schema|>

Rules:
- Reply with exactly one fenced code block (```) and nothing else.
- Assign the result of every function call to a variable.
- Use only the functions above, literals, arithmetic, comparisons, f-strings, if/elif/else and for loops.
- Never import modules, define functions or classes, or access attributes.
"#;

/// run() 的输入：单条查询串或完整消息列表
pub enum AgentInput {
    Query(String),
    Messages(Vec<Message>),
}

impl From<&str> for AgentInput {
    fn from(query: &str) -> Self {
        Self::Query(query.to_string())
    }
}

impl From<String> for AgentInput {
    fn from(query: String) -> Self {
        Self::Query(query)
    }
}

impl From<Vec<Message>> for AgentInput {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

/// 单次 run 的选项
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// 只取补全不执行；不会有任何工具副作用
    pub dry_run: bool,
    /// 经索引暴露的工具数；None 用配置默认值
    pub num_tools: Option<usize>,
    /// 注入执行环境的上下文变量
    pub context_vars: Map<String, Value>,
}

/// 工具调用 Agent：持有后端客户端、工具注册表与可选的嵌入索引
pub struct ToolCallingAgent {
    client: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<ToolIndex>,
    completion_options: CompletionOptions,
    request_timeout: Duration,
    execution_options: ExecutionOptions,
    default_num_tools: usize,
}

impl ToolCallingAgent {
    /// 用现成客户端构建（测试注入 Mock 也走这里）；不建索引，prompt 带全量工具
    pub fn new(client: Arc<dyn LlmClient>, registry: ToolRegistry, cfg: &AppConfig) -> Self {
        let execution_timeout = match cfg.engine.execution_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            client,
            registry,
            embedder: None,
            index: None,
            completion_options: CompletionOptions {
                temperature: cfg.llm.temperature,
                max_tokens: None,
            },
            request_timeout: Duration::from_secs(cfg.llm.request_timeout_secs),
            execution_options: ExecutionOptions {
                restricted: cfg.engine.restricted,
                timeout: execution_timeout,
            },
            default_num_tools: cfg.embedding.default_num_tools,
        }
    }

    /// 附加嵌入器并为全部已注册工具建立索引（每个描述符渲染文本各嵌入一次）
    pub async fn with_embedder(
        mut self,
        embedder: Arc<dyn EmbeddingProvider>,
        dim: usize,
        capacity: usize,
    ) -> Result<Self, AgentError> {
        let mut index = ToolIndex::new(dim, capacity);
        let renders: Vec<String> = self
            .registry
            .descriptors()
            .iter()
            .map(|d| d.render())
            .collect();
        let vectors = embedder
            .embed_batch(&renders)
            .await
            .map_err(AgentError::EmbeddingError)?;
        if vectors.len() != renders.len() {
            return Err(AgentError::EmbeddingError(format!(
                "expected {} vectors, got {}",
                renders.len(),
                vectors.len()
            )));
        }
        for (vector, descriptor) in vectors.into_iter().zip(self.registry.descriptors()) {
            index.insert(vector, descriptor.clone())?;
        }
        tracing::info!(tools = index.len(), "tool index built");
        self.embedder = Some(embedder);
        self.index = Some(index);
        Ok(self)
    }

    /// 跑一次查询；后端/嵌入失败返回 Err，生成代码内的失败进返回值的 errors
    pub async fn run(
        &self,
        input: impl Into<AgentInput>,
        options: RunOptions,
    ) -> Result<ExecutionResults, AgentError> {
        let mut messages = match input.into() {
            AgentInput::Query(query) => vec![Message::user(query)],
            AgentInput::Messages(messages) => messages,
        };

        let descriptors = self.select_tools(&messages, options.num_tools).await?;
        let schema: Vec<String> = descriptors.iter().map(|d| d.render()).collect();
        let system = SYSTEM_PROMPT.replace("{{functions_schema}}", &schema.join("\n\n"));
        messages.insert(0, Message::system(system));

        let completion = match timeout(
            self.request_timeout,
            self.client.complete(&messages, &self.completion_options),
        )
        .await
        {
            Ok(Ok(content)) => content,
            Ok(Err(message)) => return Err(AgentError::LlmError(message)),
            Err(_) => return Err(AgentError::NetworkTimeout),
        };
        tracing::debug!(completion = %completion, "backend completion");

        if options.dry_run {
            return Ok(ExecutionResults::dry(completion));
        }

        Ok(execute_tool_call(
            &descriptors,
            &completion,
            &options.context_vars,
            &self.execution_options,
        )
        .await)
    }

    /// 选定本次暴露的工具：无索引时全量；有索引时取查询嵌入的最近 k 个
    async fn select_tools(
        &self,
        messages: &[Message],
        num_tools: Option<usize>,
    ) -> Result<Vec<ToolDescriptor>, AgentError> {
        let (Some(index), Some(embedder)) = (&self.index, &self.embedder) else {
            return Ok(self.registry.descriptors().to_vec());
        };

        let query = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let vector = timeout(self.request_timeout, embedder.embed(query))
            .await
            .map_err(|_| AgentError::NetworkTimeout)?
            .map_err(AgentError::EmbeddingError)?;

        let k = num_tools.unwrap_or(self.default_num_tools);
        let chosen = index.nearest(&vector, k)?;
        tracing::debug!(
            tools = ?chosen.iter().map(|d| d.name()).collect::<Vec<_>>(),
            "narrowed tool catalog"
        );
        Ok(chosen)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

/// Agent 工厂：按显式配置组装后端客户端、嵌入器与索引
///
/// 未知 backend 在这里立即报 ConfigError（构造期快速失败）；
/// 这取代了原实现中的进程级 BACKENDS / EMBEDDING_MAP 全局表。
pub struct AgentFactory;

impl AgentFactory {
    pub async fn create(
        cfg: &AppConfig,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<ToolCallingAgent, AgentError> {
        let backend: BackendKind = cfg.llm.backend.parse()?;

        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register_arc(tool)?;
        }

        let client: Arc<dyn LlmClient> = match backend {
            BackendKind::OpenAi => Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                cfg.llm.api_key.as_deref(),
            )),
            BackendKind::Ollama => Arc::new(OllamaClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
            )),
        };

        let agent = ToolCallingAgent::new(client, registry, cfg);
        if !cfg.embedding.enabled {
            return Ok(agent);
        }

        let embedder: Arc<dyn EmbeddingProvider> = match backend {
            BackendKind::OpenAi => Arc::new(OpenAiEmbedder::new(
                cfg.llm.base_url.as_deref(),
                &cfg.embedding.model,
                cfg.llm.api_key.as_deref(),
            )),
            BackendKind::Ollama => Arc::new(OllamaEmbedder::new(
                cfg.llm.base_url.as_deref(),
                &cfg.embedding.model,
            )),
        };
        agent
            .with_embedder(embedder, cfg.embedding.dim, cfg.embedding.index_capacity)
            .await
    }

    /// 读 config/default.toml（或 WASP__* 环境变量）后组装
    pub async fn create_from_config_file(
        config_path: Option<PathBuf>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<ToolCallingAgent, AgentError> {
        let cfg = load_config(config_path).map_err(|e| AgentError::ConfigError(e.to_string()))?;
        Self::create(&cfg, tools).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::AddTool;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(AddTool).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_unknown_backend_fails_fast() {
        let mut cfg = AppConfig::default();
        cfg.llm.backend = "mlx".to_string();
        assert!(matches!(
            AgentFactory::create(&cfg, vec![Arc::new(AddTool)]).await,
            Err(AgentError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_dry_run_returns_raw_completion() {
        let client = Arc::new(MockLlmClient::with_completion("```\nx = add(2, 3)\n```"));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default());

        let result = agent
            .run(
                "add two and three",
                RunOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(result.is_dry);
        assert_eq!(result.content, "```\nx = add(2, 3)\n```");
        assert!(result.results.is_empty());
        assert!(result.data.is_empty());
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_run_executes_completion() {
        let client = Arc::new(MockLlmClient::with_completion("```\nx = add(2, 3)\n```"));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default());

        let result = agent.run("add two and three", RunOptions::default()).await.unwrap();

        assert!(!result.is_dry);
        assert_eq!(result.data.get("x"), Some(&serde_json::json!(5)));
        assert_eq!(result.results.get("add"), Some(&serde_json::json!("x")));
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_message_list_input_used_as_is() {
        let client = Arc::new(MockLlmClient::with_completion("no code here"));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default());

        let messages = vec![
            Message::user("hello"),
            Message::assistant("hi"),
            Message::user("now add 1 and 1"),
        ];
        let result = agent.run(messages, RunOptions::default()).await.unwrap();
        // 无围栏 → 整串当代码，解析失败进 errors 而不是 Err
        assert!(!result.errors.is_empty());
    }
}
