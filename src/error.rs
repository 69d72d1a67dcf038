//! Agent 错误类型
//!
//! 传播策略（与 engine 对齐）：只有配置错误与索引容量错误会以 Err 形式抛给调用方；
//! 生成代码内部的一切失败（解析、运行时、工具调用）都进入 FunctionResults.errors，
//! engine 永远返回结果对象而不是异常。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（配置、后端、索引、补全格式等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 配置错误（未知 backend / provider、缺少必要凭据）：构造期立刻失败，不被 engine 捕获
    #[error("Config error: {0}")]
    ConfigError(String),

    /// 工具索引已满（count == max_size），仅使当次插入失败
    #[error("Tool index capacity exceeded: {0}")]
    IndexCapacityExceeded(usize),

    /// 插入 / 查询向量维度与索引维度不一致
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// 补全中的代码围栏未闭合，由 engine 转为 errors 条目而非向外抛出
    #[error("Malformed completion: unterminated code fence")]
    MalformedCompletion,

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// 后端请求超时（[llm].request_timeout_secs 秒）
    #[error("Network timeout")]
    NetworkTimeout,
}
