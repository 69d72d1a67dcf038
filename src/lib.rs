//! Wasp - Rust 工具调用智能体引擎
//!
//! 小模型不产出 JSON 工具调用，而是生成一小段 pythonic 代码；引擎提取代码、
//! 在受限解释器中执行并拦截工具调用，最后把工具输出关联回变量。
//!
//! 模块划分：
//! - **agent**: 工具调用 Agent 编排与工厂
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **error**: 统一错误类型
//! - **llm**: 补全 / 嵌入后端抽象与实现（OpenAI 兼容 / Ollama / Mock）
//! - **pythonic**: 代码提取、受限文法解释器、执行引擎与结果模型
//! - **tools**: 工具 trait、注册表、最近邻索引与内置算术工具

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod pythonic;
pub mod tools;

pub use agent::{AgentFactory, AgentInput, RunOptions, ToolCallingAgent};
pub use error::AgentError;
pub use pythonic::{ExecutionOptions, ExecutionResults, FunctionResults};
