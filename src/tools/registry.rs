//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / signature / description / call），ToolDescriptor 包装
//! Arc<dyn Tool> 并负责渲染 prompt 中的函数描述块；ToolRegistry 按名注册与查找，
//! 同名重复注册视为配置错误（一次运行内工具名必须唯一）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::AgentError;

/// 工具 trait：名称、pythonic 签名、docstring、异步调用
///
/// 生成代码以 pythonic 位置参数 / 关键字参数调用工具，参数与返回值统一为 JSON Value。
/// 同步工具同样实现本 trait（body 不挂起即可），解释器对所有调用一律 await。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（生成代码中的函数名）
    fn name(&self) -> &str;

    /// pythonic 签名行，如 "def add(a: int, b: int) -> int"（供 LLM 理解参数格式）
    fn signature(&self) -> &str;

    /// docstring（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 执行工具；args 为位置参数，kwargs 为关键字参数
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, String>;
}

/// 工具描述符：构造后不可变，引用（而非复制）底层可调用对象，可在并发运行间只读共享
#[derive(Clone)]
pub struct ToolDescriptor {
    tool: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self { tool }
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn tool(&self) -> Arc<dyn Tool> {
        self.tool.clone()
    }

    /// 渲染为 prompt 中的函数描述块：签名 + 缩进的 docstring
    pub fn render(&self) -> String {
        let mut out = format!("{}:\n    \"\"\"\n", self.tool.signature());
        for line in self.tool.description().lines() {
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("    \"\"\"");
        out
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name())
            .finish()
    }
}

/// 工具注册表：按名称存储描述符，保留注册顺序（prompt 渲染与索引构建按此顺序）
#[derive(Default)]
pub struct ToolRegistry {
    by_name: HashMap<String, usize>,
    descriptors: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；重名返回 ConfigError（一次运行内名称必须唯一）
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(AgentError::ConfigError(format!(
                "Duplicate tool name: {name}"
            )));
        }
        self.by_name.insert(name, self.descriptors.len());
        self.descriptors.push(ToolDescriptor::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name).map(|&i| &self.descriptors[i])
    }

    /// 全部描述符，按注册顺序
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name().to_string()).collect()
    }
}
