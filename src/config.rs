//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，
//! 如 `WASP__LLM__BACKEND=ollama`）。原实现中的进程级 provider/model 表在这里
//! 改为显式配置结构，随 AgentFactory::create 传入，生命周期只到工厂调用为止。

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::AgentError;

/// 补全后端种类；未知字符串在解析时即报 ConfigError
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// 任意 OpenAI 兼容端点（OpenAI / OpenRouter / llama.cpp server 等）
    OpenAi,
    /// 本地 Ollama 原生 API
    Ollama,
}

impl FromStr for BackendKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" | "api" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(AgentError::ConfigError(format!(
                "Unknown backend: {other}"
            ))),
        }
    }
}

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub engine: EngineSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmSection::default(),
            embedding: EmbeddingSection::default(),
            engine: EngineSection::default(),
        }
    }
}

/// [llm] 段：后端选择、模型与请求超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / ollama
    pub backend: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 后端补全请求超时（秒）
    pub request_timeout_secs: u64,
    /// 解码温度；工具调用默认 0.0
    pub temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "driaforall/tiny-agent-a:3b".to_string(),
            base_url: None,
            api_key: None,
            request_timeout_secs: 120,
            temperature: 0.0,
        }
    }
}

/// [embedding] 段：工具索引用的嵌入模型；enabled=false 时不建索引，prompt 始终带全量工具
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub enabled: bool,
    pub model: String,
    /// 向量维度，须与模型输出一致（索引插入/查询时校验）
    pub dim: usize,
    /// 索引容量上限；超出后继续注册工具会报 IndexCapacityExceeded
    pub index_capacity: usize,
    /// run() 未指定 num_tools 时默认暴露的工具数
    pub default_num_tools: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "snowflake-arctic-embed:m".to_string(),
            dim: 768,
            index_capacity: 256,
            default_num_tools: 2,
        }
    }
}

/// [engine] 段：代码执行选项
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 扣留触达进程环境的内建函数（建议性隔离，见 pythonic::interp）
    pub restricted: bool,
    /// 单次执行整体超时（秒）；0 表示不限
    pub execution_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            restricted: false,
            execution_timeout_secs: 60,
        }
    }
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("ollama".parse::<BackendKind>().unwrap(), BackendKind::Ollama);
        assert_eq!("openai".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert_eq!("api".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert!(matches!(
            "mlx".parse::<BackendKind>(),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[test]
    fn test_defaults_without_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.backend, "ollama");
        assert_eq!(cfg.llm.temperature, 0.0);
        assert!(!cfg.embedding.enabled);
        assert_eq!(cfg.engine.execution_timeout_secs, 60);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[llm]\nbackend = \"openai\"\nmodel = \"gpt-4o-mini\"\n\n[embedding]\nenabled = true\ndim = 384\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.backend, "openai");
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert!(cfg.embedding.enabled);
        assert_eq!(cfg.embedding.dim, 384);
        // 未覆盖的字段落默认值
        assert_eq!(cfg.embedding.default_num_tools, 2);
    }
}
