//! pythonic 核心：代码提取、受限文法解释器、执行引擎与结果模型
//!
//! 数据流：补全文本 → extract 取代码单元 → parser 产出受限 AST →
//! interp 在隔离环境中求值并拦截工具调用 → engine 收割变量、关联结果、聚合错误。

pub mod engine;
pub mod extract;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod schemas;

pub use engine::{execute, execute_tool_call, ExecutionOptions};
pub use extract::extract_code;
pub use interp::{CallLedger, EnvironmentOptions, ExecutionEnvironment};
pub use schemas::{values_match, ExecutionResults, FunctionResults, FLOAT_TOLERANCE};
