//! 执行引擎
//!
//! 把提取出的代码单元放进隔离执行环境跑完，收割变量与每个工具的调用结果，
//! 并做结果-变量关联。生成代码内部的一切失败（解析、运行时、工具错误、超时）
//! 都汇入返回对象的 errors 列表；本模块的公开函数不会因此返回 Err。

use std::time::Duration;

use serde_json::{Map, Value};

use crate::pythonic::extract::extract_code;
use crate::pythonic::interp::{EnvironmentOptions, ExecutionEnvironment};
use crate::pythonic::parser::parse;
use crate::pythonic::schemas::{values_match, ExecutionResults, FunctionResults};
use crate::tools::ToolDescriptor;

/// 单次执行选项
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// 扣留触达进程环境的内建函数（见 interp 模块说明）
    pub restricted: bool,
    /// 整个执行过程的超时；超时成为一条 errors 记录，部分绑定会随之丢弃
    pub timeout: Option<Duration>,
}

/// 执行一个代码单元并返回 FunctionResults；错误进 errors，不向外抛
pub async fn execute(
    code: &str,
    tools: &[ToolDescriptor],
    context_vars: &Map<String, Value>,
    options: &ExecutionOptions,
) -> FunctionResults {
    match options.timeout {
        Some(limit) => {
            match tokio::time::timeout(limit, execute_inner(code, tools, context_vars, options))
                .await
            {
                Ok(results) => results,
                Err(_) => FunctionResults {
                    errors: vec![format!(
                        "execution timed out after {}s",
                        limit.as_secs_f64()
                    )],
                    ..Default::default()
                },
            }
        }
        None => execute_inner(code, tools, context_vars, options).await,
    }
}

async fn execute_inner(
    code: &str,
    tools: &[ToolDescriptor],
    context_vars: &Map<String, Value>,
    options: &ExecutionOptions,
) -> FunctionResults {
    let env_options = EnvironmentOptions {
        restricted: options.restricted,
        ..Default::default()
    };
    let mut env = ExecutionEnvironment::new(tools, context_vars, &env_options);

    match parse(code) {
        Ok(stmts) => {
            // 顶层唯一的捕获点：首个错误中止本单元，之前的绑定保留
            if let Err(message) = env.run(&stmts).await {
                env.errors.push(message);
            }
        }
        Err(message) => env.errors.push(message),
    }

    let data_ordered = env.harvest();

    // 结果关联：首次赋值顺序下第一个值相等的变量胜出（已知歧义，见模块文档）
    let mut results = Map::new();
    for (tool, entries) in env.ledger.iter_in_call_order() {
        let matched = data_ordered
            .iter()
            .find(|(_, value)| entries.iter().any(|entry| values_match(value, entry)));
        match matched {
            Some((name, _)) => {
                results.insert(tool.to_string(), Value::String(name.clone()));
            }
            None => {
                results.insert(tool.to_string(), Value::Array(entries.to_vec()));
            }
        }
    }

    FunctionResults {
        results,
        data: data_ordered.into_iter().collect(),
        errors: env.errors,
    }
}

/// 提取补全中的代码并执行；未闭合围栏等补全格式错误转为 errors 记录
pub async fn execute_tool_call(
    tools: &[ToolDescriptor],
    completion: &str,
    context_vars: &Map<String, Value>,
    options: &ExecutionOptions,
) -> ExecutionResults {
    match extract_code(completion) {
        Ok(code) => {
            let results = execute(&code, tools, context_vars, options).await;
            ExecutionResults::from_function_results(completion, results)
        }
        Err(error) => ExecutionResults {
            content: completion.to_string(),
            results: Map::new(),
            data: Map::new(),
            errors: vec![error.to_string()],
            is_dry: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolDescriptor, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }

        fn signature(&self) -> &str {
            "def add(a: int, b: int) -> int"
        }

        fn description(&self) -> &str {
            "Add two integers."
        }

        async fn call(&self, args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, String> {
            let a = args.first().and_then(|v| v.as_i64()).ok_or("a must be int")?;
            let b = args.get(1).and_then(|v| v.as_i64()).ok_or("b must be int")?;
            Ok(Value::from(a + b))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }

        fn signature(&self) -> &str {
            "def fail() -> None"
        }

        fn description(&self) -> &str {
            "Always raises."
        }

        async fn call(&self, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, String> {
            Err("boom".to_string())
        }
    }

    fn tools() -> Vec<ToolDescriptor> {
        let mut registry = ToolRegistry::new();
        registry.register(AddTool).unwrap();
        registry.register(FailTool).unwrap();
        registry.register(crate::tools::MultiplyTool).unwrap();
        registry.descriptors().to_vec()
    }

    #[tokio::test]
    async fn test_add_scenario() {
        let results = execute(
            "x = add(2, 3)",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert!(results.errors.is_empty());
        assert_eq!(results.data.get("x"), Some(&json!(5)));
        assert_eq!(results.results.get("add"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_failing_tool_aborts_remaining_statements() {
        let results = execute(
            "y = 1\nfail()\nz = 2",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert_eq!(results.data.get("y"), Some(&json!(1)));
        assert!(results.data.get("z").is_none());
        assert!(results
            .errors
            .iter()
            .any(|e| e.contains("fail") && e.contains("boom")));
    }

    #[tokio::test]
    async fn test_ledger_keeps_every_call_in_order() {
        let results = execute(
            "a = add(1, 1)\nb = add(2, 2)\nc = add(1, 1) + add(2, 2)",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert!(results.errors.is_empty());
        // c 的两次调用结果 2 与 4 已被 a / b 占先关联
        assert_eq!(results.data.get("c"), Some(&json!(6)));
        assert_eq!(results.results.get("add"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_unmatched_results_stay_raw() {
        // 调用结果未绑定变量（表达式语句），results 保留原始序列
        let results = execute(
            "add(2, 3)",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert!(results.data.is_empty());
        assert_eq!(results.results.get("add"), Some(&json!([5])));
    }

    #[tokio::test]
    async fn test_float_correlation_uses_tolerance() {
        let results = execute(
            "x = add(2, 3)\ny = x / 2 * 2",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        // x 按首次赋值顺序先于 y 被扫描到
        assert_eq!(results.results.get("add"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_parse_error_reported_not_thrown() {
        let results = execute(
            "import os",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].contains("not supported"));
        assert!(results.data.is_empty());
    }

    #[tokio::test]
    async fn test_context_vars_seeded_and_excluded_from_data() {
        let mut context = Map::new();
        context.insert("base".to_string(), json!(10));
        let results = execute(
            "x = add(base, 5)",
            &tools(),
            &context,
            &ExecutionOptions::default(),
        )
        .await;

        assert!(results.errors.is_empty());
        assert_eq!(results.data.get("x"), Some(&json!(15)));
        assert!(results.data.get("base").is_none());
    }

    #[tokio::test]
    async fn test_control_flow_and_builtins() {
        let code = "total = 0\nfor n in range(1, 5):\n    total += n\nif total > 5:\n    label = 'big'\nelse:\n    label = 'small'\nmsg = f\"{label}: {total}\"";
        let results = execute(&code, &tools(), &Map::new(), &ExecutionOptions::default()).await;

        assert!(results.errors.is_empty(), "errors: {:?}", results.errors);
        assert_eq!(results.data.get("total"), Some(&json!(10)));
        assert_eq!(results.data.get("label"), Some(&json!("big")));
        assert_eq!(results.data.get("msg"), Some(&json!("big: 10")));
    }

    #[tokio::test]
    async fn test_restricted_mode_withholds_env_builtins() {
        let results = execute(
            "v = getenv('PATH')",
            &tools(),
            &Map::new(),
            &ExecutionOptions {
                restricted: true,
                timeout: None,
            },
        )
        .await;
        assert!(results.errors[0].contains("getenv"));

        let results = execute(
            "v = getenv('PATH')",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;
        assert!(results.errors.is_empty());
    }

    #[tokio::test]
    async fn test_execute_tool_call_extracts_fenced_block() {
        let completion = "Sure, here you go:\n```python\nx = add(2, 3)\n```";
        let results = execute_tool_call(
            &tools(),
            completion,
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert_eq!(results.content, completion);
        assert!(!results.is_dry);
        assert_eq!(results.data.get("x"), Some(&json!(5)));
        assert_eq!(results.final_answer(), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_malformed_completion_becomes_error_entry() {
        let completion = "```python\nx = add(2, 3)";
        let results = execute_tool_call(
            &tools(),
            completion,
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].contains("Malformed completion"));
        assert!(results.data.is_empty());
    }

    #[tokio::test]
    async fn test_runaway_loop_guarded() {
        let results = execute(
            "total = 0\nfor a in range(0, 10000):\n    for b in range(0, 10000):\n        total += 1",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].contains("loop iteration limit"));
    }

    #[tokio::test]
    async fn test_integer_negation_overflow_reported() {
        // 0 - i64::MAX - 1 经检查减法合法得到 i64::MIN，再取负必须报错而不是 panic
        let results = execute(
            "x = 0 - 9223372036854775807 - 1\ny = -x",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert_eq!(results.data.get("x"), Some(&json!(i64::MIN)));
        assert!(results.data.get("y").is_none());
        assert!(results.errors.iter().any(|e| e.contains("integer overflow")));

        let results = execute(
            "x = 0 - 9223372036854775807 - 1\nz = abs(x)",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;
        assert!(results.data.get("z").is_none());
        assert!(results.errors.iter().any(|e| e.contains("integer overflow")));
    }

    #[tokio::test]
    async fn test_final_answer_is_last_correlated_tool() {
        // multiply 先于 add 调用，但键名字典序相反；final_answer 须跟调用顺序走
        let completion = "```\ny = multiply(2, 10)\nx = add(y, 1)\n```";
        let results = execute_tool_call(
            &tools(),
            completion,
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert!(results.errors.is_empty(), "errors: {:?}", results.errors);
        assert_eq!(results.results.get("multiply"), Some(&json!("y")));
        assert_eq!(results.results.get("add"), Some(&json!("x")));
        assert_eq!(results.final_answer(), Some(&json!(21)));
    }

    #[tokio::test]
    async fn test_date_helpers() {
        let results = execute(
            "gap = days_between('2026-08-01', '2026-08-30')\ndue = add_days('2026-08-30', 7)",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;

        assert!(results.errors.is_empty(), "errors: {:?}", results.errors);
        assert_eq!(results.data.get("gap"), Some(&json!(29)));
        assert_eq!(results.data.get("due"), Some(&json!("2026-09-06")));

        let results = execute(
            "gap = days_between('yesterday', '2026-08-30')",
            &tools(),
            &Map::new(),
            &ExecutionOptions::default(),
        )
        .await;
        assert!(results.errors[0].contains("invalid date"));
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn signature(&self) -> &str {
            "def slow() -> None"
        }

        fn description(&self) -> &str {
            "Sleeps for a long time."
        }

        async fn call(&self, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_execution_timeout_reported() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();

        let results = execute(
            "slow()",
            registry.descriptors(),
            &Map::new(),
            &ExecutionOptions {
                restricted: false,
                timeout: Some(Duration::from_millis(20)),
            },
        )
        .await;

        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].contains("timed out"));
        assert!(results.data.is_empty());
    }
}
