//! Agent 集成测试

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use wasp::config::AppConfig;
    use wasp::llm::{EmbeddingProvider, MockLlmClient};
    use wasp::tools::{AddTool, DivideTool, MultiplyTool, Tool, ToolRegistry};
    use wasp::{RunOptions, ToolCallingAgent};

    /// 按关键词产出固定向量的嵌入器；工具渲染文本含各自函数名，查询据此落到对应轴
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
            Ok(texts
                .iter()
                .map(|text| {
                    vec![
                        text.contains("add") as u8 as f32,
                        text.contains("multiply") as u8 as f32,
                        text.contains("divide") as u8 as f32,
                    ]
                })
                .collect())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(AddTool).unwrap();
        registry.register(MultiplyTool).unwrap();
        registry.register(DivideTool).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_full_run_add_scenario() {
        let client = Arc::new(MockLlmClient::with_completion(
            "Here is the code:\n```python\nx = add(2, 3)\ny = multiply(x, 10)\n```",
        ));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default());

        let results = agent
            .run("add 2 and 3, then multiply by 10", RunOptions::default())
            .await
            .unwrap();

        assert!(!results.is_dry);
        assert!(results.errors.is_empty(), "errors: {:?}", results.errors);
        assert_eq!(results.data.get("x"), Some(&json!(5)));
        assert_eq!(results.data.get("y"), Some(&json!(50)));
        assert_eq!(results.results.get("add"), Some(&json!("x")));
        assert_eq!(results.results.get("multiply"), Some(&json!("y")));
        assert_eq!(results.final_answer(), Some(&json!(50)));
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        struct CountingTool {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Tool for CountingTool {
            fn name(&self) -> &str {
                "ping"
            }

            fn signature(&self) -> &str {
                "def ping() -> str"
            }

            fn description(&self) -> &str {
                "Ping something."
            }

            async fn call(
                &self,
                _args: Vec<Value>,
                _kwargs: Map<String, Value>,
            ) -> Result<Value, String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!("pong"))
            }
        }

        let tool = Arc::new(CountingTool {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ToolRegistry::new();
        registry.register_arc(tool.clone()).unwrap();

        let client = Arc::new(MockLlmClient::with_completion("```\nr = ping()\n```"));
        let agent = ToolCallingAgent::new(client, registry, &AppConfig::default());

        let results = agent
            .run(
                "ping it",
                RunOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(results.is_dry);
        assert_eq!(results.content, "```\nr = ping()\n```");
        assert!(results.results.is_empty());
        assert!(results.data.is_empty());
        assert!(results.errors.is_empty());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_index_narrows_exposed_tools() {
        let client = Arc::new(MockLlmClient::with_completion(
            "```\np = multiply(3, 4)\n```",
        ));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default())
            .with_embedder(Arc::new(KeywordEmbedder), 3, 8)
            .await
            .unwrap();

        let results = agent
            .run(
                "multiply 3 by 4",
                RunOptions {
                    num_tools: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(results.errors.is_empty(), "errors: {:?}", results.errors);
        assert_eq!(results.data.get("p"), Some(&json!(12)));
        assert_eq!(results.results.get("multiply"), Some(&json!("p")));
    }

    #[tokio::test]
    async fn test_narrowed_catalog_excludes_unrelated_tools() {
        // 索引只暴露 multiply，补全里调 add 应报未定义而不是静默成功
        let client = Arc::new(MockLlmClient::with_completion("```\nq = add(1, 2)\n```"));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default())
            .with_embedder(Arc::new(KeywordEmbedder), 3, 8)
            .await
            .unwrap();

        let results = agent
            .run(
                "multiply things",
                RunOptions {
                    num_tools: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].contains("add"));
        assert!(results.errors[0].contains("not defined"));
    }

    #[tokio::test]
    async fn test_tool_error_surfaces_in_results() {
        let client = Arc::new(MockLlmClient::with_completion(
            "```\na = divide(10, 2)\nb = divide(1, 0)\nc = add(a, 1)\n```",
        ));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default());

        let results = agent.run("divide stuff", RunOptions::default()).await.unwrap();

        // b 处失败：a 保留，c 不再执行
        assert_eq!(results.data.get("a"), Some(&json!(5.0)));
        assert!(results.data.get("c").is_none());
        assert!(results
            .errors
            .iter()
            .any(|e| e.starts_with("Error in divide:")));
    }

    #[tokio::test]
    async fn test_context_vars_flow_into_execution() {
        let client = Arc::new(MockLlmClient::with_completion(
            "```\ntotal = add(budget, 50)\n```",
        ));
        let agent = ToolCallingAgent::new(client, registry(), &AppConfig::default());

        let mut context_vars = Map::new();
        context_vars.insert("budget".to_string(), json!(100));
        let results = agent
            .run(
                "add 50 to the budget",
                RunOptions {
                    context_vars,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(results.errors.is_empty(), "errors: {:?}", results.errors);
        assert_eq!(results.data.get("total"), Some(&json!(150)));
        // 注入的上下文变量不回流到 data
        assert!(results.data.get("budget").is_none());
    }
}
