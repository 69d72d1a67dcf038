//! 内置数学工具（示例 / 测试用）
//!
//! 真实部署中工具由调用方实现并注册；这里提供一组无副作用的小工具，
//! 便于离线演示与集成测试。

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::Tool;

fn positional<'a>(args: &'a [Value], kwargs: &'a Map<String, Value>, idx: usize, name: &str) -> Result<&'a Value, String> {
    args.get(idx)
        .or_else(|| kwargs.get(name))
        .ok_or_else(|| format!("missing argument '{name}'"))
}

fn as_number(value: &Value, name: &str) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("argument '{name}' must be a number"))
}

/// 两数相加；整数入参保持整数出参
pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn signature(&self) -> &str {
        "def add(a: float, b: float) -> float"
    }

    fn description(&self) -> &str {
        "Add two numbers and return the sum."
    }

    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, String> {
        let a = positional(&args, &kwargs, 0, "a")?;
        let b = positional(&args, &kwargs, 1, "b")?;
        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            return Ok(Value::from(x + y));
        }
        Ok(Value::from(as_number(a, "a")? + as_number(b, "b")?))
    }
}

/// 两数相乘；整数入参保持整数出参
pub struct MultiplyTool;

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn signature(&self) -> &str {
        "def multiply(a: float, b: float) -> float"
    }

    fn description(&self) -> &str {
        "Multiply two numbers and return the product."
    }

    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, String> {
        let a = positional(&args, &kwargs, 0, "a")?;
        let b = positional(&args, &kwargs, 1, "b")?;
        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            return Ok(Value::from(x * y));
        }
        Ok(Value::from(as_number(a, "a")? * as_number(b, "b")?))
    }
}

/// 除法；除零返回错误（工具内错误会进入 errors 并中止剩余语句）
pub struct DivideTool;

#[async_trait]
impl Tool for DivideTool {
    fn name(&self) -> &str {
        "divide"
    }

    fn signature(&self) -> &str {
        "def divide(a: float, b: float) -> float"
    }

    fn description(&self) -> &str {
        "Divide a by b. Raises an error when b is zero."
    }

    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, String> {
        let a = as_number(positional(&args, &kwargs, 0, "a")?, "a")?;
        let b = as_number(positional(&args, &kwargs, 1, "b")?, "b")?;
        if b == 0.0 {
            return Err("division by zero".to_string());
        }
        Ok(Value::from(a / b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_keeps_integers() {
        let result = AddTool
            .call(vec![Value::from(2), Value::from(3)], Map::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from(5));
    }

    #[tokio::test]
    async fn test_add_accepts_kwargs() {
        let mut kwargs = Map::new();
        kwargs.insert("a".to_string(), Value::from(1.5));
        kwargs.insert("b".to_string(), Value::from(2.0));
        let result = AddTool.call(vec![], kwargs).await.unwrap();
        assert_eq!(result, Value::from(3.5));
    }

    #[tokio::test]
    async fn test_divide_by_zero_errors() {
        let err = DivideTool
            .call(vec![Value::from(1), Value::from(0)], Map::new())
            .await
            .unwrap_err();
        assert!(err.contains("division by zero"));
    }
}
