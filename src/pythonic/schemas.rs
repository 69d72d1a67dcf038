//! 执行结果模型
//!
//! FunctionResults 是单个代码单元的执行产物（结果关联、变量、错误），
//! ExecutionResults 在其上附加原始补全文本与 dry-run 标记，作为一次 agent
//! 调用的最终返回值；两者构建后不再修改。

use serde::Serialize;
use serde_json::{Map, Value};

/// 浮点相等容差（结果关联与评分共用）
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// 带容差的值相等：浮点在 FLOAT_TOLERANCE 内视为相等，容器递归，其余精确比较
pub fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => (fx - fy).abs() <= FLOAT_TOLERANCE,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_match(x, y)))
        }
        _ => a == b,
    }
}

/// 单个代码单元的执行结果
///
/// - results: 工具名 → 其输出最终绑定到的变量名；无变量匹配时保留原始结果序列
/// - data: 生成代码定义的变量及终值（剔除注入名；可调用对象不会出现在这里）
/// - errors: 有序错误信息；执行在首个致命错误处停止，此前的绑定保留
#[derive(Debug, Clone, Default, Serialize)]
pub struct FunctionResults {
    pub results: Map<String, Value>,
    pub data: Map<String, Value>,
    pub errors: Vec<String>,
}

impl FunctionResults {
    /// 按值与函数名出现情况打分，满分 1.0（值与函数各占 0.5，按比例给分）
    pub fn check_score(&self, values_list: &[Value], functions_list: &[String]) -> f64 {
        let matching_values = values_list
            .iter()
            .filter(|value| self.data.values().any(|v| values_match(v, value)))
            .count();
        let values_score = 0.5
            * if values_list.is_empty() {
                1.0
            } else {
                matching_values as f64 / values_list.len() as f64
            };

        let matching_functions = functions_list
            .iter()
            .filter(|f| self.results.contains_key(f.as_str()))
            .count();
        let functions_score = 0.5
            * if functions_list.is_empty() {
                1.0
            } else {
                matching_functions as f64 / functions_list.len() as f64
            };

        values_score + functions_score
    }
}

/// 一次 agent 调用的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResults {
    /// 原始补全文本
    pub content: String,
    pub results: Map<String, Value>,
    pub data: Map<String, Value>,
    pub errors: Vec<String>,
    /// dry-run 时为 true：未执行任何代码，results/data/errors 为空
    pub is_dry: bool,
}

impl ExecutionResults {
    /// dry-run 结果：只带补全文本
    pub fn dry(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            results: Map::new(),
            data: Map::new(),
            errors: Vec::new(),
            is_dry: true,
        }
    }

    pub fn from_function_results(content: impl Into<String>, results: FunctionResults) -> Self {
        Self {
            content: content.into(),
            results: results.results,
            data: results.data,
            errors: results.errors,
            is_dry: false,
        }
    }

    /// 最终答案：结果关联中最后一个指向现存变量的绑定值；没有则为 None。
    /// results 的键序即工具首次调用顺序（serde_json 开启 preserve_order），
    /// 所以"最后"指最后被关联的工具，而非键名字典序。
    pub fn final_answer(&self) -> Option<&Value> {
        self.results
            .values()
            .filter_map(|v| v.as_str())
            .filter_map(|name| self.data.get(name))
            .last()
    }
}
