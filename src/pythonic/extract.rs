//! 代码提取
//!
//! 从模型补全中取出一个代码单元：无围栏时原样返回整个字符串；有围栏时取第一对
//! ``` 定界符之间的文本（开栏上的语言标签忽略）。一个补全只产出一个代码单元，
//! 多个围栏块只用第一个。开栏无对应闭栏视为补全格式错误。

use crate::error::AgentError;

const FENCE: &str = "```";

/// 提取代码单元；开栏未闭合返回 MalformedCompletion（engine 会将其转为 errors 条目）
pub fn extract_code(completion: &str) -> Result<String, AgentError> {
    let Some(open) = completion.find(FENCE) else {
        return Ok(completion.to_string());
    };

    // 开栏后到行尾是语言标签（可为空），正文从下一行开始
    let after_fence = &completion[open + FENCE.len()..];
    let body = match after_fence.find('\n') {
        Some(i) => &after_fence[i + 1..],
        None => return Err(AgentError::MalformedCompletion),
    };

    match body.find(FENCE) {
        Some(close) => Ok(body[..close].to_string()),
        None => Err(AgentError::MalformedCompletion),
    }
}
