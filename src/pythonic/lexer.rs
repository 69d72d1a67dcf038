//! 受限 pythonic 语法 - 词法分析
//!
//! 产出"逻辑行"序列：每行携带缩进宽度与 token 列表。括号未闭合的物理行与
//! 反斜杠结尾的物理行并入同一逻辑行；空行与 # 注释行跳过。关键字不在词法层
//! 区分，由语法分析按标识符名匹配。

/// 单个 token；运算符统一为 Op(字符串)
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string 原始内容，{expr} 插值由语法分析阶段展开
    FStr(String),
    Op(&'static str),
}

/// 一条逻辑行：缩进 + token 序列 + 起始物理行号（错误信息用）
#[derive(Debug, Clone)]
pub struct LogicalLine {
    pub indent: usize,
    pub tokens: Vec<Token>,
    pub line_no: usize,
}

const OPS2: [&str; 10] = ["==", "!=", "<=", ">=", "//", "**", "+=", "-=", "*=", "/="];
const OPS1: [&str; 16] = [
    "(", ")", "[", "]", "{", "}", ",", ":", "=", "<", ">", "+", "-", "*", "/", "%",
];

/// 词法分析整个代码单元
pub fn lex(code: &str) -> Result<Vec<LogicalLine>, String> {
    let mut lines: Vec<LogicalLine> = Vec::new();
    let mut current: Option<LogicalLine> = None;
    let mut depth: i32 = 0;

    for (idx, raw) in code.lines().enumerate() {
        let line_no = idx + 1;

        let (indent, content) = split_indent(raw);
        if current.is_none() {
            if content.is_empty() || content.starts_with('#') {
                continue;
            }
            current = Some(LogicalLine {
                indent,
                tokens: Vec::new(),
                line_no,
            });
        }

        let line = current.as_mut().expect("current line exists");
        let continued = tokenize_into(content, &mut line.tokens, &mut depth, line_no)?;

        if depth == 0 && !continued {
            if !line.tokens.is_empty() {
                lines.push(current.take().expect("current line exists"));
            } else {
                current = None;
            }
        }
    }

    if depth > 0 {
        return Err("unexpected end of code inside brackets".to_string());
    }
    if let Some(line) = current {
        if !line.tokens.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// 词法分析单个表达式片段（f-string 插值用），不涉及缩进与续行
pub fn lex_fragment(fragment: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut depth = 0;
    tokenize_into(fragment, &mut tokens, &mut depth, 0)?;
    if depth != 0 {
        return Err(format!("unbalanced brackets in expression '{fragment}'"));
    }
    Ok(tokens)
}

fn split_indent(raw: &str) -> (usize, &str) {
    let mut indent = 0;
    let mut bytes = 0;
    for c in raw.chars() {
        match c {
            ' ' => indent += 1,
            '\t' => indent += 4,
            _ => break,
        }
        bytes += c.len_utf8();
    }
    (indent, raw[bytes..].trim_end())
}

/// 把一行文本的 token 追加到 tokens；返回是否以反斜杠续行
fn tokenize_into(
    content: &str,
    tokens: &mut Vec<Token>,
    depth: &mut i32,
    line_no: usize,
) -> Result<bool, String> {
    let chars: Vec<char> = content.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }
        if c == '\\' {
            if chars[i + 1..].iter().all(|c| c.is_whitespace()) {
                return Ok(true);
            }
            return Err(format!("line {line_no}: unexpected character '\\'"));
        }

        // f-string 前缀
        if (c == 'f' || c == 'F')
            && matches!(chars.get(i + 1), Some('"') | Some('\''))
        {
            let (text, next) = read_string(&chars, i + 1, line_no)?;
            tokens.push(Token::FStr(text));
            i = next;
            continue;
        }
        if c == '"' || c == '\'' {
            let (text, next) = read_string(&chars, i, line_no)?;
            tokens.push(Token::Str(text));
            i = next;
            continue;
        }
        if c.is_ascii_digit() {
            let (token, next) = read_number(&chars, i, line_no)?;
            tokens.push(token);
            i = next;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        // 双字符运算符优先
        if i + 1 < chars.len() {
            let pair: String = chars[i..i + 2].iter().collect();
            if let Some(op) = OPS2.iter().find(|&&o| o == pair) {
                tokens.push(Token::Op(op));
                i += 2;
                continue;
            }
        }
        let single = c.to_string();
        if let Some(op) = OPS1.iter().find(|&&o| o == single) {
            match c {
                '(' | '[' | '{' => *depth += 1,
                ')' | ']' | '}' => {
                    *depth -= 1;
                    if *depth < 0 {
                        return Err(format!("line {line_no}: unmatched '{c}'"));
                    }
                }
                _ => {}
            }
            tokens.push(Token::Op(op));
            i += 1;
            continue;
        }
        if c == '.' {
            tokens.push(Token::Op("."));
            i += 1;
            continue;
        }

        return Err(format!("line {line_no}: unexpected character '{c}'"));
    }

    Ok(false)
}

fn read_string(chars: &[char], start: usize, line_no: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            i += 1;
            let esc = chars
                .get(i)
                .ok_or_else(|| format!("line {line_no}: unterminated string literal"))?;
            out.push(match esc {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                '0' => '\0',
                other => *other,
            });
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    Err(format!("line {line_no}: unterminated string literal"))
}

fn read_number(chars: &[char], start: usize, line_no: usize) -> Result<(Token, usize), String> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+') | Some('-')) {
            j += 1;
        }
        if chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }

    let text: String = chars[start..i].iter().collect();
    if is_float {
        let value: f64 = text
            .parse()
            .map_err(|_| format!("line {line_no}: invalid number literal '{text}'"))?;
        Ok((Token::Float(value), i))
    } else {
        let value: i64 = text
            .parse()
            .map_err(|_| format!("line {line_no}: invalid number literal '{text}'"))?;
        Ok((Token::Int(value), i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_assignment() {
        let lines = lex("x = add(2, 3)").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].tokens,
            vec![
                Token::Ident("x".into()),
                Token::Op("="),
                Token::Ident("add".into()),
                Token::Op("("),
                Token::Int(2),
                Token::Op(","),
                Token::Int(3),
                Token::Op(")"),
            ]
        );
    }

    #[test]
    fn test_indent_and_blank_lines() {
        let lines = lex("if a:\n\n    b = 1\n# comment\nc = 2\n").unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].indent, 0);
        assert_eq!(lines[1].indent, 4);
        assert_eq!(lines[2].indent, 0);
    }

    #[test]
    fn test_bracket_continuation_joins_lines() {
        let lines = lex("x = add(\n    2,\n    3,\n)").unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].tokens.contains(&Token::Int(3)));
    }

    #[test]
    fn test_string_escapes_and_fstring() {
        let lines = lex("s = 'a\\nb'\nt = f\"v={x}\"").unwrap();
        assert_eq!(lines[0].tokens[2], Token::Str("a\nb".into()));
        assert_eq!(lines[1].tokens[2], Token::FStr("v={x}".into()));
    }

    #[test]
    fn test_float_and_exponent() {
        let lines = lex("a = 1.5\nb = 2e3\nc = 10").unwrap();
        assert_eq!(lines[0].tokens[2], Token::Float(1.5));
        assert_eq!(lines[1].tokens[2], Token::Float(2000.0));
        assert_eq!(lines[2].tokens[2], Token::Int(10));
    }

    #[test]
    fn test_unterminated_string_errors() {
        assert!(lex("s = 'oops").is_err());
    }

    #[test]
    fn test_unbalanced_brackets_error() {
        assert!(lex("x = (1 + 2").is_err());
        assert!(lex("x = 1)").is_err());
    }
}
