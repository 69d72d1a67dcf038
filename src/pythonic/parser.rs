//! 受限 pythonic 语法 - 语法分析
//!
//! 支持的语句：单名赋值、增量赋值（+= -= *= /=）、表达式语句、if/elif/else、for-in。
//! 支持的表达式：字面量、f-string、列表/元组/字典、名称、按名调用（位置与关键字参数）、
//! 算术、比较、布尔运算、一元取负/not、下标、in 成员测试。
//! 其余一切（属性访问、方法调用、import、def/class/while、推导式）都是显式报错：
//! 解释器按允许列表执行，不在文法内的结构不会以任何方式运行。

use crate::pythonic::lexer::{lex, lex_fragment, LogicalLine, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { target: String, value: Expr },
    AugAssign { target: String, op: BinOp, value: Expr },
    Expr(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    For {
        target: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    NoneLit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<FPart>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Call {
        func: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Bin {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cmp {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
}

/// f-string 的组成片段
#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Text(String),
    Expr(Box<Expr>),
}

const RESERVED: [&str; 14] = [
    "if", "elif", "else", "for", "in", "and", "or", "not", "True", "False", "None", "def",
    "while", "import",
];

/// 解析整个代码单元
pub fn parse(code: &str) -> Result<Vec<Stmt>, String> {
    let lines = lex(code)?;
    let mut parser = BlockParser { lines, pos: 0 };
    let stmts = parser.parse_block(parser.first_indent())?;
    if parser.pos < parser.lines.len() {
        let line = &parser.lines[parser.pos];
        return Err(format!("line {}: unexpected indent", line.line_no));
    }
    Ok(stmts)
}

struct BlockParser {
    lines: Vec<LogicalLine>,
    pos: usize,
}

impl BlockParser {
    fn first_indent(&self) -> usize {
        self.lines.first().map(|l| l.indent).unwrap_or(0)
    }

    fn parse_block(&mut self, indent: usize) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        while self.pos < self.lines.len() {
            let line_indent = self.lines[self.pos].indent;
            if line_indent < indent {
                break;
            }
            if line_indent > indent {
                return Err(format!(
                    "line {}: unexpected indent",
                    self.lines[self.pos].line_no
                ));
            }
            stmts.push(self.parse_stmt(indent)?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self, indent: usize) -> Result<Stmt, String> {
        let line = self.lines[self.pos].clone();
        match line.tokens.first() {
            Some(Token::Ident(kw)) if kw == "if" => self.parse_if(indent),
            Some(Token::Ident(kw)) if kw == "for" => self.parse_for(indent),
            Some(Token::Ident(kw)) if kw == "elif" || kw == "else" => Err(format!(
                "line {}: '{kw}' without matching 'if'",
                line.line_no
            )),
            Some(Token::Ident(kw))
                if kw == "def" || kw == "while" || kw == "import" || kw == "class"
                    || kw == "from" || kw == "return" || kw == "lambda" =>
            {
                Err(format!(
                    "line {}: '{kw}' is not supported in generated code",
                    line.line_no
                ))
            }
            Some(_) => {
                self.pos += 1;
                parse_simple_stmt(&line)
            }
            None => Err(format!("line {}: empty statement", line.line_no)),
        }
    }

    /// 解析 if/elif/else 链；各分支头必须与 if 同缩进
    fn parse_if(&mut self, indent: usize) -> Result<Stmt, String> {
        let mut branches = Vec::new();
        let mut orelse = Vec::new();

        // if 分支
        let line = self.lines[self.pos].clone();
        let cond = parse_branch_header(&line, "if")?;
        self.pos += 1;
        let body = self.parse_child_block(indent, line.line_no)?;
        branches.push((cond, body));

        loop {
            let line = match self.lines.get(self.pos) {
                Some(l) if l.indent == indent => match l.tokens.first() {
                    Some(Token::Ident(kw)) if kw == "elif" || kw == "else" => l.clone(),
                    _ => break,
                },
                _ => break,
            };
            if matches!(&line.tokens[0], Token::Ident(kw) if kw == "elif") {
                let cond = parse_branch_header(&line, "elif")?;
                self.pos += 1;
                let body = self.parse_child_block(indent, line.line_no)?;
                branches.push((cond, body));
            } else {
                if line.tokens.len() != 2 || line.tokens[1] != Token::Op(":") {
                    return Err(format!("line {}: malformed 'else:'", line.line_no));
                }
                self.pos += 1;
                orelse = self.parse_child_block(indent, line.line_no)?;
                break;
            }
        }

        Ok(Stmt::If { branches, orelse })
    }

    fn parse_for(&mut self, indent: usize) -> Result<Stmt, String> {
        let line = self.lines[self.pos].clone();
        // for <name> in <expr> :
        let mut cursor = ExprParser::new(&line.tokens[1..], line.line_no);
        let target = cursor.expect_ident()?;
        cursor.expect_keyword("in")?;
        let iter = cursor.parse_expr()?;
        cursor.expect_op(":")?;
        cursor.expect_end()?;

        self.pos += 1;
        let body = self.parse_child_block(indent, line.line_no)?;
        Ok(Stmt::For { target, iter, body })
    }

    fn parse_child_block(&mut self, parent_indent: usize, header_line: usize) -> Result<Vec<Stmt>, String> {
        let Some(next) = self.lines.get(self.pos) else {
            return Err(format!("line {header_line}: expected an indented block"));
        };
        if next.indent <= parent_indent {
            return Err(format!("line {header_line}: expected an indented block"));
        }
        let child_indent = next.indent;
        self.parse_block(child_indent)
    }
}

/// 解析 "if/elif <expr> :" 行头，返回条件表达式
fn parse_branch_header(line: &LogicalLine, kw: &str) -> Result<Expr, String> {
    let mut cursor = ExprParser::new(&line.tokens[1..], line.line_no);
    let cond = cursor.parse_expr()?;
    cursor.expect_op(":")?;
    cursor.expect_end().map_err(|_| {
        format!("line {}: trailing tokens after '{kw} ...:'", line.line_no)
    })?;
    Ok(cond)
}

/// 简单语句：赋值 / 增量赋值 / 表达式
fn parse_simple_stmt(line: &LogicalLine) -> Result<Stmt, String> {
    // 顶层（深度 0）的 = / += ... 将行拆为目标与值
    let mut depth = 0usize;
    for (i, token) in line.tokens.iter().enumerate() {
        if let Token::Op(op) = token {
            match *op {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                "=" | "+=" | "-=" | "*=" | "/=" if depth == 0 => {
                    let target = match &line.tokens[..i] {
                        [Token::Ident(name)] if !RESERVED.contains(&name.as_str()) => name.clone(),
                        _ => {
                            return Err(format!(
                                "line {}: only single-name assignment targets are supported",
                                line.line_no
                            ))
                        }
                    };
                    let mut cursor = ExprParser::new(&line.tokens[i + 1..], line.line_no);
                    let value = cursor.parse_expr()?;
                    cursor.expect_end()?;
                    return Ok(match *op {
                        "=" => Stmt::Assign { target, value },
                        "+=" => Stmt::AugAssign { target, op: BinOp::Add, value },
                        "-=" => Stmt::AugAssign { target, op: BinOp::Sub, value },
                        "*=" => Stmt::AugAssign { target, op: BinOp::Mul, value },
                        _ => Stmt::AugAssign { target, op: BinOp::Div, value },
                    });
                }
                _ => {}
            }
        }
    }

    let mut cursor = ExprParser::new(&line.tokens, line.line_no);
    let expr = cursor.parse_expr()?;
    cursor.expect_end()?;
    Ok(Stmt::Expr(expr))
}

/// token 流上的表达式解析器（递归下降）
struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    line_no: usize,
}

impl<'a> ExprParser<'a> {
    fn new(tokens: &'a [Token], line_no: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line_no,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next_cloned(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn err(&self, msg: impl std::fmt::Display) -> String {
        if self.line_no == 0 {
            msg.to_string()
        } else {
            format!("line {}: {msg}", self.line_no)
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == kw)
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(o)) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), String> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{op}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, String> {
        match self.next_cloned() {
            Some(Token::Ident(name)) if !RESERVED.contains(&name.as_str()) => Ok(name),
            _ => Err(self.err("expected a name")),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), String> {
        match self.next_cloned() {
            Some(Token::Ident(name)) if name == kw => Ok(()),
            _ => Err(self.err(format!("expected '{kw}'"))),
        }
    }

    fn expect_end(&mut self) -> Result<(), String> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.err("unexpected trailing tokens"))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.at_keyword("not") {
            self.pos += 1;
            let operand = self.parse_not()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_arith()?;
        let op = if self.eat_op("==") {
            CmpOp::Eq
        } else if self.eat_op("!=") {
            CmpOp::Ne
        } else if self.eat_op("<=") {
            CmpOp::Le
        } else if self.eat_op(">=") {
            CmpOp::Ge
        } else if self.eat_op("<") {
            CmpOp::Lt
        } else if self.eat_op(">") {
            CmpOp::Gt
        } else if self.at_keyword("in") {
            self.pos += 1;
            CmpOp::In
        } else if self.at_keyword("not") {
            // "not in" 是比较层唯一合法的 not
            self.pos += 1;
            self.expect_keyword("in")?;
            CmpOp::NotIn
        } else {
            return Ok(left);
        };
        let right = self.parse_arith()?;
        Ok(Expr::Cmp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_arith(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.at_op("+") {
                BinOp::Add
            } else if self.at_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = Expr::Bin {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_factor()?;
        loop {
            let op = if self.at_op("*") {
                BinOp::Mul
            } else if self.at_op("//") {
                BinOp::FloorDiv
            } else if self.at_op("/") {
                BinOp::Div
            } else if self.at_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            self.pos += 1;
            let right = self.parse_factor()?;
            left = Expr::Bin {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, String> {
        if self.eat_op("-") {
            let operand = self.parse_factor()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        if self.eat_op("+") {
            return self.parse_factor();
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut value = self.parse_atom()?;
        loop {
            if self.eat_op("[") {
                let index = self.parse_expr()?;
                self.expect_op("]")?;
                value = Expr::Index {
                    value: Box::new(value),
                    index: Box::new(index),
                };
                continue;
            }
            if self.at_op(".") {
                return Err(self.err("attribute access / method calls are not supported"));
            }
            if self.at_op("**") {
                return Err(self.err("the '**' operator is not supported"));
            }
            break;
        }
        Ok(value)
    }

    fn parse_atom(&mut self) -> Result<Expr, String> {
        let Some(token) = self.next_cloned() else {
            return Err(self.err("unexpected end of expression"));
        };
        match token {
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Float(v) => Ok(Expr::Float(v)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::FStr(raw) => parse_fstring(&raw).map_err(|e| self.err(e)),
            Token::Ident(name) => match name.as_str() {
                "None" => Ok(Expr::NoneLit),
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                _ if RESERVED.contains(&name.as_str()) => {
                    Err(self.err(format!("unexpected keyword '{name}'")))
                }
                _ => {
                    if self.at_op("(") {
                        self.pos += 1;
                        self.parse_call(name)
                    } else {
                        Ok(Expr::Name(name))
                    }
                }
            },
            Token::Op("(") => {
                // 括号表达式或元组
                let mut items = vec![self.parse_expr()?];
                let mut is_tuple = false;
                while self.eat_op(",") {
                    is_tuple = true;
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect_op(")")?;
                if is_tuple {
                    Ok(Expr::Tuple(items))
                } else {
                    Ok(items.pop().expect("paren expression has one item"))
                }
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                if !self.at_op("]") {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat_op(",") || self.at_op("]") {
                            break;
                        }
                    }
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Token::Op("{") => {
                let mut pairs = Vec::new();
                if !self.at_op("}") {
                    loop {
                        let key = self.parse_expr()?;
                        self.expect_op(":")?;
                        let value = self.parse_expr()?;
                        pairs.push((key, value));
                        if !self.eat_op(",") || self.at_op("}") {
                            break;
                        }
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    /// 调用参数：位置参数在前，name=expr 关键字参数在后
    fn parse_call(&mut self, func: String) -> Result<Expr, String> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        if !self.at_op(")") {
            loop {
                // 向前看一个 Ident '='（且不是 '=='）识别关键字参数
                let is_kwarg = matches!(
                    (self.peek(), self.tokens.get(self.pos + 1)),
                    (Some(Token::Ident(name)), Some(Token::Op("=")))
                        if !RESERVED.contains(&name.as_str())
                );
                if is_kwarg {
                    let name = self.expect_ident()?;
                    self.expect_op("=")?;
                    let value = self.parse_expr()?;
                    kwargs.push((name, value));
                } else {
                    if !kwargs.is_empty() {
                        return Err(self.err("positional argument after keyword argument"));
                    }
                    args.push(self.parse_expr()?);
                }
                if !self.eat_op(",") || self.at_op(")") {
                    break;
                }
            }
        }
        self.expect_op(")")?;
        Ok(Expr::Call { func, args, kwargs })
    }
}

/// 展开 f-string：{{ }} 转义为字面花括号，{expr} 为插值表达式
fn parse_fstring(raw: &str) -> Result<Expr, String> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                text.push('}');
                i += 2;
            }
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '}')
                    .ok_or_else(|| format!("unterminated '{{' in f-string '{raw}'"))?;
                let inner: String = chars[i + 1..i + 1 + close].iter().collect();
                let tokens = lex_fragment(&inner)?;
                let mut cursor = ExprParser::new(&tokens, 0);
                let expr = cursor.parse_expr()?;
                cursor.expect_end()?;
                if !text.is_empty() {
                    parts.push(FPart::Text(std::mem::take(&mut text)));
                }
                parts.push(FPart::Expr(Box::new(expr)));
                i += close + 2;
            }
            '}' => return Err(format!("single '}}' in f-string '{raw}'")),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(Expr::FString(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_with_call() {
        let stmts = parse("x = add(2, 3)").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::Assign { target, value } => {
                assert_eq!(target, "x");
                assert!(matches!(value, Expr::Call { func, args, .. }
                    if func == "add" && args.len() == 2));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_kwargs_parsed() {
        let stmts = parse("r = send(to='bob', urgent=True)").unwrap();
        match &stmts[0] {
            Stmt::Assign { value: Expr::Call { kwargs, .. }, .. } => {
                assert_eq!(kwargs[0].0, "to");
                assert_eq!(kwargs[1].0, "urgent");
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_if_elif_else_chain() {
        let code = "if a > 1:\n    b = 1\nelif a > 0:\n    b = 2\nelse:\n    b = 3\n";
        let stmts = parse(code).unwrap();
        match &stmts[0] {
            Stmt::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_for_loop() {
        let stmts = parse("for x in [1, 2]:\n    total += x\n").unwrap();
        assert!(matches!(&stmts[0], Stmt::For { target, .. } if target == "x"));
    }

    #[test]
    fn test_operator_precedence() {
        // 1 + 2 * 3 解析为 1 + (2 * 3)
        let stmts = parse("y = 1 + 2 * 3").unwrap();
        match &stmts[0] {
            Stmt::Assign { value: Expr::Bin { op: BinOp::Add, right, .. }, .. } => {
                assert!(matches!(**right, Expr::Bin { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_fstring_interpolation() {
        let stmts = parse("msg = f\"total is {a + b}!\"").unwrap();
        match &stmts[0] {
            Stmt::Assign { value: Expr::FString(parts), .. } => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[0], FPart::Text(t) if t == "total is "));
                assert!(matches!(&parts[1], FPart::Expr(_)));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_attribute_access_rejected() {
        assert!(parse("x = os.path").is_err());
        assert!(parse("x = s.upper()").is_err());
    }

    #[test]
    fn test_def_import_while_rejected() {
        assert!(parse("import os").is_err());
        assert!(parse("def f():\n    pass\n").is_err());
        assert!(parse("while True:\n    x = 1\n").is_err());
    }

    #[test]
    fn test_tuple_and_dict_literals() {
        let stmts = parse("t = (1, 2)\nd = {'a': 1}").unwrap();
        assert!(matches!(&stmts[0], Stmt::Assign { value: Expr::Tuple(items), .. } if items.len() == 2));
        assert!(matches!(&stmts[1], Stmt::Assign { value: Expr::Dict(pairs), .. } if pairs.len() == 1));
    }

    #[test]
    fn test_multi_target_assignment_rejected() {
        assert!(parse("a, b = 1, 2").is_err());
        assert!(parse("xs[0] = 1").is_err());
    }
}
