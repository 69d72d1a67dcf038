//! 执行环境与解释器
//!
//! 每次执行构建一个隔离命名空间：允许列表内的安全内建函数（模式匹配、日期时间、
//! 容器工具）、调用方注入的上下文变量、以及全部注册工具。生成代码由解释器直接
//! 对 AST 求值，不编译到宿主语言，因此能力天然是允许列表式的；restricted 模式
//! 额外扣留会触达进程环境的内建（now / today / getenv）。
//!
//! 注意：这是建议性隔离，用于降低而非消除执行风险；工具本身做什么不在本层控制。
//!
//! 每次工具调用都被环境拦截：返回值按调用顺序记入 CallLedger，出错时向共享错误
//! 列表追加 "Error in <tool>: <msg>" 并向上传播以中止剩余语句。异步工具无需改写
//! 调用点：解释器对所有工具调用一律 await。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::pythonic::parser::{BinOp, CmpOp, Expr, FPart, Stmt};
use crate::tools::{Tool, ToolDescriptor};

type BuiltinFn = fn(Vec<Value>) -> Result<Value, String>;

/// 环境构建选项
#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    /// 扣留触达进程环境的内建函数
    pub restricted: bool,
    /// for 循环总迭代数上限（防失控循环）
    pub max_loop_iterations: usize,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            restricted: false,
            max_loop_iterations: 10_000,
        }
    }
}

/// 一次执行内每个工具的全部调用结果，按调用顺序
#[derive(Debug, Default)]
pub struct CallLedger {
    entries: HashMap<String, Vec<Value>>,
    /// 工具首次被调用的顺序
    order: Vec<String>,
}

impl CallLedger {
    pub fn record(&mut self, tool: &str, result: Value) {
        if !self.entries.contains_key(tool) {
            self.order.push(tool.to_string());
        }
        self.entries.entry(tool.to_string()).or_default().push(result);
    }

    pub fn entries(&self, tool: &str) -> Option<&[Value]> {
        self.entries.get(tool).map(|v| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (工具名, 结果序列)，按工具首次调用顺序
    pub fn iter_in_call_order(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.order
            .iter()
            .map(|name| (name.as_str(), self.entries[name].as_slice()))
    }
}

/// 一次执行的隔离命名空间；执行结束后即丢弃，不跨运行共享
pub struct ExecutionEnvironment {
    vars: HashMap<String, Value>,
    /// 变量首次赋值顺序（data 导出与结果关联按此顺序）
    assignment_order: Vec<String>,
    /// 初始注入的符号名，harvest 时剔除
    seeded: HashSet<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
    builtins: HashMap<&'static str, BuiltinFn>,
    pub ledger: CallLedger,
    pub errors: Vec<String>,
    max_loop_iterations: usize,
    loop_iterations: usize,
}

impl ExecutionEnvironment {
    pub fn new(
        tools: &[ToolDescriptor],
        context_vars: &Map<String, Value>,
        options: &EnvironmentOptions,
    ) -> Self {
        let mut vars = HashMap::new();
        let mut seeded = HashSet::new();
        for (name, value) in context_vars {
            vars.insert(name.clone(), value.clone());
            seeded.insert(name.clone());
        }

        let tool_map: HashMap<String, Arc<dyn Tool>> = tools
            .iter()
            .map(|d| (d.name().to_string(), d.tool()))
            .collect();

        Self {
            vars,
            assignment_order: Vec::new(),
            seeded,
            tools: tool_map,
            builtins: seed_builtins(options.restricted),
            ledger: CallLedger::default(),
            errors: Vec::new(),
            max_loop_iterations: options.max_loop_iterations,
            loop_iterations: 0,
        }
    }

    /// 执行代码单元；首个错误即中止，已完成的赋值保留（不回滚）
    pub async fn run(&mut self, stmts: &[Stmt]) -> Result<(), String> {
        self.exec_block(stmts).await
    }

    /// 导出生成代码定义的变量：首次赋值顺序，剔除初始注入名
    pub fn harvest(&self) -> Vec<(String, Value)> {
        self.assignment_order
            .iter()
            .filter(|name| !self.seeded.contains(*name))
            .filter_map(|name| self.vars.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    fn assign(&mut self, name: &str, value: Value) {
        if !self.vars.contains_key(name) {
            self.assignment_order.push(name.to_string());
        }
        self.vars.insert(name.to_string(), value);
    }

    fn exec_block<'a>(&'a mut self, stmts: &'a [Stmt]) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            for stmt in stmts {
                self.exec_stmt(stmt).await?;
            }
            Ok(())
        })
    }

    fn exec_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            match stmt {
                Stmt::Assign { target, value } => {
                    let value = self.eval(value).await?;
                    self.assign(target, value);
                    Ok(())
                }
                Stmt::AugAssign { target, op, value } => {
                    let current = self
                        .vars
                        .get(target)
                        .cloned()
                        .ok_or_else(|| format!("name '{target}' is not defined"))?;
                    let rhs = self.eval(value).await?;
                    let combined = arith(*op, &current, &rhs)?;
                    self.assign(target, combined);
                    Ok(())
                }
                Stmt::Expr(expr) => {
                    self.eval(expr).await?;
                    Ok(())
                }
                Stmt::If { branches, orelse } => {
                    for (cond, body) in branches {
                        let value = self.eval(cond).await?;
                        if truthy(&value) {
                            return self.exec_block(body).await;
                        }
                    }
                    self.exec_block(orelse).await
                }
                Stmt::For { target, iter, body } => {
                    let iterable = self.eval(iter).await?;
                    let items = iterate(&iterable)?;
                    for item in items {
                        self.loop_iterations += 1;
                        if self.loop_iterations > self.max_loop_iterations {
                            return Err(format!(
                                "loop iteration limit exceeded ({})",
                                self.max_loop_iterations
                            ));
                        }
                        self.assign(target, item);
                        self.exec_block(body).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            match expr {
                Expr::NoneLit => Ok(Value::Null),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Int(v) => Ok(Value::from(*v)),
                Expr::Float(v) => float_value(*v),
                Expr::Str(s) => Ok(Value::String(s.clone())),
                Expr::FString(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            FPart::Text(text) => out.push_str(text),
                            FPart::Expr(inner) => {
                                let value = self.eval(inner).await?;
                                out.push_str(&to_display(&value));
                            }
                        }
                    }
                    Ok(Value::String(out))
                }
                Expr::Name(name) => self
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("name '{name}' is not defined")),
                Expr::List(items) | Expr::Tuple(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Expr::Dict(pairs) => {
                    let mut out = Map::new();
                    for (key, value) in pairs {
                        let key = self.eval(key).await?;
                        let value = self.eval(value).await?;
                        out.insert(dict_key(&key)?, value);
                    }
                    Ok(Value::Object(out))
                }
                Expr::Call { func, args, kwargs } => {
                    let mut arg_values = Vec::with_capacity(args.len());
                    for arg in args {
                        arg_values.push(self.eval(arg).await?);
                    }
                    let mut kwarg_values = Map::new();
                    for (name, value) in kwargs {
                        let value = self.eval(value).await?;
                        kwarg_values.insert(name.clone(), value);
                    }
                    self.call(func, arg_values, kwarg_values).await
                }
                Expr::Neg(operand) => {
                    let value = self.eval(operand).await?;
                    match &value {
                        Value::Number(n) if n.is_i64() => {
                            checked_int(n.as_i64().expect("checked i64").checked_neg())
                        }
                        Value::Number(n) => float_value(-n.as_f64().expect("number as f64")),
                        other => Err(format!(
                            "bad operand type for unary -: '{}'",
                            type_name(other)
                        )),
                    }
                }
                Expr::Not(operand) => {
                    let value = self.eval(operand).await?;
                    Ok(Value::Bool(!truthy(&value)))
                }
                Expr::Bin { op, left, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    arith(*op, &left, &right)
                }
                Expr::Cmp { op, left, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    compare(*op, &left, &right)
                }
                Expr::And(left, right) => {
                    let left = self.eval(left).await?;
                    if !truthy(&left) {
                        return Ok(left);
                    }
                    self.eval(right).await
                }
                Expr::Or(left, right) => {
                    let left = self.eval(left).await?;
                    if truthy(&left) {
                        return Ok(left);
                    }
                    self.eval(right).await
                }
                Expr::Index { value, index } => {
                    let value = self.eval(value).await?;
                    let index = self.eval(index).await?;
                    subscript(&value, &index)
                }
            }
        })
    }

    /// 按名调用：先查工具（记账 + 错误拦截），再查内建，最后报未定义
    async fn call(
        &mut self,
        func: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, String> {
        if let Some(tool) = self.tools.get(func).cloned() {
            let start = Instant::now();
            let result = tool.call(args, kwargs).await;
            let audit = serde_json::json!({
                "event": "tool_audit",
                "tool": func,
                "ok": result.is_ok(),
                "duration_ms": start.elapsed().as_millis() as u64,
            });
            tracing::info!(audit = %audit.to_string(), "tool");

            return match result {
                Ok(value) => {
                    self.ledger.record(func, value.clone());
                    Ok(value)
                }
                Err(message) => {
                    self.errors.push(format!("Error in {func}: {message}"));
                    Err(message)
                }
            };
        }

        if let Some(builtin) = self.builtins.get(func) {
            if !kwargs.is_empty() {
                return Err(format!("{func}() does not accept keyword arguments"));
            }
            return builtin(args);
        }

        if self.vars.contains_key(func) {
            return Err(format!("'{func}' is not callable"));
        }
        Err(format!("name '{func}' is not defined"))
    }
}

// ---------- 值运算 ----------

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn float_value(f: f64) -> Result<Value, String> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| "float result is not finite".to_string())
}

/// python 风格显示：None / True / 1.5 / 原样字符串；容器内字符串加引号
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                format!("{:?}", n.as_f64().expect("number as f64"))
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(to_repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("'{}': {}", k, to_repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn to_repr(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => to_display(other),
    }
}

fn dict_key(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unhashable dict key type: '{}'", type_name(other))),
    }
}

fn iterate(value: &Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Object(map) => Ok(map.keys().map(|k| Value::String(k.clone())).collect()),
        other => Err(format!("'{}' object is not iterable", type_name(other))),
    }
}

/// 数值感知的相等（int 与 float 同值视为相等，精确比较，无容差）
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| value_eq(x, y)))
        }
        _ => a == b,
    }
}

fn arith(op: BinOp, a: &Value, b: &Value) -> Result<Value, String> {
    use BinOp::*;

    // 字符串 / 列表拼接
    if op == Add {
        if let (Value::String(x), Value::String(y)) = (a, b) {
            return Ok(Value::String(format!("{x}{y}")));
        }
        if let (Value::Array(x), Value::Array(y)) = (a, b) {
            let mut out = x.clone();
            out.extend(y.iter().cloned());
            return Ok(Value::Array(out));
        }
    }

    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return Err(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op_symbol(op),
            type_name(a),
            type_name(b)
        ));
    };

    // 两侧皆整数时尽量保持整数语义
    if let (Some(i), Some(j)) = (x.as_i64(), y.as_i64()) {
        match op {
            Add => return checked_int(i.checked_add(j)),
            Sub => return checked_int(i.checked_sub(j)),
            Mul => return checked_int(i.checked_mul(j)),
            Div => {
                if j == 0 {
                    return Err("division by zero".to_string());
                }
                return float_value(i as f64 / j as f64);
            }
            FloorDiv => {
                if j == 0 {
                    return Err("integer division by zero".to_string());
                }
                // python 向负无穷取整
                let mut q = i / j;
                if i % j != 0 && (i < 0) != (j < 0) {
                    q -= 1;
                }
                return Ok(Value::from(q));
            }
            Mod => {
                if j == 0 {
                    return Err("integer modulo by zero".to_string());
                }
                // python 余数取除数符号
                return Ok(Value::from(((i % j) + j) % j));
            }
        }
    }

    let (Some(fx), Some(fy)) = (x.as_f64(), y.as_f64()) else {
        return Err("numeric operand out of range".to_string());
    };
    match op {
        Add => float_value(fx + fy),
        Sub => float_value(fx - fy),
        Mul => float_value(fx * fy),
        Div => {
            if fy == 0.0 {
                return Err("division by zero".to_string());
            }
            float_value(fx / fy)
        }
        FloorDiv => {
            if fy == 0.0 {
                return Err("division by zero".to_string());
            }
            float_value((fx / fy).floor())
        }
        Mod => {
            if fy == 0.0 {
                return Err("modulo by zero".to_string());
            }
            float_value(fx - fy * (fx / fy).floor())
        }
    }
}

fn checked_int(value: Option<i64>) -> Result<Value, String> {
    value
        .map(Value::from)
        .ok_or_else(|| "integer overflow".to_string())
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<Value, String> {
    use CmpOp::*;
    match op {
        Eq => Ok(Value::Bool(value_eq(a, b))),
        Ne => Ok(Value::Bool(!value_eq(a, b))),
        In => membership(a, b).map(Value::Bool),
        NotIn => membership(a, b).map(|m| Value::Bool(!m)),
        Lt | Le | Gt | Ge => {
            let ordering = match (a, b) {
                (Value::Number(x), Value::Number(y)) => {
                    match (x.as_f64(), y.as_f64()) {
                        (Some(fx), Some(fy)) => fx.partial_cmp(&fy),
                        _ => None,
                    }
                }
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(format!(
                    "'{}' not supported between '{}' and '{}'",
                    cmp_symbol(op),
                    type_name(a),
                    type_name(b)
                ));
            };
            Ok(Value::Bool(match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            }))
        }
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::Ne => "!=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}

fn membership(needle: &Value, haystack: &Value) -> Result<bool, String> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| value_eq(item, needle))),
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            other => Err(format!(
                "'in <str>' requires str operand, not '{}'",
                type_name(other)
            )),
        },
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(format!(
                "'in <dict>' requires str key, not '{}'",
                type_name(other)
            )),
        },
        other => Err(format!("'{}' object is not a container", type_name(other))),
    }
}

fn subscript(value: &Value, index: &Value) -> Result<Value, String> {
    match (value, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| "list indices must be integers".to_string())?;
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            if i < 0 || i >= len {
                return Err("list index out of range".to_string());
            }
            Ok(items[i as usize].clone())
        }
        (Value::String(s), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| "string indices must be integers".to_string())?;
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let i = if i < 0 { len + i } else { i };
            if i < 0 || i >= len {
                return Err("string index out of range".to_string());
            }
            Ok(Value::String(chars[i as usize].to_string()))
        }
        (Value::Object(map), key) => {
            let key = dict_key(key)?;
            map.get(&key)
                .cloned()
                .ok_or_else(|| format!("KeyError: '{key}'"))
        }
        (other, _) => Err(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        )),
    }
}

// ---------- 内建函数 ----------

fn seed_builtins(restricted: bool) -> HashMap<&'static str, BuiltinFn> {
    let mut builtins: HashMap<&'static str, BuiltinFn> = HashMap::new();
    builtins.insert("len", builtin_len);
    builtins.insert("str", builtin_str);
    builtins.insert("int", builtin_int);
    builtins.insert("float", builtin_float);
    builtins.insert("bool", builtin_bool);
    builtins.insert("abs", builtin_abs);
    builtins.insert("round", builtin_round);
    builtins.insert("min", builtin_min);
    builtins.insert("max", builtin_max);
    builtins.insert("sum", builtin_sum);
    builtins.insert("sorted", builtin_sorted);
    builtins.insert("range", builtin_range);
    builtins.insert("print", builtin_print);
    builtins.insert("regex_search", builtin_regex_search);
    builtins.insert("regex_findall", builtin_regex_findall);
    builtins.insert("regex_replace", builtin_regex_replace);
    builtins.insert("days_between", builtin_days_between);
    builtins.insert("add_days", builtin_add_days);
    if !restricted {
        builtins.insert("now", builtin_now);
        builtins.insert("today", builtin_today);
        builtins.insert("getenv", builtin_getenv);
    }
    builtins
}

fn one_arg(mut args: Vec<Value>, name: &str) -> Result<Value, String> {
    if args.len() != 1 {
        return Err(format!("{name}() takes exactly one argument"));
    }
    Ok(args.remove(0))
}

fn builtin_len(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "len")?;
    let len = match &value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("object of type '{}' has no len()", type_name(other))),
    };
    Ok(Value::from(len as i64))
}

fn builtin_str(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "str")?;
    Ok(Value::String(to_display(&value)))
}

fn builtin_int(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "int")?;
    match &value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else {
                Ok(Value::from(n.as_f64().expect("number as f64").trunc() as i64))
            }
        }
        Value::Bool(b) => Ok(Value::from(*b as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("invalid literal for int(): '{s}'")),
        other => Err(format!("int() argument must be a number or str, not '{}'", type_name(other))),
    }
}

fn builtin_float(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "float")?;
    match &value {
        Value::Number(n) => float_value(n.as_f64().expect("number as f64")),
        Value::Bool(b) => float_value(*b as i64 as f64),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("could not convert string to float: '{s}'"))
            .and_then(float_value),
        other => Err(format!("float() argument must be a number or str, not '{}'", type_name(other))),
    }
}

fn builtin_bool(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "bool")?;
    Ok(Value::Bool(truthy(&value)))
}

fn builtin_abs(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "abs")?;
    match &value {
        Value::Number(n) if n.is_i64() => {
            checked_int(n.as_i64().expect("checked i64").checked_abs())
        }
        Value::Number(n) => float_value(n.as_f64().expect("number as f64").abs()),
        other => Err(format!("bad operand type for abs(): '{}'", type_name(other))),
    }
}

fn builtin_round(args: Vec<Value>) -> Result<Value, String> {
    if args.is_empty() || args.len() > 2 {
        return Err("round() takes one or two arguments".to_string());
    }
    let Value::Number(n) = &args[0] else {
        return Err(format!("round() argument must be a number, not '{}'", type_name(&args[0])));
    };
    let f = n.as_f64().expect("number as f64");
    match args.get(1) {
        None => Ok(Value::from(f.round() as i64)),
        Some(Value::Number(d)) => {
            let digits = d.as_i64().ok_or("round() ndigits must be an integer")?;
            let factor = 10f64.powi(digits as i32);
            float_value((f * factor).round() / factor)
        }
        Some(other) => Err(format!("round() ndigits must be an integer, not '{}'", type_name(other))),
    }
}

fn numeric_items(args: Vec<Value>, name: &str) -> Result<Vec<Value>, String> {
    let items = if args.len() == 1 {
        match args.into_iter().next().expect("one argument") {
            Value::Array(items) => items,
            single => vec![single],
        }
    } else {
        args
    };
    if items.is_empty() {
        return Err(format!("{name}() arg is an empty sequence"));
    }
    Ok(items)
}

fn extremum(args: Vec<Value>, name: &str, want_max: bool) -> Result<Value, String> {
    let items = numeric_items(args, name)?;
    let mut best = items[0].clone();
    for item in &items[1..] {
        let keep_item = match (&best, item) {
            (Value::Number(x), Value::Number(y)) => {
                let fx = x.as_f64().expect("number as f64");
                let fy = y.as_f64().expect("number as f64");
                if want_max { fy > fx } else { fy < fx }
            }
            (Value::String(x), Value::String(y)) => {
                if want_max { y > x } else { y < x }
            }
            _ => return Err(format!("{name}() arguments must be all numbers or all strings")),
        };
        if keep_item {
            best = item.clone();
        }
    }
    Ok(best)
}

fn builtin_min(args: Vec<Value>) -> Result<Value, String> {
    extremum(args, "min", false)
}

fn builtin_max(args: Vec<Value>) -> Result<Value, String> {
    extremum(args, "max", true)
}

fn builtin_sum(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "sum")?;
    let Value::Array(items) = value else {
        return Err(format!("sum() argument must be a list, not '{}'", type_name(&value)));
    };
    let mut acc = Value::from(0);
    for item in &items {
        acc = arith(BinOp::Add, &acc, item)?;
    }
    Ok(acc)
}

fn builtin_sorted(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "sorted")?;
    let Value::Array(mut items) = value else {
        return Err(format!("sorted() argument must be a list, not '{}'", type_name(&value)));
    };
    let all_numbers = items.iter().all(|v| matches!(v, Value::Number(_)));
    let all_strings = items.iter().all(|v| matches!(v, Value::String(_)));
    if all_numbers {
        items.sort_by(|a, b| {
            let fa = a.as_f64().expect("number as f64");
            let fb = b.as_f64().expect("number as f64");
            fa.total_cmp(&fb)
        });
    } else if all_strings {
        items.sort_by(|a, b| {
            a.as_str().expect("checked str").cmp(b.as_str().expect("checked str"))
        });
    } else {
        return Err("sorted() requires a list of all numbers or all strings".to_string());
    }
    Ok(Value::Array(items))
}

const MAX_RANGE: i64 = 100_000;

fn builtin_range(args: Vec<Value>) -> Result<Value, String> {
    let ints: Vec<i64> = args
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| "range() arguments must be integers".to_string()))
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err("range() takes one to three arguments".to_string()),
    };
    if step == 0 {
        return Err("range() step must not be zero".to_string());
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(Value::from(i));
        if out.len() as i64 > MAX_RANGE {
            return Err(format!("range() result longer than {MAX_RANGE}"));
        }
        i += step;
    }
    Ok(Value::Array(out))
}

fn builtin_print(args: Vec<Value>) -> Result<Value, String> {
    let line: Vec<String> = args.iter().map(to_display).collect();
    tracing::info!(output = %line.join(" "), "print");
    Ok(Value::Null)
}

fn two_strings(args: &[Value], name: &str) -> Result<(String, String), String> {
    match args {
        [Value::String(a), Value::String(b)] => Ok((a.clone(), b.clone())),
        _ => Err(format!("{name}() takes two string arguments")),
    }
}

fn builtin_regex_search(args: Vec<Value>) -> Result<Value, String> {
    let (pattern, text) = two_strings(&args, "regex_search")?;
    let re = regex::Regex::new(&pattern).map_err(|e| format!("invalid pattern: {e}"))?;
    Ok(re
        .find(&text)
        .map(|m| Value::String(m.as_str().to_string()))
        .unwrap_or(Value::Null))
}

fn builtin_regex_findall(args: Vec<Value>) -> Result<Value, String> {
    let (pattern, text) = two_strings(&args, "regex_findall")?;
    let re = regex::Regex::new(&pattern).map_err(|e| format!("invalid pattern: {e}"))?;
    Ok(Value::Array(
        re.find_iter(&text)
            .map(|m| Value::String(m.as_str().to_string()))
            .collect(),
    ))
}

fn builtin_regex_replace(args: Vec<Value>) -> Result<Value, String> {
    match args.as_slice() {
        [Value::String(pattern), Value::String(text), Value::String(repl)] => {
            let re = regex::Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
            Ok(Value::String(re.replace_all(text, repl.as_str()).into_owned()))
        }
        _ => Err("regex_replace() takes three string arguments".to_string()),
    }
}

fn builtin_now(args: Vec<Value>) -> Result<Value, String> {
    if !args.is_empty() {
        return Err("now() takes no arguments".to_string());
    }
    Ok(Value::String(
        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
    ))
}

fn builtin_today(args: Vec<Value>) -> Result<Value, String> {
    if !args.is_empty() {
        return Err("today() takes no arguments".to_string());
    }
    Ok(Value::String(
        chrono::Local::now().format("%Y-%m-%d").to_string(),
    ))
}

fn parse_date(text: &str) -> Result<chrono::NaiveDate, String> {
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{text}', expected YYYY-MM-DD"))
}

/// 两个 YYYY-MM-DD 日期之间的天数（后减前，可为负）
fn builtin_days_between(args: Vec<Value>) -> Result<Value, String> {
    let (from, to) = two_strings(&args, "days_between")?;
    let from = parse_date(&from)?;
    let to = parse_date(&to)?;
    Ok(Value::from((to - from).num_days()))
}

fn builtin_add_days(args: Vec<Value>) -> Result<Value, String> {
    match args.as_slice() {
        [Value::String(date), Value::Number(n)] => {
            let days = n
                .as_i64()
                .ok_or_else(|| "add_days() days must be an integer".to_string())?;
            let delta = chrono::Duration::try_days(days)
                .ok_or_else(|| "add_days() days out of range".to_string())?;
            let shifted = parse_date(date)?
                .checked_add_signed(delta)
                .ok_or_else(|| "add_days() result out of range".to_string())?;
            Ok(Value::String(shifted.format("%Y-%m-%d").to_string()))
        }
        _ => Err("add_days() takes a date string and an integer".to_string()),
    }
}

fn builtin_getenv(args: Vec<Value>) -> Result<Value, String> {
    let value = one_arg(args, "getenv")?;
    let Value::String(name) = value else {
        return Err("getenv() argument must be a string".to_string());
    };
    Ok(std::env::var(&name)
        .map(Value::String)
        .unwrap_or(Value::Null))
}
