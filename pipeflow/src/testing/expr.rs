//! A small reference expression language.
//!
//! Supports integers, floats, strings, booleans, `null`, lists `[..]`,
//! dictionaries `{k: v}`, arithmetic with the usual precedence, local
//! bindings `let x = e in body`, lambdas `fn(x, y) -> body` with calls,
//! field access `d.k` (also on pipelines) and a few builtins: `len`,
//! `table`, `column` and `error`.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::EvalError;
use crate::evaluator::{Evaluator, NodeBody};
use crate::value::{Environment, FunctionValue, Table, Value};

const BUILTINS: &[&str] = &["len", "table", "column", "error"];

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Let,
    In,
    Fn,
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Eq,
    Arrow,
    Dot,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

fn syntax_error(message: impl Into<String>) -> EvalError {
    EvalError::new("SyntaxError", message)
}

fn lex(src: &str) -> Result<Vec<Token>, EvalError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let tok = if c.is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let is_float = i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let text = &src[start..i];
                Tok::Float(
                    text.parse()
                        .map_err(|_| syntax_error(format!("Invalid number '{text}'.")))?,
                )
            } else {
                let text = &src[start..i];
                Tok::Int(
                    text.parse()
                        .map_err(|_| syntax_error(format!("Integer literal '{text}' is too large.")))?,
                )
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            match &src[start..i] {
                "let" => Tok::Let,
                "in" => Tok::In,
                "fn" => Tok::Fn,
                "true" => Tok::True,
                "false" => Tok::False,
                "null" => Tok::Null,
                ident => Tok::Ident(ident.to_string()),
            }
        } else if c == '"' {
            i += 1;
            let mut text = String::new();
            let mut chars = src[i..].char_indices();
            let mut closed = false;
            while let Some((offset, ch)) = chars.next() {
                match ch {
                    '"' => {
                        i += offset + 1;
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, 'n')) => text.push('\n'),
                        Some((_, 't')) => text.push('\t'),
                        Some((_, other)) => text.push(other),
                        None => break,
                    },
                    other => text.push(other),
                }
            }
            if !closed {
                return Err(syntax_error("Unterminated string literal."));
            }
            Tok::Str(text)
        } else {
            i += 1;
            match c {
                '+' => Tok::Plus,
                '-' if bytes.get(i) == Some(&b'>') => {
                    i += 1;
                    Tok::Arrow
                }
                '-' => Tok::Minus,
                '*' => Tok::Star,
                '/' => Tok::Slash,
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                '[' => Tok::LBracket,
                ']' => Tok::RBracket,
                '{' => Tok::LBrace,
                '}' => Tok::RBrace,
                ',' => Tok::Comma,
                ':' => Tok::Colon,
                '=' => Tok::Eq,
                '.' => Tok::Dot,
                other => return Err(syntax_error(format!("Unexpected character '{other}'."))),
            }
        };

        tokens.push(Token { tok, start, end: i });
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Dict(Vec<(String, Expr)>),
    Let(String, Box<Expr>, Box<Expr>),
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
        source: String,
    },
    Call(Box<Expr>, Vec<Expr>),
    Field(Box<Expr>, String),
}

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn parse(src: &'s str) -> Result<Expr, EvalError> {
        let mut parser = Self {
            src,
            tokens: lex(src)?,
            pos: 0,
        };
        if parser.tokens.is_empty() {
            return Err(syntax_error("Empty expression."));
        }
        let expr = parser.expr()?;
        if let Some(extra) = parser.tokens.get(parser.pos) {
            return Err(syntax_error(format!(
                "Unexpected '{}' after expression.",
                &src[extra.start..extra.end]
            )));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), EvalError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(syntax_error(format!("Expected {what}.")))
        }
    }

    fn ident(&mut self) -> Result<String, EvalError> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name),
            _ => Err(syntax_error("Expected an identifier.")),
        }
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Tok::Let) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Tok::Eq, "'=' in let binding")?;
                let value = self.expr()?;
                self.expect(&Tok::In, "'in' after let binding")?;
                let body = self.expr()?;
                Ok(Expr::Let(name, Box::new(value), Box::new(body)))
            }
            Some(Tok::Fn) => {
                self.pos += 1;
                self.expect(&Tok::LParen, "'(' after fn")?;
                let mut params = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        params.push(self.ident()?);
                        if self.eat(&Tok::RParen) {
                            break;
                        }
                        self.expect(&Tok::Comma, "',' between parameters")?;
                    }
                }
                self.expect(&Tok::Arrow, "'->' after parameters")?;
                let body_start = self.tokens.get(self.pos).map_or(self.src.len(), |t| t.start);
                let body = self.expr()?;
                let body_end = self.tokens[self.pos - 1].end;
                Ok(Expr::Lambda {
                    params,
                    body: Box::new(body),
                    source: self.src[body_start..body_end].trim().to_string(),
                })
            }
            _ => self.additive(),
        }
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Tok::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::LParen) {
                let args = self.sequence(&Tok::RParen)?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat(&Tok::Dot) {
                let field = self.ident()?;
                expr = Expr::Field(Box::new(expr), field);
            } else {
                return Ok(expr);
            }
        }
    }

    fn sequence(&mut self, close: &Tok) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Tok::Comma, "',' between items")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Tok::Int(i)) => Ok(Expr::Lit(Value::Int(i))),
            Some(Tok::Float(x)) => Ok(Expr::Lit(Value::Float(x))),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Value::Str(s))),
            Some(Tok::True) => Ok(Expr::Lit(Value::Bool(true))),
            Some(Tok::False) => Ok(Expr::Lit(Value::Bool(false))),
            Some(Tok::Null) => Ok(Expr::Lit(Value::Null)),
            Some(Tok::Ident(name)) => Ok(Expr::Var(name)),
            Some(Tok::LParen) => {
                let expr = self.expr()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(expr)
            }
            Some(Tok::LBracket) => Ok(Expr::List(self.sequence(&Tok::RBracket)?)),
            Some(Tok::LBrace) => {
                let mut entries = Vec::new();
                if self.eat(&Tok::RBrace) {
                    return Ok(Expr::Dict(entries));
                }
                loop {
                    let key = match self.next() {
                        Some(Tok::Ident(k) | Tok::Str(k)) => k,
                        _ => return Err(syntax_error("Expected a dictionary key.")),
                    };
                    self.expect(&Tok::Colon, "':' after dictionary key")?;
                    entries.push((key, self.expr()?));
                    if self.eat(&Tok::RBrace) {
                        return Ok(Expr::Dict(entries));
                    }
                    self.expect(&Tok::Comma, "',' between entries")?;
                }
            }
            Some(_) | None => Err(syntax_error("Expected an expression.")),
        }
    }
}

fn collect_free(
    expr: &Expr,
    bound: &mut Vec<String>,
    candidates: &BTreeSet<String>,
    out: &mut BTreeSet<String>,
) {
    match expr {
        Expr::Lit(_) => {}
        Expr::Var(name) => {
            if candidates.contains(name) && !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        Expr::Neg(inner) | Expr::Field(inner, _) => collect_free(inner, bound, candidates, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_free(lhs, bound, candidates, out);
            collect_free(rhs, bound, candidates, out);
        }
        Expr::List(items) => {
            for item in items {
                collect_free(item, bound, candidates, out);
            }
        }
        Expr::Dict(entries) => {
            for (_, value) in entries {
                collect_free(value, bound, candidates, out);
            }
        }
        Expr::Let(name, value, body) => {
            collect_free(value, bound, candidates, out);
            bound.push(name.clone());
            collect_free(body, bound, candidates, out);
            bound.pop();
        }
        Expr::Lambda { params, body, .. } => {
            let depth = bound.len();
            bound.extend(params.iter().cloned());
            collect_free(body, bound, candidates, out);
            bound.truncate(depth);
        }
        Expr::Call(callee, args) => {
            collect_free(callee, bound, candidates, out);
            for arg in args {
                collect_free(arg, bound, candidates, out);
            }
        }
    }
}

fn type_error(message: impl Into<String>) -> EvalError {
    EvalError::new("TypeError", message)
}

fn division_by_zero() -> EvalError {
    EvalError::new("DivisionByZero", "Division by zero.")
}

fn overflow() -> EvalError {
    EvalError::new("ValueError", "Integer overflow.")
}

#[allow(clippy::cast_precision_loss)]
fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (BinOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (op, Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div if b == 0 => Err(division_by_zero()),
            BinOp::Div => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
        },
        (op, lhs, rhs) => {
            let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) else {
                return Err(type_error(format!(
                    "Cannot apply {op:?} to {} and {}.",
                    lhs.kind(),
                    rhs.kind()
                )));
            };
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div if b == 0.0 => Err(division_by_zero()),
                BinOp::Div => Ok(Value::Float(a / b)),
            }
        }
    }
}

/// Reference evaluator for the expression language described above.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn eval(&self, expr: &Expr, env: &Environment) -> Result<Value, EvalError> {
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Var(name) => env.get(name).cloned().ok_or_else(|| {
                EvalError::new("NameError", format!("Name '{name}' is not defined."))
            }),
            Expr::Neg(inner) => match self.eval(inner, env)? {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(type_error(format!("Cannot negate {}.", other.kind()))),
            },
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, env)?;
                let rhs = self.eval(rhs, env)?;
                binary(*op, lhs, rhs)
            }
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Dict(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value, env)?);
                }
                Ok(Value::Dict(map))
            }
            Expr::Let(name, value, body) => {
                let value = self.eval(value, env)?;
                let mut inner = env.clone();
                inner.bind(name.clone(), value);
                self.eval(body, &inner)
            }
            Expr::Lambda { params, body, source } => {
                let mut free = BTreeSet::new();
                let mut bound = params.clone();
                collect_free(body, &mut bound, &env.names(), &mut free);
                let captured = free
                    .into_iter()
                    .filter_map(|name| env.get(&name).cloned().map(|v| (name, v)))
                    .collect();
                Ok(Value::Function(FunctionValue {
                    params: params.clone(),
                    body: source.clone(),
                    captured,
                }))
            }
            Expr::Call(callee, args) => {
                let args: Vec<Value> = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<Result<_, _>>()?;
                if let Expr::Var(name) = callee.as_ref() {
                    if !env.contains(name) && BUILTINS.contains(&name.as_str()) {
                        return builtin(name, args);
                    }
                }
                match self.eval(callee, env)? {
                    Value::Function(func) => self.apply(&func, args),
                    other => Err(type_error(format!("{} is not callable.", other.kind()))),
                }
            }
            Expr::Field(target, field) => match self.eval(target, env)? {
                Value::Dict(map) => map.get(field).cloned().ok_or_else(|| {
                    EvalError::new("KeyError", format!("Key '{field}' not found."))
                }),
                Value::Pipeline(pipeline) => pipeline
                    .value(field)
                    .cloned()
                    .map_err(|err| EvalError::new(err.kind().to_string(), err.to_string())),
                other => Err(type_error(format!("{} has no field '{field}'.", other.kind()))),
            },
        }
    }

    fn apply(&self, func: &FunctionValue, args: Vec<Value>) -> Result<Value, EvalError> {
        if func.params.len() != args.len() {
            return Err(type_error(format!(
                "Function expects {} arguments, got {}.",
                func.params.len(),
                args.len()
            )));
        }
        let body = Parser::parse(&func.body)?;
        let mut env = Environment::new();
        for (name, value) in &func.captured {
            env.bind(name.clone(), value.clone());
        }
        for (param, arg) in func.params.iter().zip(args) {
            env.bind(param.clone(), arg);
        }
        self.eval(&body, &env)
    }
}

fn builtin(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(type_error(format!("{name}() takes {n} argument(s), got {}.", args.len())))
        }
    };

    match name {
        "len" => {
            arity(1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Dict(map) => map.len(),
                Value::Table(table) => table.num_rows(),
                other => return Err(type_error(format!("len() of {}.", other.kind()))),
            };
            i64::try_from(len).map(Value::Int).map_err(|_| overflow())
        }
        "table" => {
            arity(1)?;
            let Value::Dict(columns) = &args[0] else {
                return Err(type_error("table() expects a dictionary of lists."));
            };
            let columns = columns
                .iter()
                .map(|(name, values)| match values {
                    Value::List(items) => Ok((name.clone(), items.clone())),
                    other => Err(type_error(format!(
                        "Column '{name}' must be a list, got {}.",
                        other.kind()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Table::from_columns(columns)
                .map(Value::Table)
                .map_err(|err| EvalError::new("ValueError", err.to_string()))
        }
        "column" => {
            arity(2)?;
            match (&args[0], &args[1]) {
                (Value::Table(table), Value::Str(column)) => table
                    .column_values(column)
                    .map(Value::List)
                    .ok_or_else(|| EvalError::new("KeyError", format!("Column '{column}' not found."))),
                _ => Err(type_error("column() expects a table and a column name.")),
            }
        }
        "error" => {
            arity(1)?;
            let message = match &args[0] {
                Value::Str(s) => s.clone(),
                other => other.to_string(),
            };
            Err(EvalError::new("UserError", message))
        }
        _ => Err(EvalError::new("NameError", format!("Name '{name}' is not defined."))),
    }
}

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, body: &NodeBody, env: &Environment) -> Result<Value, EvalError> {
        let expr = Parser::parse(body.source())?;
        self.eval(&expr, env)
    }

    fn free_references(&self, body: &NodeBody, candidates: &BTreeSet<String>) -> BTreeSet<String> {
        match Parser::parse(body.source()) {
            Ok(expr) => {
                let mut out = BTreeSet::new();
                collect_free(&expr, &mut Vec::new(), candidates, &mut out);
                out
            }
            // Unparsable bodies fail at evaluation; report every candidate
            // token so the graph still reflects what the text mentions.
            Err(_) => lex(body.source())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|t| match t.tok {
                    Tok::Ident(name) if candidates.contains(&name) => Some(name),
                    _ => None,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval(src: &str) -> Result<Value, EvalError> {
        ExprEvaluator::new().evaluate(&NodeBody::new(src), &Environment::new())
    }

    fn free(src: &str, candidates: &[&str]) -> Vec<String> {
        let candidates: BTreeSet<String> = candidates.iter().map(|c| (*c).to_string()).collect();
        ExprEvaluator::new()
            .free_references(&NodeBody::new(src), &candidates)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Value::Int(9));
        assert_eq!(eval("-2 * 3 - 1").unwrap(), Value::Int(-7));
        assert_eq!(eval("7 / 2").unwrap(), Value::Int(3));
        assert_eq!(eval("1.5 * 2").unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("1 / 0").unwrap_err();
        assert_eq!(err.to_string(), "Error(DivisionByZero: Division by zero.)");
    }

    #[test]
    fn test_collections_and_strings() {
        assert_eq!(eval("\"ab\" + \"c\"").unwrap(), Value::str("abc"));
        assert_eq!(eval("len([1, 2] + [3])").unwrap(), Value::Int(3));
        assert_eq!(eval("{a: 1, \"b c\": 2}.a").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_let_and_lambda() {
        assert_eq!(eval("let x = 5 in x * 2").unwrap(), Value::Int(10));
        assert_eq!(eval("let k = 10 in let f = fn(x) -> x + k in f(1)").unwrap(), Value::Int(11));
        let f = eval("fn(x, y) -> x * y").unwrap();
        assert_eq!(f.to_string(), "fn(x, y) -> x * y");
    }

    #[test]
    fn test_table_builtin() {
        let t = eval("table({x: [1, 2, 3], y: [\"a\", \"b\", \"c\"]})").unwrap();
        assert_eq!(t.kind(), crate::value::ValueKind::Table);
        let total = ExprEvaluator::new()
            .evaluate(&NodeBody::new("len(t)"), &Environment::new().with("t", t))
            .unwrap();
        assert_eq!(total, Value::Int(3));
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval("nope").unwrap_err().code, "NameError");
        assert_eq!(eval("error(\"boom\")").unwrap_err().to_string(), "Error(UserError: boom)");
        assert_eq!(eval("1 +").unwrap_err().code, "SyntaxError");
        assert_eq!(eval("1 + \"a\"").unwrap_err().code, "TypeError");
    }

    #[test]
    fn test_free_references_respect_scope() {
        assert_eq!(free("a + b * c", &["a", "c", "z"]), vec!["a", "c"]);
        assert_eq!(free("let a = b in a", &["a", "b"]), vec!["b"]);
        assert_eq!(free("fn(a) -> a + b", &["a", "b"]), vec!["b"]);
        assert_eq!(free("p.a", &["a", "p"]), vec!["p"]);
        assert_eq!(free("a +", &["a"]), vec!["a"]);
    }
}
