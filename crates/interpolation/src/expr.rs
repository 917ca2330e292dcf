//! Expression parsing and evaluation
//!
//! Grammar shared by templates and mappings:
//!
//! ```text
//! expr  := array | path | call | string | number | "true" | "false" | "null"
//! array := "[" (expr ("," expr)* ","?)? "]"
//! path  := "this" ("." segment)*
//! call  := ident "(" string? ")"
//! ```

use contracts::{Batch, ContractError, Message};
use serde_json::{Number, Value};

/// Compiled expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    This(Vec<String>),
    Call(Function),
}

/// Built-in functions
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Function {
    /// Value at a dot path of the message JSON
    Json(Vec<String>),
    /// Metadata value
    Meta(String),
    /// Raw payload as text
    Content,
    /// Item error text
    Error,
    /// Position of the message in the batch
    BatchIndex,
    /// Number of messages in the batch
    BatchSize,
}

/// Parse a complete expression; trailing input is an error
pub(crate) fn parse_expression(src: &str) -> Result<Expr, String> {
    let mut parser = Parser::new(src);
    let expr = parser.parse_expr()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(format!(
            "unexpected trailing input at position {}",
            parser.pos
        ));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!("expected '{expected}', found '{c}'")),
            None => Err(format!("expected '{expected}', found end of input")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        match self.peek() {
            Some('[') => self.parse_array(),
            Some('"') => self.parse_string().map(|s| Expr::Literal(Value::String(s))),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number().map(Expr::Literal),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.parse_word(),
            Some(c) => Err(format!("unexpected character '{c}'")),
            None => Err("expected expression".to_string()),
        }
    }

    fn parse_array(&mut self) -> Result<Expr, String> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Expr::Array(items));
            }
            items.push(self.parse_expr()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(Expr::Array(items)),
                Some(c) => return Err(format!("expected ',' or ']', found '{c}'")),
                None => return Err("unterminated array".to_string()),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('"' | '\\')) => out.push(c),
                    Some(c) => return Err(format!("unknown escape '\\{c}'")),
                    None => return Err("unterminated string".to_string()),
                },
                Some(c) => out.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::from(i));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("invalid number '{text}'"))
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_word(&mut self) -> Result<Expr, String> {
        let word = self.parse_ident();
        match word.as_str() {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" => Ok(Expr::Literal(Value::Null)),
            "this" => self.parse_path_tail().map(Expr::This),
            _ => self.parse_call(word).map(Expr::Call),
        }
    }

    fn parse_path_tail(&mut self) -> Result<Vec<String>, String> {
        let mut path = Vec::new();
        while self.peek() == Some('.') {
            self.pos += 1;
            let segment = self.parse_ident();
            if segment.is_empty() {
                return Err("empty path segment after '.'".to_string());
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn parse_call(&mut self, name: String) -> Result<Function, String> {
        self.expect('(')?;
        self.skip_ws();
        let arg = if self.peek() == Some('"') {
            Some(self.parse_string()?)
        } else {
            None
        };
        self.expect(')')?;

        match (name.as_str(), arg) {
            ("json", arg) => Ok(Function::Json(split_path(arg.as_deref().unwrap_or("")))),
            ("meta", Some(key)) => Ok(Function::Meta(key)),
            ("meta", None) => Err("meta() requires a key argument".to_string()),
            ("content", None) => Ok(Function::Content),
            ("error", None) => Ok(Function::Error),
            ("batch_index", None) => Ok(Function::BatchIndex),
            ("batch_size", None) => Ok(Function::BatchSize),
            ("content" | "error" | "batch_index" | "batch_size", Some(_)) => {
                Err(format!("{name}() takes no arguments"))
            }
            _ => Err(format!("unknown function '{name}'")),
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

fn lookup<'v>(root: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn message_at(index: usize, batch: &Batch) -> Result<&Message, ContractError> {
    batch.get(index).ok_or_else(|| {
        ContractError::resolution(format!(
            "message index {index} out of range for batch of {}",
            batch.len()
        ))
    })
}

fn resolve_path(msg: &Message, path: &[String], describe: &str) -> Result<Value, ContractError> {
    let root = msg.as_structured()?;
    lookup(&root, path)
        .cloned()
        .ok_or_else(|| ContractError::resolution(format!("path '{describe}' not found")))
}

impl Expr {
    /// Evaluate against message `index` of `batch`
    pub(crate) fn eval(&self, index: usize, batch: &Batch) -> Result<Value, ContractError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Array(items) => items
                .iter()
                .map(|item| item.eval(index, batch))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::This(path) => {
                let describe = std::iter::once("this")
                    .chain(path.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(".");
                resolve_path(message_at(index, batch)?, path, &describe)
            }
            Expr::Call(function) => function.eval(index, batch),
        }
    }
}

impl Function {
    fn eval(&self, index: usize, batch: &Batch) -> Result<Value, ContractError> {
        match self {
            Function::Json(path) => {
                resolve_path(message_at(index, batch)?, path, &path.join("."))
            }
            Function::Meta(key) => message_at(index, batch)?
                .metadata(key)
                .map(|v| Value::String(v.to_string()))
                .ok_or_else(|| ContractError::resolution(format!("metadata key '{key}' not set"))),
            Function::Content => {
                let msg = message_at(index, batch)?;
                Ok(Value::String(
                    String::from_utf8_lossy(msg.as_bytes()).into_owned(),
                ))
            }
            Function::Error => {
                let msg = message_at(index, batch)?;
                Ok(Value::String(
                    msg.error().map(|e| e.to_string()).unwrap_or_default(),
                ))
            }
            Function::BatchIndex => Ok(Value::from(index)),
            Function::BatchSize => Ok(Value::from(batch.len())),
        }
    }
}
