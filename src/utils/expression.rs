//! A small, side-effect-free expression language for pagination rules.
//!
//! Supported: number/string/boolean/null literals, identifiers resolved from
//! the context object (`$response`, `$pageCount`, `$request`), member access
//! (`a.b`, `a[0]`, `a["b"]`, `.length`), unary `!` and `-`, arithmetic
//! `+ - * / %`, comparisons, loose and strict equality, `&&` and `||`, and
//! parentheses. There are no calls, assignments or loops.

use crate::errors::ToolError;
use serde_json::Value;

pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ToolError>;

    fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ToolError> {
        Ok(is_truthy(&self.evaluate(expression, context)?))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxedEvaluator;

impl SandboxedEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for SandboxedEvaluator {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ToolError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            context,
        };
        let value = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(invalid(
                expression,
                &format!("unexpected {:?}", parser.tokens[parser.pos]),
            ));
        }
        Ok(value)
    }
}

fn invalid(expression: &str, reason: &str) -> ToolError {
    ToolError::configuration(format!(
        "Invalid expression '{}': {}",
        expression.trim(),
        reason
    ))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
}

const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
];

fn tokenize(expression: &str) -> Result<Vec<Token>, ToolError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    'outer: while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        match ch {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            '.' if !chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                tokens.push(Token::Dot)
            }
            '"' | '\'' | '`' => {
                let quote = ch;
                let mut text = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                        text.push(match chars[i] {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    } else {
                        text.push(chars[i]);
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(invalid(expression, "unterminated string"));
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let number = raw
                    .parse::<f64>()
                    .map_err(|_| invalid(expression, &format!("bad number '{}'", raw)))?;
                tokens.push(Token::Number(number));
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
                continue;
            }
            _ => {
                for op in OPERATORS {
                    let len = op.chars().count();
                    if i + len <= chars.len() && chars[i..i + len].iter().copied().eq(op.chars()) {
                        tokens.push(Token::Op(op));
                        i += len;
                        continue 'outer;
                    }
                }
                return Err(invalid(expression, &format!("unexpected character '{}'", ch)));
            }
        }
        i += 1;
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    context: &'a Value,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        if let Some(Token::Op(op)) = self.peek() {
            if ops.contains(op) {
                let op = *op;
                self.pos += 1;
                return Some(op);
            }
        }
        None
    }

    fn expect(&mut self, token: Token) -> Result<(), ToolError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ToolError::configuration(format!(
                "Invalid expression: expected {:?}",
                token
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Value, ToolError> {
        let mut left = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let right = self.parse_and()?;
            left = if is_truthy(&left) { left } else { right };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value, ToolError> {
        let mut left = self.parse_equality()?;
        while self.eat_op(&["&&"]).is_some() {
            let right = self.parse_equality()?;
            left = if is_truthy(&left) { right } else { left };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Value, ToolError> {
        let mut left = self.parse_comparison()?;
        while let Some(op) = self.eat_op(&["===", "!==", "==", "!="]) {
            let right = self.parse_comparison()?;
            let equal = match op {
                "===" | "!==" => strict_equals(&left, &right),
                _ => loose_equals(&left, &right),
            };
            left = Value::Bool(if op.starts_with('!') { !equal } else { equal });
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Value, ToolError> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.eat_op(&["<=", ">=", "<", ">"]) {
            let right = self.parse_additive()?;
            let ordering = match (&left, &right) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => to_number(&left).partial_cmp(&to_number(&right)),
            };
            let result = match (op, ordering) {
                (_, None) => false,
                ("<", Some(o)) => o.is_lt(),
                ("<=", Some(o)) => o.is_le(),
                (">", Some(o)) => o.is_gt(),
                (_, Some(o)) => o.is_ge(),
            };
            left = Value::Bool(result);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Value, ToolError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let right = self.parse_multiplicative()?;
            left = if op == "+" && (left.is_string() || right.is_string()) {
                Value::String(format!("{}{}", to_text(&left), to_text(&right)))
            } else if op == "+" {
                from_number(to_number(&left) + to_number(&right))
            } else {
                from_number(to_number(&left) - to_number(&right))
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Value, ToolError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let right = self.parse_unary()?;
            let (a, b) = (to_number(&left), to_number(&right));
            left = from_number(match op {
                "*" => a * b,
                "/" => a / b,
                _ => a % b,
            });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Value, ToolError> {
        if self.eat_op(&["!"]).is_some() {
            let value = self.parse_unary()?;
            return Ok(Value::Bool(!is_truthy(&value)));
        }
        if self.eat_op(&["-"]).is_some() {
            let value = self.parse_unary()?;
            return Ok(from_number(-to_number(&value)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Value, ToolError> {
        let mut value = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let Some(Token::Ident(name)) = self.peek().cloned() else {
                        return Err(ToolError::configuration(
                            "Invalid expression: expected a property name after '.'",
                        ));
                    };
                    self.pos += 1;
                    value = member(&value, &Value::String(name));
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let key = self.parse_or()?;
                    self.expect(Token::RBracket)?;
                    value = member(&value, &key);
                }
                _ => return Ok(value),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Value, ToolError> {
        let token = self.peek().cloned().ok_or_else(|| {
            ToolError::configuration("Invalid expression: unexpected end of input")
        })?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(from_number(n)),
            Token::Str(text) => Ok(Value::String(text)),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" | "undefined" => Value::Null,
                _ => self.context.get(&name).cloned().unwrap_or(Value::Null),
            }),
            Token::LParen => {
                let value = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            other => Err(ToolError::configuration(format!(
                "Invalid expression: unexpected {:?}",
                other
            ))),
        }
    }
}

fn member(target: &Value, key: &Value) -> Value {
    match (target, key) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|idx| items.get(idx as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (_, Value::String(name)) => match target {
            Value::Object(map) => match map.get(name) {
                Some(value) => value.clone(),
                None if name == "length" => Value::from(map.len()),
                None => Value::Null,
            },
            Value::Array(items) if name == "length" => Value::from(items.len()),
            Value::String(text) if name == "length" => Value::from(text.chars().count()),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(flag) => {
            if *flag {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(text) if text.trim().is_empty() => 0.0,
        Value::String(text) => text.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn from_number(number: f64) -> Value {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 9.0e15 {
        return Value::from(number as i64);
    }
    serde_json::Number::from_f64(number)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}

fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => to_number(left) == to_number(right),
        _ => left == right,
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(_), _) | (_, Value::Number(_)) | (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            to_number(left) == to_number(right)
        }
        _ => left == right,
    }
}
