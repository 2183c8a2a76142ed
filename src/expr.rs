use crate::error::{ReckonError, Result};
use crate::value::Value;

/// Operators usable in configuration rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

/// A compiled configuration expression: column references, literals, and
/// binary operations. Used for column defaults, dependant-column
/// recomputation, and hard-link conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Neg(Box<Expr>),
}

impl Expr {
    /// Compile an expression string. Identifiers are column references;
    /// string literals are quoted with single or double quotes.
    pub fn parse(input: &str) -> Result<Expr> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(ReckonError::Config(format!(
                "trailing input in expression \"{input}\""
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a row, resolving column references through `lookup`.
    pub fn evaluate<F>(&self, lookup: &F) -> Result<Value>
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => lookup(name)
                .ok_or_else(|| ReckonError::UnknownField(name.clone())),
            Expr::Neg(inner) => match inner.evaluate(lookup)? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Null => Ok(Value::Null),
                other => Err(ReckonError::Other(format!(
                    "cannot negate non-numeric value {other:?}"
                ))),
            },
            Expr::Binary(lhs, op, rhs) => {
                let left = lhs.evaluate(lookup)?;
                let right = rhs.evaluate(lookup)?;
                apply(*op, left, right)
            }
        }
    }

    /// Evaluate as a condition. Null results count as false.
    pub fn evaluate_condition<F>(&self, lookup: &F) -> Result<bool>
    where
        F: Fn(&str) -> Option<Value>,
    {
        Ok(matches!(self.evaluate(lookup)?, Value::Bool(true)))
    }
}

fn apply(op: BinOp, left: Value, right: Value) -> Result<Value> {
    use BinOp::*;
    match op {
        Add | Sub | Mul | Div => arithmetic(op, left, right),
        Eq => Ok(Value::Bool(values_equal(&left, &right))),
        Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        Gt | Lt | Ge | Le => compare(op, left, right),
        And => Ok(Value::Bool(
            left.as_bool().unwrap_or(false) && right.as_bool().unwrap_or(false),
        )),
        Or => Ok(Value::Bool(
            left.as_bool().unwrap_or(false) || right.as_bool().unwrap_or(false),
        )),
    }
}

fn arithmetic(op: BinOp, left: Value, right: Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    // Integer arithmetic stays integral except for division
    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        match op {
            BinOp::Add => return Ok(Value::Int(a + b)),
            BinOp::Sub => return Ok(Value::Int(a - b)),
            BinOp::Mul => return Ok(Value::Int(a * b)),
            _ => {}
        }
    }
    let (a, b) = match (left.as_float(), right.as_float()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ReckonError::Other(
                "arithmetic requires numeric operands".to_string(),
            ))
        }
    };
    let out = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Ok(Value::Null);
            }
            a / b
        }
        _ => unreachable!(),
    };
    Ok(Value::Float(out))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        _ => left == right,
    }
}

fn compare(op: BinOp, left: Value, right: Value) -> Result<Value> {
    use std::cmp::Ordering;
    let ordering = match (&left, &right) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Bool(false)),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Date(a), Value::Date(b)) => a.cmp(b),
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => {
                return Err(ReckonError::Other(
                    "comparison requires operands of a common type".to_string(),
                ))
            }
        },
    };
    let out = match op {
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Ge => ordering != Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        _ => unreachable!(),
    };
    Ok(Value::Bool(out))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(BinOp),
    LParen,
    RParen,
    Minus,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                } else {
                    i += 1;
                }
                tokens.push(Token::Op(BinOp::Eq));
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Ne));
                    i += 2;
                } else {
                    return Err(ReckonError::Config(format!(
                        "unexpected character '!' in expression \"{input}\""
                    )));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Lt));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i == chars.len() {
                    return Err(ReckonError::Config(format!(
                        "unterminated string literal in expression \"{input}\""
                    )));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let num = raw.parse::<f64>().map_err(|_| {
                    ReckonError::Config(format!("invalid number \"{raw}\" in expression"))
                })?;
                tokens.push(Token::Number(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_lowercase().as_str() {
                    "and" => tokens.push(Token::Op(BinOp::And)),
                    "or" => tokens.push(Token::Op(BinOp::Or)),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => {
                return Err(ReckonError::Config(format!(
                    "unexpected character '{other}' in expression \"{input}\""
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn take_op(&mut self, candidates: &[BinOp]) -> Option<BinOp> {
        if let Some(Token::Op(op)) = self.peek() {
            if candidates.contains(op) {
                let op = *op;
                self.pos += 1;
                return Some(op);
            }
        }
        // Bare '-' between operands is subtraction
        if candidates.contains(&BinOp::Sub) && self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Some(BinOp::Sub);
        }
        None
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while let Some(op) = self.take_op(&[BinOp::Or]) {
            let right = self.parse_and()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_cmp()?;
        while let Some(op) = self.take_op(&[BinOp::And]) {
            let right = self.parse_cmp()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_add()?;
        if let Some(op) = self.take_op(&[BinOp::Eq, BinOp::Ne, BinOp::Ge, BinOp::Le, BinOp::Gt, BinOp::Lt]) {
            let right = self.parse_add()?;
            return Ok(Expr::Binary(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;
        while let Some(op) = self.take_op(&[BinOp::Add, BinOp::Sub]) {
            let right = self.parse_mul()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.take_op(&[BinOp::Mul, BinOp::Div]) {
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| ReckonError::Config("unexpected end of expression".to_string()))?;
        self.pos += 1;
        match token {
            Token::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Ok(Expr::Literal(Value::Int(n as i64)))
                } else {
                    Ok(Expr::Literal(Value::Float(n)))
                }
            }
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.to_lowercase().as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Column(name)),
            },
            Token::LParen => {
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(ReckonError::Config(
                        "missing closing parenthesis in expression".to_string(),
                    ));
                }
                self.pos += 1;
                Ok(inner)
            }
            other => Err(ReckonError::Config(format!(
                "unexpected token {other:?} in expression"
            ))),
        }
    }
}
