//! Derived fields from a restricted arithmetic expression language.
//!
//! A test may combine its parameters into one field before sampling, for
//! example `np.sqrt(u**2 + v**2)`. Expressions are parsed once per test
//! and evaluated element-wise over the read fields.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | power
//! power   := primary (('**' | '^') unary)?
//! primary := number | name | name '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use crate::error::{GridCheckError, Result};
use crate::models::{GridField, Preprocess};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    LParen,
    RParen,
    Comma,
}

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Power);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Power);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let name = name.strip_prefix("np.").unwrap_or(&name).to_string();
                tokens.push(Token::Name(name));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Sqrt,
    Abs,
    Exp,
    Log,
    Log10,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Hypot,
    Pow,
    Where,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        let function = match name {
            "sqrt" => Self::Sqrt,
            "abs" | "absolute" => Self::Abs,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "log10" => Self::Log10,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "min" | "minimum" => Self::Min,
            "max" | "maximum" => Self::Max,
            "hypot" => Self::Hypot,
            "pow" | "power" => Self::Pow,
            "where" => Self::Where,
            _ => return None,
        };
        Some(function)
    }

    fn arity(self) -> usize {
        match self {
            Self::Min | Self::Max | Self::Hypot | Self::Pow => 2,
            Self::Where => 3,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Self::Sqrt => args[0].sqrt(),
            Self::Abs => args[0].abs(),
            Self::Exp => args[0].exp(),
            Self::Log => args[0].ln(),
            Self::Log10 => args[0].log10(),
            Self::Floor => args[0].floor(),
            Self::Ceil => args[0].ceil(),
            Self::Round => args[0].round_ties_even(),
            Self::Min => args[0].min(args[1]),
            Self::Max => args[0].max(args[1]),
            Self::Hypot => args[0].hypot(args[1]),
            Self::Pow => args[0].powf(args[1]),
            Self::Where => {
                if args[0] != 0.0 {
                    args[1]
                } else {
                    args[2]
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            // Result takes the sign of the divisor
            Self::Rem => a - b * (a / b).floor(),
            Self::Pow => a.powf(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Field(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult = std::result::Result<Expr, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> std::result::Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?}, found {token:?}")),
            None => Err(format!("expected {expected:?}, found end of expression")),
        }
    }

    fn expr(&mut self) -> ParseResult {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> ParseResult {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> ParseResult {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> ParseResult {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Power) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> ParseResult {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let function =
                    Function::lookup(&name).ok_or_else(|| format!("unknown function '{name}'"))?;
                let mut args = vec![self.expr()?];
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    args.push(self.expr()?);
                }
                self.expect(Token::RParen)?;
                if args.len() != function.arity() {
                    return Err(format!(
                        "'{name}' takes {} argument(s), got {}",
                        function.arity(),
                        args.len()
                    ));
                }
                Ok(Expr::Call(function, args))
            }
            Some(Token::Name(name)) => Ok(Expr::Field(name)),
            Some(token) => Err(format!("unexpected {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

impl Expr {
    fn fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Number(_) => {}
            Self::Field(name) => out.push(name),
            Self::Neg(inner) => inner.fields(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.fields(out);
                rhs.fields(out);
            }
            Self::Call(_, args) => args.iter().for_each(|a| a.fields(out)),
        }
    }

    fn eval(&self, bindings: &HashMap<&str, &[Option<f64>]>, i: usize) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Field(name) => bindings.get(name.as_str()).and_then(|values| values[i]),
            Self::Neg(inner) => inner.eval(bindings, i).map(|v| -v),
            Self::Binary(op, lhs, rhs) => {
                let a = lhs.eval(bindings, i)?;
                let b = rhs.eval(bindings, i)?;
                Some(op.apply(a, b))
            }
            Self::Call(function, args) => {
                let mut values = [0.0; 3];
                for (slot, arg) in values.iter_mut().zip(args) {
                    *slot = arg.eval(bindings, i)?;
                }
                Some(function.apply(&values[..args.len()]))
            }
        }
    }
}

/// A parsed preprocessing expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    root: Expr,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text).map_err(|reason| GridCheckError::expression(text, reason))?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser
            .expr()
            .map_err(|reason| GridCheckError::expression(text, reason))?;
        if let Some(token) = parser.peek() {
            return Err(GridCheckError::expression(
                text,
                format!("unexpected trailing {token:?}"),
            ));
        }
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    /// Evaluate element-wise over the named fields
    ///
    /// Masked operands and non-finite results produce masked elements.
    pub fn evaluate(&self, fields: &[GridField]) -> Result<Vec<Option<f64>>> {
        let bindings: HashMap<&str, &[Option<f64>]> = fields
            .iter()
            .map(|f| (f.parameter.as_str(), f.values.as_slice()))
            .collect();

        let mut referenced = Vec::new();
        self.root.fields(&mut referenced);

        let mut len = None;
        for name in referenced {
            let values = bindings.get(name).ok_or_else(|| {
                GridCheckError::expression(&self.text, format!("name '{name}' is not defined"))
            })?;
            match len {
                None => len = Some(values.len()),
                Some(n) if n != values.len() => {
                    return Err(GridCheckError::expression(
                        &self.text,
                        format!("operands have different lengths ({n} and {})", values.len()),
                    ));
                }
                Some(_) => {}
            }
        }
        let len = len.or_else(|| fields.first().map(GridField::len)).unwrap_or(0);

        Ok((0..len)
            .map(|i| self.root.eval(&bindings, i).filter(|v| v.is_finite()))
            .collect())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Per-test field derivation
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    step: Option<(Expression, String)>,
}

impl Preprocessor {
    /// Parse the test's expression once; `None` passes fields through
    pub fn new(preprocess: Option<&Preprocess>) -> Result<Self> {
        let step = match preprocess {
            Some(p) => {
                let expression = Expression::parse(&p.function)?;
                let name = p.rename.clone().unwrap_or_else(|| p.function.clone());
                Some((expression, name))
            }
            None => None,
        };
        Ok(Self { step })
    }

    /// Derive a single field from the read fields
    pub fn apply(&self, fields: Vec<GridField>) -> Result<Vec<GridField>> {
        let Some((expression, name)) = &self.step else {
            return Ok(fields);
        };
        let Some(first) = fields.first() else {
            return Ok(fields);
        };

        let values = expression.evaluate(&fields)?;
        Ok(vec![GridField {
            parameter: name.clone(),
            values,
            analysis_time: first.analysis_time,
            forecast_time: first.forecast_time,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn field(name: &str, values: Vec<Option<f64>>) -> GridField {
        let time = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        GridField {
            parameter: name.to_string(),
            values,
            analysis_time: time,
            forecast_time: time,
        }
    }

    fn eval(text: &str, fields: &[GridField]) -> Vec<Option<f64>> {
        Expression::parse(text).unwrap().evaluate(fields).unwrap()
    }

    #[test]
    fn test_precedence_and_power() {
        let x = [field("x", vec![Some(2.0)])];
        assert_eq!(eval("1 + x * 3", &x), vec![Some(7.0)]);
        assert_eq!(eval("(1 + x) * 3", &x), vec![Some(9.0)]);
        assert_eq!(eval("-x ** 2", &x), vec![Some(-4.0)]);
        assert_eq!(eval("2 ^ 3 ^ 2", &x), vec![Some(512.0)]);
        assert_eq!(eval("-7 % 3", &x), vec![Some(2.0)]);
    }

    #[test]
    fn test_wind_speed_with_np_prefix() {
        let fields = [
            field("u", vec![Some(3.0), None]),
            field("v", vec![Some(4.0), Some(1.0)]),
        ];
        assert_eq!(eval("np.sqrt(u**2 + v**2)", &fields), vec![Some(5.0), None]);
        assert_eq!(eval("hypot(u, v)", &fields), vec![Some(5.0), None]);
    }

    #[test]
    fn test_functions() {
        let x = [field("x", vec![Some(-2.5), Some(0.0)])];
        assert_eq!(eval("abs(x)", &x), vec![Some(2.5), Some(0.0)]);
        assert_eq!(eval("round(x)", &x), vec![Some(-2.0), Some(0.0)]);
        assert_eq!(eval("where(x, 1, 2)", &x), vec![Some(1.0), Some(2.0)]);
        assert_eq!(eval("max(x, 0)", &x), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_non_finite_results_are_masked() {
        let x = [field("x", vec![Some(0.0), Some(-1.0)])];
        assert_eq!(eval("1 / x", &x), vec![None, Some(-1.0)]);
        assert_eq!(eval("log(x)", &x), vec![None, None]);
    }

    #[test]
    fn test_invalid_expressions_name_the_expression() {
        for text in ["u +", "foo(u)", "sqrt(u, v)", "u $ v", "(u"] {
            let err = Expression::parse(text).unwrap_err();
            assert!(err.to_string().contains(text), "{err}");
        }
    }

    #[test]
    fn test_unbound_name_and_length_mismatch() {
        let fields = [field("u", vec![Some(1.0)]), field("v", vec![Some(1.0), Some(2.0)])];
        let expression = Expression::parse("u + w").unwrap();
        assert!(expression.evaluate(&fields).is_err());

        let expression = Expression::parse("u + v").unwrap();
        assert!(expression.evaluate(&fields).is_err());
    }

    #[test]
    fn test_preprocessor_rename_and_default_name() {
        let fields = vec![field("u", vec![Some(1.0)]), field("v", vec![Some(2.0)])];

        let renamed = Preprocessor::new(Some(&Preprocess {
            function: "u + v".to_string(),
            rename: Some("sum".to_string()),
        }))
        .unwrap()
        .apply(fields.clone())
        .unwrap();
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].parameter, "sum");
        assert_eq!(renamed[0].values, vec![Some(3.0)]);

        let unnamed = Preprocessor::new(Some(&Preprocess {
            function: "u + v".to_string(),
            rename: None,
        }))
        .unwrap()
        .apply(fields)
        .unwrap();
        assert_eq!(unnamed[0].parameter, "u + v");
    }

    #[test]
    fn test_passthrough_and_empty_input() {
        let fields = vec![field("u", vec![Some(1.0)])];
        let passthrough = Preprocessor::new(None).unwrap();
        assert_eq!(passthrough.apply(fields.clone()).unwrap(), fields);

        let derive = Preprocessor::new(Some(&Preprocess {
            function: "u * 2".to_string(),
            rename: None,
        }))
        .unwrap();
        assert!(derive.apply(vec![]).unwrap().is_empty());
    }
}
