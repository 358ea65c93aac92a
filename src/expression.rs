//! Kernel-composition expression language.
//!
//! A model file declares how its named kernels combine through a small infix
//! expression such as `k1*k2+k3`. This module tokenizes and parses that
//! string with standard precedence and evaluates the resulting tree against a
//! per-model symbol table of already-constructed [`Kernel`] instances:
//!
//! - a number literal yields a constant kernel of that value,
//! - an identifier is looked up in the symbol table
//!   ([`KrigingError::UnknownKernelName`] if absent),
//! - `+` yields a [`Kernel::Sum`], `*` a [`Kernel::Product`],
//! - `-` and `/` fail fast with
//!   [`KrigingError::UnsupportedKernelOperation`]: covariance functions have
//!   no subtraction or division.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+'|'-') term)*
//! term   := factor (('*'|'/') factor)*
//! factor := ('+'|'-') factor | Number | Identifier | '(' expr ')'
//! ```
//!
//! The parser runs once per model at load time; there is no runtime
//! performance requirement.

use crate::error::{KrigingError, Result};
use crate::kernel::Kernel;
use std::collections::HashMap;

/// A lexical token of the composition language.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    End,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let invalid = |reason: String| KrigingError::InvalidKernelExpression {
        expression: expr.to_string(),
        reason,
    };

    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
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
            '0'..='9' | '.' => {
                // Decimal or exponent notation, e.g. 1.2e-3.
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
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("bad number literal '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(invalid(format!("unexpected character '{other}'"))),
        }
    }
    tokens.push(Token::End);
    Ok(tokens)
}

/// Abstract syntax tree of a composition expression.
#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Number(f64),
    Ident(String),
    Unary(char, Box<Ast>),
    BinOp(char, Box<Ast>, Box<Ast>),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    expr: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn error(&self, reason: String) -> KrigingError {
        KrigingError::InvalidKernelExpression {
            expression: self.expr.to_string(),
            reason,
        }
    }

    fn parse_expr(&mut self) -> Result<Ast> {
        let mut node = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            node = Ast::BinOp(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Ast> {
        let mut node = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            node = Ast::BinOp(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_factor(&mut self) -> Result<Ast> {
        match self.advance() {
            Token::Plus => Ok(Ast::Unary('+', Box::new(self.parse_factor()?))),
            Token::Minus => Ok(Ast::Unary('-', Box::new(self.parse_factor()?))),
            Token::Number(v) => Ok(Ast::Number(v)),
            Token::Ident(name) => Ok(Ast::Ident(name)),
            Token::LParen => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Token::RParen => Ok(inner),
                    other => Err(self.error(format!("expected ')', found {other:?}"))),
                }
            }
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }
}

fn parse(expr: &str) -> Result<Ast> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        expr,
    };
    let ast = parser.parse_expr()?;
    match parser.peek() {
        Token::End => Ok(ast),
        other => Err(parser.error(format!("trailing input at token {other:?}"))),
    }
}

fn eval(
    ast: &Ast,
    symbols: &HashMap<String, Kernel>,
    expr: &str,
    model: &str,
) -> Result<Kernel> {
    match ast {
        Ast::Number(v) => Ok(Kernel::Constant { value: *v }),
        Ast::Ident(name) => symbols
            .get(name)
            .cloned()
            .ok_or_else(|| KrigingError::UnknownKernelName {
                name: name.clone(),
                model: model.to_string(),
            }),
        Ast::Unary(op, inner) => match op {
            '+' => eval(inner, symbols, expr, model),
            _ => Err(KrigingError::UnsupportedKernelOperation {
                operation: *op,
                expression: expr.to_string(),
            }),
        },
        Ast::BinOp(op, lhs, rhs) => {
            let (l, r) = (
                eval(lhs, symbols, expr, model)?,
                eval(rhs, symbols, expr, model)?,
            );
            match op {
                '+' => Ok(Kernel::Sum(Box::new(l), Box::new(r))),
                '*' => Ok(Kernel::Product(Box::new(l), Box::new(r))),
                _ => Err(KrigingError::UnsupportedKernelOperation {
                    operation: *op,
                    expression: expr.to_string(),
                }),
            }
        }
    }
}

/// Parse a composition string and evaluate it against a symbol table of named
/// kernels, producing one composed [`Kernel`].
///
/// `model` identifies the model file whose composition is being evaluated and
/// appears in error messages.
pub fn compose(expr: &str, symbols: &HashMap<String, Kernel>, model: &str) -> Result<Kernel> {
    let ast = parse(expr)?;
    eval(&ast, symbols, expr, model)
}
