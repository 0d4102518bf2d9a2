//! Filter expressions over container attributes
//!
//! Grammar:
//!
//! ```text
//! expression := comparison ( "and" comparison )*
//! comparison := attribute operator literal
//! operator   := "==" | "!=" | "<" | "<=" | ">" | ">="
//! literal    := "..." | '...' | integer | float | true | false
//! ```
//!
//! Evaluation reads attributes through `get_attribute`, so declared defaults
//! take part. Comparisons between incompatible kinds are false.

use std::cmp::Ordering;

use super::attribute_container::AttributeContainer;
use super::value::Value;
use crate::errors::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Operator {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Equal => ordering == Ordering::Equal,
            Operator::NotEqual => ordering != Ordering::Equal,
            Operator::Less => ordering == Ordering::Less,
            Operator::LessOrEqual => ordering != Ordering::Greater,
            Operator::Greater => ordering == Ordering::Greater,
            Operator::GreaterOrEqual => ordering != Ordering::Less,
        }
    }

    fn is_equality(&self) -> bool {
        matches!(self, Operator::Equal | Operator::NotEqual)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub attribute: String,
    pub operator: Operator,
    pub literal: Literal,
}

impl Comparison {
    fn matches(&self, container: &AttributeContainer) -> bool {
        let value = match container.get_attribute(&self.attribute) {
            Ok(value) => value,
            Err(_) => return false,
        };

        let ordering = match (value, &self.literal) {
            (Value::Integer(a), Literal::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Literal::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Literal::Float(b)) => a.partial_cmp(b),
            (Value::Float(a), Literal::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Timestamp(a), Literal::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Literal::String(b)) => Some(a.as_str().cmp(b.as_str())),
            (Value::Reference(a), Literal::String(b)) if self.operator.is_equality() => {
                Some(if a.to_string() == *b {
                    Ordering::Equal
                } else {
                    Ordering::Less
                })
            }
            (Value::Boolean(a), Literal::Boolean(b)) if self.operator.is_equality() => {
                Some(a.cmp(b))
            }
            _ => None,
        };

        ordering.map_or(false, |o| self.operator.accepts(o))
    }
}

/// A parsed conjunction of attribute comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpression {
    comparisons: Vec<Comparison>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Operator(Operator),
    Literal(Literal),
}

impl FilterExpression {
    /// Parses an expression.
    pub fn parse(expression: &str) -> StoreResult<Self> {
        let tokens = tokenize(expression)?;
        let mut comparisons = Vec::new();
        let mut iter = tokens.into_iter().peekable();

        loop {
            let attribute = match iter.next() {
                Some(Token::Identifier(name)) => name,
                _ => return Err(StoreError::invalid_expression(expression, "expected attribute name")),
            };
            let operator = match iter.next() {
                Some(Token::Operator(op)) => op,
                _ => return Err(StoreError::invalid_expression(expression, "expected comparison operator")),
            };
            let literal = match iter.next() {
                Some(Token::Literal(lit)) => lit,
                Some(Token::Identifier(word)) if word == "true" => Literal::Boolean(true),
                Some(Token::Identifier(word)) if word == "false" => Literal::Boolean(false),
                _ => return Err(StoreError::invalid_expression(expression, "expected literal")),
            };
            comparisons.push(Comparison {
                attribute,
                operator,
                literal,
            });

            match iter.next() {
                None => break,
                Some(Token::Identifier(word)) if word == "and" => continue,
                Some(_) => return Err(StoreError::invalid_expression(expression, "expected 'and'")),
            }
        }

        Ok(Self { comparisons })
    }

    pub fn comparisons(&self) -> &[Comparison] {
        &self.comparisons
    }

    /// True when every comparison holds
    pub fn matches(&self, container: &AttributeContainer) -> bool {
        self.comparisons.iter().all(|c| c.matches(container))
    }
}

fn tokenize(expression: &str) -> StoreResult<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
        } else if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Token::Identifier(chars[start..pos].iter().collect()));
        } else if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            pos += 1;
            loop {
                match chars.get(pos) {
                    None => {
                        return Err(StoreError::invalid_expression(expression, "unterminated string"))
                    }
                    Some('\\') => {
                        let escaped = chars.get(pos + 1).ok_or_else(|| {
                            StoreError::invalid_expression(expression, "dangling escape")
                        })?;
                        text.push(*escaped);
                        pos += 2;
                    }
                    Some(ch) if *ch == quote => {
                        pos += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(*ch);
                        pos += 1;
                    }
                }
            }
            tokens.push(Token::Literal(Literal::String(text)));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(pos + 1).map_or(false, |d| d.is_ascii_digit())) {
            let start = pos;
            pos += 1;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            let literal = if text.contains('.') {
                text.parse::<f64>().map(Literal::Float).map_err(|_| {
                    StoreError::invalid_expression(expression, format!("invalid number '{}'", text))
                })?
            } else {
                text.parse::<i64>().map(Literal::Integer).map_err(|_| {
                    StoreError::invalid_expression(expression, format!("invalid number '{}'", text))
                })?
            };
            tokens.push(Token::Literal(literal));
        } else {
            let next = chars.get(pos + 1).copied();
            let (operator, width) = match (c, next) {
                ('=', Some('=')) => (Operator::Equal, 2),
                ('!', Some('=')) => (Operator::NotEqual, 2),
                ('<', Some('=')) => (Operator::LessOrEqual, 2),
                ('>', Some('=')) => (Operator::GreaterOrEqual, 2),
                ('<', _) => (Operator::Less, 1),
                ('>', _) => (Operator::Greater, 1),
                _ => {
                    return Err(StoreError::invalid_expression(
                        expression,
                        format!("unexpected character '{}'", c),
                    ))
                }
            };
            tokens.push(Token::Operator(operator));
            pos += width;
        }
    }

    Ok(tokens)
}
