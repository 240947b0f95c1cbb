//! Expression parsing for instruction operands and directive values
//!
//! Operands are tokenized with [`consume_expression_token`], converted to
//! reverse polish notation by a shunting-yard pass and then folded into an
//! [`Expr`] tree.

use std::fmt;

use super::number::NumberParser;
use crate::addressing::Register;
use crate::error::{ErrorInfo, ErrorKind};
use crate::parser::lexer::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Xor,
}

impl BinOp {
    /// Precedence rank; a lower rank binds tighter.
    pub fn rank(self) -> u8 {
        match self {
            BinOp::Pow => 2,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 3,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::And => 8,
            BinOp::Xor => 9,
            BinOp::Or => 10,
        }
    }

    pub fn right_assoc(self) -> bool {
        self == BinOp::Pow
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64),
    Register(Register),
    Symbol(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn is_bare_symbol(&self) -> bool {
        matches!(self, Expr::Symbol(_))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Register(r) => write!(f, "{}", r),
            Expr::Symbol(s) => write!(f, "{}", s),
            Expr::Neg(e) => write!(f, "-{}", e),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
        }
    }
}

/// Parse or evaluation failure, positioned later against the operand token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExprError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expression, message)
    }

    pub fn at(self, token: &Token<'_>) -> ErrorInfo {
        ErrorInfo::at_token(self.kind, self.message, token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprToken<'a> {
    Number(i64),
    Ident(&'a str),
    Op(BinOp),
    LParen,
    RParen,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'.'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

/// Pull one token off the front of `input`, returning it with the remainder.
/// `Ok(None)` means the input held only whitespace.
pub fn consume_expression_token(input: &str) -> Result<Option<(ExprToken<'_>, &str)>, ExprError> {
    let input = input.trim_start();
    let bytes = input.as_bytes();
    let Some(&first) = bytes.first() else {
        return Ok(None);
    };

    if first.is_ascii_digit() {
        let len = bytes.iter().take_while(|&&b| b.is_ascii_alphanumeric() || b == b'_').count();
        let value = NumberParser::parse(&input[..len])?;
        return Ok(Some((ExprToken::Number(value), &input[len..])));
    }

    if is_ident_start(first) {
        let len = bytes.iter().take_while(|&&b| is_ident_continue(b)).count();
        return Ok(Some((ExprToken::Ident(&input[..len]), &input[len..])));
    }

    let (token, len) = match first {
        b'*' if bytes.get(1) == Some(&b'*') => (ExprToken::Op(BinOp::Pow), 2),
        b'*' => (ExprToken::Op(BinOp::Mul), 1),
        b'+' => (ExprToken::Op(BinOp::Add), 1),
        b'-' => (ExprToken::Op(BinOp::Sub), 1),
        b'/' => (ExprToken::Op(BinOp::Div), 1),
        b'%' => (ExprToken::Op(BinOp::Mod), 1),
        b'&' => (ExprToken::Op(BinOp::And), 1),
        b'|' => (ExprToken::Op(BinOp::Or), 1),
        b'^' => (ExprToken::Op(BinOp::Xor), 1),
        b'(' => (ExprToken::LParen, 1),
        b')' => (ExprToken::RParen, 1),
        _ => {
            let c = input.chars().next().unwrap_or('?');
            return Err(ExprError::new(
                ErrorKind::OperandDecode,
                format!("Unexpected character '{}' in operand", c),
            ));
        }
    };
    Ok(Some((token, &input[len..])))
}

/// One element of the reverse polish output.
#[derive(Debug, Clone, PartialEq)]
pub enum Rpn {
    Number(i64),
    Register(Register),
    Symbol(String),
    Neg,
    Binary(BinOp),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Binary(BinOp),
    Neg,
    LParen,
}

const MISMATCHED: &str = "Mismatched parentheses";

pub struct ExpressionParser;

impl ExpressionParser {
    pub fn parse(s: &str) -> Result<Expr, ExprError> {
        let rpn = Self::to_rpn(s)?;
        Self::build(rpn)
    }

    /// Shunting-yard conversion of an infix expression.
    pub fn to_rpn(s: &str) -> Result<Vec<Rpn>, ExprError> {
        let mut output = Vec::new();
        let mut ops: Vec<Pending> = Vec::new();
        let mut expect_operand = true;
        let mut rest = s;

        while let Some((token, remainder)) = consume_expression_token(rest)? {
            rest = remainder;
            match token {
                ExprToken::Number(n) if expect_operand => {
                    output.push(Rpn::Number(n));
                    expect_operand = false;
                }
                ExprToken::Ident(name) if expect_operand => {
                    output.push(match Register::from_name(name) {
                        Some(reg) => Rpn::Register(reg),
                        None => Rpn::Symbol(name.to_string()),
                    });
                    expect_operand = false;
                }
                ExprToken::LParen if expect_operand => ops.push(Pending::LParen),
                ExprToken::Op(BinOp::Sub) if expect_operand => ops.push(Pending::Neg),
                ExprToken::Op(BinOp::Add) if expect_operand => {}
                ExprToken::RParen if !expect_operand => loop {
                    match ops.pop() {
                        Some(Pending::LParen) => break,
                        Some(Pending::Binary(op)) => output.push(Rpn::Binary(op)),
                        Some(Pending::Neg) => output.push(Rpn::Neg),
                        None => return Err(ExprError::expression(MISMATCHED)),
                    }
                },
                ExprToken::Op(op) if !expect_operand => {
                    while let Some(&top) = ops.last() {
                        let pops = match top {
                            Pending::Neg => true,
                            Pending::Binary(prev) => {
                                prev.rank() < op.rank() || (prev.rank() == op.rank() && !op.right_assoc())
                            }
                            Pending::LParen => false,
                        };
                        if !pops {
                            break;
                        }
                        ops.pop();
                        output.push(match top {
                            Pending::Binary(prev) => Rpn::Binary(prev),
                            _ => Rpn::Neg,
                        });
                    }
                    ops.push(Pending::Binary(op));
                    expect_operand = true;
                }
                other => {
                    return Err(ExprError::expression(format!("Unexpected {:?} in expression", other)));
                }
            }
        }

        if expect_operand {
            return Err(ExprError::expression(if output.is_empty() && ops.is_empty() {
                "Empty expression"
            } else {
                "Expression ends with an operator"
            }));
        }

        while let Some(op) = ops.pop() {
            match op {
                Pending::LParen => return Err(ExprError::expression(MISMATCHED)),
                Pending::Binary(op) => output.push(Rpn::Binary(op)),
                Pending::Neg => output.push(Rpn::Neg),
            }
        }
        Ok(output)
    }

    /// Fold reverse polish output into a tree.
    pub fn build(rpn: Vec<Rpn>) -> Result<Expr, ExprError> {
        let mut stack: Vec<Expr> = Vec::new();
        let missing = || ExprError::expression("Operator is missing an operand");
        for item in rpn {
            let node = match item {
                Rpn::Number(n) => Expr::Number(n),
                Rpn::Register(r) => Expr::Register(r),
                Rpn::Symbol(s) => Expr::Symbol(s),
                Rpn::Neg => Expr::Neg(Box::new(stack.pop().ok_or_else(missing)?)),
                Rpn::Binary(op) => {
                    let right = stack.pop().ok_or_else(missing)?;
                    let left = stack.pop().ok_or_else(missing)?;
                    Expr::Binary(op, Box::new(left), Box::new(right))
                }
            };
            stack.push(node);
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(expr), true) => Ok(expr),
            _ => Err(ExprError::expression("Malformed expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: i64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    #[test]
    fn test_simple_number() {
        assert_eq!(ExpressionParser::parse("0xFF").unwrap(), Expr::Number(255));
        assert_eq!(ExpressionParser::parse("255").unwrap(), Expr::Number(255));
        assert_eq!(ExpressionParser::parse("0b11111111").unwrap(), Expr::Number(255));
    }

    #[test]
    fn test_simple_label() {
        assert_eq!(ExpressionParser::parse("my_label").unwrap(), Expr::Symbol("my_label".to_string()));
        assert_eq!(ExpressionParser::parse("X").unwrap(), Expr::Register(Register::X));
        assert_eq!(ExpressionParser::parse("sp").unwrap(), Expr::Register(Register::SP));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            ExpressionParser::parse("1 + 2 * 3").unwrap(),
            Expr::Binary(BinOp::Add, num(1), Box::new(Expr::Binary(BinOp::Mul, num(2), num(3))))
        );
        assert_eq!(
            ExpressionParser::parse("1 | 2 & 3").unwrap(),
            Expr::Binary(BinOp::Or, num(1), Box::new(Expr::Binary(BinOp::And, num(2), num(3))))
        );
    }

    #[test]
    fn test_left_assoc_subtraction() {
        assert_eq!(
            ExpressionParser::to_rpn("10 - 4 - 3").unwrap(),
            vec![Rpn::Number(10), Rpn::Number(4), Rpn::Binary(BinOp::Sub), Rpn::Number(3), Rpn::Binary(BinOp::Sub)]
        );
    }

    #[test]
    fn test_power_right_assoc() {
        assert_eq!(
            ExpressionParser::to_rpn("2 ** 3 ** 2").unwrap(),
            vec![Rpn::Number(2), Rpn::Number(3), Rpn::Number(2), Rpn::Binary(BinOp::Pow), Rpn::Binary(BinOp::Pow)]
        );
    }

    #[test]
    fn test_parentheses() {
        assert_eq!(
            ExpressionParser::parse("(1 + 2) * 3").unwrap(),
            Expr::Binary(BinOp::Mul, Box::new(Expr::Binary(BinOp::Add, num(1), num(2))), num(3))
        );
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(ExpressionParser::parse("-1").unwrap(), Expr::Neg(num(1)));
        assert_eq!(
            ExpressionParser::parse("2 * -3").unwrap(),
            Expr::Binary(BinOp::Mul, num(2), Box::new(Expr::Neg(num(3))))
        );
    }

    #[test]
    fn test_register_offset_form() {
        assert_eq!(
            ExpressionParser::parse("a+label").unwrap(),
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Register(Register::A)),
                Box::new(Expr::Symbol("label".to_string()))
            )
        );
    }

    #[test]
    fn test_mismatched_parentheses() {
        let err = ExpressionParser::parse("(1 + 2").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Expression);
        assert_eq!(err.message, MISMATCHED);
        assert_eq!(ExpressionParser::parse("1 + 2)").unwrap_err().message, MISMATCHED);
    }

    #[test]
    fn test_malformed() {
        assert!(ExpressionParser::parse("").is_err());
        assert!(ExpressionParser::parse("1 +").is_err());
        assert!(ExpressionParser::parse("1 2").is_err());
        assert!(ExpressionParser::parse("* 2").is_err());
        assert_eq!(ExpressionParser::parse("1 @ 2").unwrap_err().kind, ErrorKind::OperandDecode);
    }
}
