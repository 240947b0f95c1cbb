//! Parser module for assembly source

pub mod expression;
pub mod lexer;
pub mod number;

pub use expression::ExpressionParser;
pub use lexer::{LineIndex, Lexer, Token};
