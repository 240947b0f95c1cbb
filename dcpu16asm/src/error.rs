//! Error types for the assembler

use thiserror::Error;

use crate::parser::lexer::Token;

/// The category of a failed assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("lex error")]
    Lex,
    #[error("directive error")]
    Directive,
    #[error("operand decode error")]
    OperandDecode,
    #[error("encode range error")]
    EncodeRange,
    #[error("syntax error")]
    Syntax,
    #[error("expression error")]
    Expression,
    #[error("unresolved symbol")]
    UnresolvedSymbol,
    #[error("duplicate symbol")]
    DuplicateSymbol,
    #[error("capacity error")]
    Capacity,
    #[error("link error")]
    Link,
}

/// A single, positioned assembly failure. `character` is a byte offset into the
/// source and `line` is zero based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message} `{token}` (line {}, character {character})", .line + 1)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub token: String,
    pub character: usize,
    pub line: usize,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>, token: impl Into<String>, character: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            token: token.into(),
            character,
            line: 0,
        }
    }

    pub fn at_token(kind: ErrorKind, message: impl Into<String>, token: &Token<'_>) -> Self {
        Self::new(kind, message, token.text, token.offset)
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

#[derive(Debug, Error)]
pub enum AsmError {
    #[error("Assembly error: {0}")]
    Asm(#[from] ErrorInfo),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AsmError {
    /// The structured error, when the failure came from assembly rather than I/O.
    pub fn info(&self) -> Option<&ErrorInfo> {
        match self {
            AsmError::Asm(info) => Some(info),
            AsmError::Io(_) => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.info().map(|info| info.kind)
    }
}
