//! Cursor-based tokenizer over the assembly source

use crate::error::{ErrorInfo, ErrorKind};

/// A borrowed slice of the source together with its byte offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub offset: usize,
}

impl<'a> Token<'a> {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_string(&self) -> bool {
        self.text.len() >= 2 && (self.text.starts_with('"') || self.text.starts_with('\''))
    }

    /// Offset one past the last byte of the token.
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}

/// Cursor over `src[pos..end]`. Offsets are always relative to the whole
/// source, so a lexer over a `.repeat` body reports the same positions as the
/// top level one.
#[derive(Clone, Copy, Debug)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    end: usize,
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b',' || b == b';'
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, end: src.len() }
    }

    /// A lexer restricted to `src[start..end]`.
    pub fn span(src: &'a str, start: usize, end: usize) -> Self {
        Self { src, pos: start, end: end.min(src.len()) }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn bytes(&self) -> &'a [u8] {
        &self.src.as_bytes()[..self.end]
    }

    fn skip_blank(&mut self, cross_newlines: bool) {
        let bytes = self.bytes();
        while self.pos < self.end {
            match bytes[self.pos] {
                b';' => {
                    while self.pos < self.end && bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b'\n' if !cross_newlines => break,
                b if b.is_ascii_whitespace() => self.pos += 1,
                _ => break,
            }
        }
    }

    fn token(&self, start: usize, end: usize) -> Token<'a> {
        Token { text: &self.src[start..end], offset: start }
    }

    /// Pull the next token. Returns an empty token at end of input.
    pub fn next_token(&mut self) -> Result<Token<'a>, ErrorInfo> {
        self.skip_blank(true);
        let start = self.pos;
        if start >= self.end {
            return Ok(self.token(self.end, self.end));
        }

        let bytes = self.bytes();
        match bytes[start] {
            b',' => {
                self.pos += 1;
                Ok(self.token(start, start + 1))
            }
            q @ (b'"' | b'\'') => self.read_string(q),
            _ => {
                while self.pos < self.end && !is_delimiter(bytes[self.pos]) {
                    self.pos += 1;
                }
                Ok(self.token(start, self.pos))
            }
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek_token(&self) -> Result<Token<'a>, ErrorInfo> {
        let mut copy = *self;
        copy.next_token()
    }

    /// Read one operand: everything up to a top-level `,`, a comment or the end
    /// of the line. Brackets and parentheses may contain commas and spaces.
    /// Returns an empty token when the line holds no operand.
    pub fn next_operand(&mut self) -> Result<Token<'a>, ErrorInfo> {
        self.skip_blank(false);
        let start = self.pos;
        let bytes = self.bytes();
        if start >= self.end {
            return Ok(self.token(start, start));
        }
        if let q @ (b'"' | b'\'') = bytes[start] {
            return self.read_string(q);
        }

        let mut depth = 0i32;
        while self.pos < self.end {
            match bytes[self.pos] {
                b'[' | b'(' => depth += 1,
                b']' | b')' => depth -= 1,
                b',' if depth <= 0 => break,
                b';' | b'\n' => break,
                _ => {}
            }
            self.pos += 1;
        }

        let text = self.src[start..self.pos].trim_end();
        Ok(Token { text, offset: start })
    }

    fn read_string(&mut self, quote: u8) -> Result<Token<'a>, ErrorInfo> {
        let bytes = self.bytes();
        let start = self.pos;
        let mut i = start + 1;
        loop {
            if i >= self.end {
                self.pos = self.end;
                return Err(ErrorInfo::new(
                    ErrorKind::Lex,
                    "Unterminated string literal",
                    &self.src[start..self.end],
                    start,
                ));
            }
            match bytes[i] {
                b'\\' => {
                    if i + 1 >= self.end {
                        self.pos = self.end;
                        return Err(ErrorInfo::new(
                            ErrorKind::Lex,
                            "Unterminated escape at end of string",
                            &self.src[start..self.end],
                            start,
                        ));
                    }
                    i += 2;
                }
                b'\n' => {
                    self.pos = i;
                    return Err(ErrorInfo::new(
                        ErrorKind::Lex,
                        "Unterminated string literal",
                        &self.src[start..i],
                        start,
                    ));
                }
                b if b == quote => {
                    i += 1;
                    break;
                }
                _ => i += 1,
            }
        }
        self.pos = i;
        Ok(self.token(start, i))
    }
}

/// Decode a quoted string token (delimiters included) into its bytes.
pub fn unescape(token: &Token<'_>) -> Result<Vec<u8>, ErrorInfo> {
    let inner = &token.text.as_bytes()[1..token.text.len() - 1];
    let mut out = Vec::with_capacity(inner.len());
    let mut iter = inner.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let escaped = match iter.next() {
            Some(b'n') => b'\n',
            Some(b't') => b'\t',
            Some(b'r') => b'\r',
            Some(b'b') => 0x08,
            Some(b'f') => 0x0c,
            Some(b'v') => 0x0b,
            Some(b'0') => 0x00,
            Some(b'a') => 0x07,
            Some(b'e') => 0x1b,
            Some(b'\\') => b'\\',
            Some(b'\'') => b'\'',
            Some(b'"') => b'"',
            Some(b'?') => b'?',
            Some(other) => {
                return Err(ErrorInfo::at_token(
                    ErrorKind::Lex,
                    format!("Unknown escape sequence '\\{}'", *other as char),
                    token,
                ));
            }
            None => {
                return Err(ErrorInfo::at_token(
                    ErrorKind::Lex,
                    "Unterminated escape at end of string",
                    token,
                ));
            }
        };
        out.push(escaped);
    }
    Ok(out)
}

/// Byte offset to zero based line number.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(src: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(src.bytes().enumerate().filter(|(_, b)| *b == b'\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset).saturating_sub(1)
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}
