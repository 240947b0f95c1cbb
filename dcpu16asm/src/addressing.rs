//! Operand decoding into the 5/6 bit value field

use std::fmt;

use crate::error::{ErrorInfo, ErrorKind};
use crate::eval::{ExpressionEvaluator, Resolved};
use crate::parser::expression::ExprError;
use crate::parser::{ExpressionParser, Token};
use crate::symbol::SymbolLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    B,
    C,
    X,
    Y,
    Z,
    I,
    J,
    SP,
}

impl Register {
    pub fn from_name(name: &str) -> Option<Self> {
        let reg = match name.to_ascii_lowercase().as_str() {
            "a" => Register::A,
            "b" => Register::B,
            "c" => Register::C,
            "x" => Register::X,
            "y" => Register::Y,
            "z" => Register::Z,
            "i" => Register::I,
            "j" => Register::J,
            "sp" => Register::SP,
            _ => return None,
        };
        Some(reg)
    }

    /// Index of a general purpose register, `None` for SP.
    pub fn index(self) -> Option<u16> {
        match self {
            Register::A => Some(0),
            Register::B => Some(1),
            Register::C => Some(2),
            Register::X => Some(3),
            Register::Y => Some(4),
            Register::Z => Some(5),
            Register::I => Some(6),
            Register::J => Some(7),
            Register::SP => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::A => "A",
            Register::B => "B",
            Register::C => "C",
            Register::X => "X",
            Register::Y => "Y",
            Register::Z => "Z",
            Register::I => "I",
            Register::J => "J",
            Register::SP => "SP",
        };
        f.write_str(name)
    }
}

/// Which operand slot of an instruction word a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPos {
    A,
    B,
}

impl ArgPos {
    pub fn shift(self) -> u16 {
        match self {
            ArgPos::A => 10,
            ArgPos::B => 5,
        }
    }

    /// Mask that clears this operand's field in an instruction word.
    pub fn clear_mask(self) -> u16 {
        match self {
            ArgPos::A => 0b0000001111111111,
            ArgPos::B => 0b1111110000011111,
        }
    }
}

pub const PUSH_POP: u16 = 0x18;
pub const PEEK: u16 = 0x19;
pub const PICK: u16 = 0x1a;
pub const SP_DIRECT: u16 = 0x1b;
pub const PC_DIRECT: u16 = 0x1c;
pub const EX_DIRECT: u16 = 0x1d;
pub const NEXT_WORD_ADDRESS: u16 = 0x1e;
pub const NEXT_WORD_LITERAL: u16 = 0x1f;
pub const LITERAL_MINUS_ONE: u16 = 0x20;
pub const LITERAL_BASE: u16 = 0x21;
pub const MAX_PACKED_LITERAL: u16 = 30;

/// Narrow a value to a 16 bit word, two's complement for negatives.
pub fn to_word(value: i64) -> Result<u16, ExprError> {
    if !(-0x8000..=0xFFFF).contains(&value) {
        return Err(ExprError::new(
            ErrorKind::EncodeRange,
            format!("Value {} does not fit in a 16 bit word", value),
        ));
    }
    Ok((value & 0xFFFF) as u16)
}

/// Value field and optional extra word for a fully resolved operand.
///
/// `force_extra` is set when patching: the extra word has already been laid
/// out, so forms without one are widened (`[a]` becomes `[a + 0]`).
pub fn encode_resolved(
    resolved: &Resolved,
    memory: bool,
    pos: ArgPos,
    pack_literals: bool,
    force_extra: bool,
) -> Result<(u16, Option<u16>), ExprError> {
    match *resolved {
        Resolved::Value(v) => {
            let word = to_word(v)?;
            if memory {
                return Ok((NEXT_WORD_ADDRESS, Some(word)));
            }
            if pack_literals && !force_extra && pos == ArgPos::A {
                if word == 0xFFFF {
                    return Ok((LITERAL_MINUS_ONE, None));
                }
                if word <= MAX_PACKED_LITERAL {
                    return Ok((LITERAL_BASE + word, None));
                }
            }
            Ok((NEXT_WORD_LITERAL, Some(word)))
        }
        Resolved::Register(reg) if force_extra => {
            if !memory {
                return Err(ExprError::new(
                    ErrorKind::OperandDecode,
                    "Expression resolved to a bare register where a word was reserved",
                ));
            }
            encode_resolved(&Resolved::RegisterOffset(reg, 0), memory, pos, false, true)
        }
        Resolved::Register(reg) => Ok(match (reg.index(), memory) {
            (Some(i), false) => (i, None),
            (Some(i), true) => (0x08 + i, None),
            (None, false) => (SP_DIRECT, None),
            (None, true) => (PEEK, None),
        }),
        Resolved::RegisterOffset(reg, offset) => {
            if !memory {
                return Err(ExprError::new(
                    ErrorKind::OperandDecode,
                    "`register + offset` is only valid inside a memory reference `[...]`",
                ));
            }
            let word = to_word(offset)?;
            Ok(match reg.index() {
                Some(i) => (0x10 + i, Some(word)),
                None => (PICK, Some(word)),
            })
        }
        Resolved::Delay(_) => Err(ExprError::expression("Expression is not resolved yet")),
    }
}

/// An operand whose expression still names undefined labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub expression: String,
    pub memory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOperand {
    pub code: u16,
    pub extra: Option<u16>,
    pub delayed: Option<Unresolved>,
}

impl EncodedOperand {
    fn fixed(code: u16) -> Self {
        Self { code, extra: None, delayed: None }
    }
}

/// Strip a case-insensitive keyword followed by whitespace.
fn strip_keyword<'t>(text: &'t str, keyword: &str) -> Option<&'t str> {
    let head = text.get(..keyword.len())?;
    let rest = &text[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(|c: char| c.is_ascii_whitespace()))
        .then(|| rest.trim())
}

pub struct OperandEncoder<'a, S: SymbolLookup + ?Sized> {
    symbols: &'a S,
    scope: &'a [u32],
    pack_literals: bool,
}

impl<'a, S: SymbolLookup + ?Sized> OperandEncoder<'a, S> {
    pub fn new(symbols: &'a S, scope: &'a [u32], pack_literals: bool) -> Self {
        Self { symbols, scope, pack_literals }
    }

    pub fn encode(&self, token: &Token<'_>, pos: ArgPos) -> Result<EncodedOperand, ErrorInfo> {
        let text = token.text.trim();
        if text.is_empty() {
            return Err(ErrorInfo::at_token(ErrorKind::OperandDecode, "Missing operand", token));
        }
        if token.is_string() {
            return Err(ErrorInfo::at_token(
                ErrorKind::OperandDecode,
                "String literals are only valid in `.dat`",
                token,
            ));
        }

        match text.to_ascii_lowercase().as_str() {
            "push" | "pop" => return Ok(EncodedOperand::fixed(PUSH_POP)),
            "peek" => return Ok(EncodedOperand::fixed(PEEK)),
            "pc" => return Ok(EncodedOperand::fixed(PC_DIRECT)),
            "ex" => return Ok(EncodedOperand::fixed(EX_DIRECT)),
            _ => {}
        }

        if let Some(offset) = strip_keyword(text, "pick") {
            let expression = format!("sp + ({})", offset);
            return self.encode_expression(&expression, true, pos).map_err(|e| e.at(token));
        }

        match (text.starts_with('['), text.ends_with(']')) {
            (true, true) => {
                let inner = text[1..text.len() - 1].trim();
                if inner.eq_ignore_ascii_case("--sp") || inner.eq_ignore_ascii_case("sp++") {
                    return Ok(EncodedOperand::fixed(PUSH_POP));
                }
                self.encode_expression(inner, true, pos).map_err(|e| e.at(token))
            }
            (false, false) => self.encode_expression(text, false, pos).map_err(|e| e.at(token)),
            _ => Err(ErrorInfo::at_token(
                ErrorKind::OperandDecode,
                "Unbalanced memory reference brackets",
                token,
            )),
        }
    }

    fn encode_expression(&self, text: &str, memory: bool, pos: ArgPos) -> Result<EncodedOperand, ExprError> {
        let expr = ExpressionParser::parse(text)?;
        let resolved = ExpressionEvaluator::new(self.symbols, self.scope).evaluate(&expr)?;
        if let Resolved::Delay(_) = resolved {
            let code = if memory { NEXT_WORD_ADDRESS } else { NEXT_WORD_LITERAL };
            return Ok(EncodedOperand {
                code,
                extra: Some(0),
                delayed: Some(Unresolved { expression: text.to_string(), memory }),
            });
        }
        let (code, extra) = encode_resolved(&resolved, memory, pos, self.pack_literals, false)?;
        Ok(EncodedOperand { code, extra, delayed: None })
    }
}
