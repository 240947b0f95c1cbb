//! Numeric literal parsing

use std::num::IntErrorKind;

use super::expression::ExprError;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    Hexadecimal, // 0xFF
    Binary,      // 0b11111111
    Decimal,     // 255
}

pub struct NumberParser;

impl NumberParser {
    /// Parse an unsigned literal. Values are kept as `i64` so that out of range
    /// operands can be reported instead of silently truncated.
    pub fn parse(s: &str) -> Result<i64, ExprError> {
        let trimmed = s.trim();
        match Self::detect_format(trimmed) {
            NumberFormat::Hexadecimal => Self::parse_radix(&trimmed[2..], 16, "hexadecimal"),
            NumberFormat::Binary => Self::parse_radix(&trimmed[2..], 2, "binary"),
            NumberFormat::Decimal => Self::parse_radix(trimmed, 10, "decimal"),
        }
    }

    fn parse_radix(digits: &str, radix: u32, name: &str) -> Result<i64, ExprError> {
        let digits: String = digits.chars().filter(|&c| c != '_').collect();
        if digits.is_empty() {
            return Err(ExprError::expression(format!("Invalid {}: missing digits", name)));
        }
        i64::from_str_radix(&digits, radix).map_err(|e| match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ExprError::new(
                ErrorKind::EncodeRange,
                format!("Literal {} does not fit in 64 bits", digits),
            ),
            _ => ExprError::expression(format!("Invalid {}: {}", name, digits)),
        })
    }

    pub fn detect_format(s: &str) -> NumberFormat {
        let lower = s.as_bytes();
        if lower.len() >= 2 && lower[0] == b'0' {
            match lower[1] {
                b'x' | b'X' => return NumberFormat::Hexadecimal,
                b'b' | b'B' => return NumberFormat::Binary,
                _ => {}
            }
        }
        NumberFormat::Decimal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_formats() {
        assert_eq!(NumberParser::parse("0xFF").unwrap(), 255);
        assert_eq!(NumberParser::parse("0xff").unwrap(), 255);
        assert_eq!(NumberParser::parse("0X1234").unwrap(), 0x1234);
        assert_eq!(NumberParser::parse("0x10000").unwrap(), 0x10000);
    }

    #[test]
    fn test_binary_formats() {
        assert_eq!(NumberParser::parse("0b11111111").unwrap(), 255);
        assert_eq!(NumberParser::parse("0b1111110000011111").unwrap(), 0xFC1F);
        assert_eq!(NumberParser::parse("0b1010_1010").unwrap(), 0xAA);
    }

    #[test]
    fn test_decimal() {
        assert_eq!(NumberParser::parse("255").unwrap(), 255);
        assert_eq!(NumberParser::parse("0").unwrap(), 0);
        assert_eq!(NumberParser::parse("65539").unwrap(), 65539);
    }

    #[test]
    fn test_invalid() {
        assert!(NumberParser::parse("0x").is_err());
        assert!(NumberParser::parse("0xjasdf").is_err());
        assert!(NumberParser::parse("1234cat").is_err());
        assert!(NumberParser::parse("0b102").is_err());
        assert_eq!(NumberParser::parse("0xjasdf").unwrap_err().kind, ErrorKind::Expression);
    }

    #[test]
    fn test_too_wide_for_64_bits() {
        assert_eq!(NumberParser::parse("9223372036854775807").unwrap(), i64::MAX);
        assert_eq!(NumberParser::parse("99999999999999999999").unwrap_err().kind, ErrorKind::EncodeRange);
        assert_eq!(NumberParser::parse("0x1_0000_0000_0000_0000").unwrap_err().kind, ErrorKind::EncodeRange);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(NumberParser::detect_format("0xFF"), NumberFormat::Hexadecimal);
        assert_eq!(NumberParser::detect_format("0b101"), NumberFormat::Binary);
        assert_eq!(NumberParser::detect_format("255"), NumberFormat::Decimal);
        assert_eq!(NumberParser::detect_format("0"), NumberFormat::Decimal);
    }
}
