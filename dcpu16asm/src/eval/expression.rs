//! Expression evaluation with symbol resolution

use crate::addressing::Register;
use crate::error::ErrorKind;
use crate::parser::expression::{BinOp, Expr, ExprError};
use crate::symbol::SymbolLookup;

const REGISTER_FORM: &str =
    "Expression must reduce to `register + constant`, or a bare register, or a bare constant";

fn overflow() -> ExprError {
    ExprError::new(ErrorKind::EncodeRange, "Value overflows 64 bit arithmetic")
}

/// Result of reducing an operand expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Value(i64),
    Register(Register),
    RegisterOffset(Register, i64),
    /// The named symbol is not defined yet.
    Delay(String),
}

pub struct ExpressionEvaluator<'a, S: SymbolLookup + ?Sized> {
    symbols: &'a S,
    scope: &'a [u32],
}

impl<'a, S: SymbolLookup + ?Sized> ExpressionEvaluator<'a, S> {
    pub fn new(symbols: &'a S, scope: &'a [u32]) -> Self {
        Self { symbols, scope }
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Resolved, ExprError> {
        match expr {
            Expr::Number(n) => Ok(Resolved::Value(*n)),

            Expr::Register(r) => Ok(Resolved::Register(*r)),

            Expr::Symbol(name) => Ok(match self.symbols.lookup(name, self.scope) {
                Some(value) => Resolved::Value(value),
                None => Resolved::Delay(name.clone()),
            }),

            Expr::Neg(inner) => match self.evaluate(inner)? {
                Resolved::Value(v) => v.checked_neg().map(Resolved::Value).ok_or_else(overflow),
                Resolved::Delay(name) => Ok(Resolved::Delay(name)),
                _ => Err(ExprError::expression(REGISTER_FORM)),
            },

            Expr::Binary(op, left, right) => {
                let l = self.evaluate(left)?;
                if let Resolved::Delay(_) = l {
                    return Ok(l);
                }
                let r = self.evaluate(right)?;
                if let Resolved::Delay(_) = r {
                    return Ok(r);
                }
                combine(*op, l, r)
            }
        }
    }

    /// Evaluate to a plain number; `Ok(None)` when a symbol is still undefined.
    pub fn evaluate_constant(&self, expr: &Expr) -> Result<Option<i64>, ExprError> {
        match self.evaluate(expr)? {
            Resolved::Value(v) => Ok(Some(v)),
            Resolved::Delay(_) => Ok(None),
            _ => Err(ExprError::expression("Registers are not allowed in a constant expression")),
        }
    }
}

fn register_part(r: &Resolved) -> Option<(Register, i64)> {
    match *r {
        Resolved::Register(reg) => Some((reg, 0)),
        Resolved::RegisterOffset(reg, offset) => Some((reg, offset)),
        _ => None,
    }
}

fn combine(op: BinOp, l: Resolved, r: Resolved) -> Result<Resolved, ExprError> {
    if let (Resolved::Value(a), Resolved::Value(b)) = (&l, &r) {
        return apply(op, *a, *b).map(Resolved::Value);
    }

    match (register_part(&l), &r, op) {
        (Some((reg, offset)), Resolved::Value(v), BinOp::Add) => {
            let offset = offset.checked_add(*v).ok_or_else(overflow)?;
            return Ok(Resolved::RegisterOffset(reg, offset));
        }
        (Some((reg, offset)), Resolved::Value(v), BinOp::Sub) => {
            let offset = offset.checked_sub(*v).ok_or_else(overflow)?;
            return Ok(Resolved::RegisterOffset(reg, offset));
        }
        _ => {}
    }

    match (&l, register_part(&r), op) {
        (Resolved::Value(v), Some((reg, offset)), BinOp::Add) => {
            let offset = offset.checked_add(*v).ok_or_else(overflow)?;
            Ok(Resolved::RegisterOffset(reg, offset))
        }
        _ => Err(ExprError::expression(REGISTER_FORM)),
    }
}

/// Integer semantics of the binary operators. Division and modulo by zero
/// yield 0; anything that leaves the 64 bit range is an error rather than
/// wrapping back into a valid word.
fn apply(op: BinOp, a: i64, b: i64) -> Result<i64, ExprError> {
    let value = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div if b == 0 => Some(0),
        BinOp::Div => a.checked_div(b),
        BinOp::Mod if b == 0 => Some(0),
        BinOp::Mod => a.checked_rem(b),
        BinOp::Pow if b < 0 => Some(0),
        BinOp::Pow => match u32::try_from(b) {
            Ok(exp) => a.checked_pow(exp),
            Err(_) => match a {
                0 | 1 => Some(a),
                -1 => Some(if b % 2 == 0 { 1 } else { -1 }),
                _ => None,
            },
        },
        BinOp::And => Some(a & b),
        BinOp::Or => Some(a | b),
        BinOp::Xor => Some(a ^ b),
    };
    value.ok_or_else(overflow)
}
