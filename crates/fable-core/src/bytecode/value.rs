//! Runtime values for the Fable virtual machine

use std::rc::Rc;

use thiserror::Error;

use crate::ast::{BinOp, UnaryOp};

/// A runtime value
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// A numeric value marked as relative: `@30` means "30 more than
    /// the current value" to whatever host command consumes it.
    /// Arithmetic unwraps the marker.
    Delta(f64),
    /// An evaluated Bezier curve literal
    Curve(Rc<[CurvePointValue]>),
}

/// One evaluated point of a curve value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePointValue {
    pub x: f64,
    pub y: f64,
    /// True for interior (braced) control points
    pub interior: bool,
}

/// Errors from value operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("operator '{op}' is not defined for {lhs} and {rhs}")]
    BinaryTypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("operator '{op}' is not defined for {operand}")]
    UnaryTypeMismatch {
        op: &'static str,
        operand: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("value of type {0} cannot be marked as a delta")]
    NotNumeric(&'static str),
}

impl Value {
    /// Type name for error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Delta(_) => "delta",
            Value::Curve(_) => "curve",
        }
    }

    /// Create a string value
    #[must_use]
    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(text.as_ref()))
    }

    /// Numeric view of the value, unwrapping delta markers
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) | Value::Delta(v) => Some(*v),
            _ => None,
        }
    }

    /// Loose equality: numbers compare by magnitude regardless of
    /// representation, strings by content, null only to null
    #[must_use]
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Curve(a), Value::Curve(b)) => a == b,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON || a == b,
                _ => false,
            },
        }
    }

    /// Apply a binary operator
    pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
        let mismatch = || ValueError::BinaryTypeMismatch {
            op: op.symbol(),
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        };
        match op {
            BinOp::Add => {
                if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
                    let mut out = String::with_capacity(a.len() + b.len());
                    out.push_str(a);
                    out.push_str(b);
                    return Ok(Value::str(out));
                }
                Self::arithmetic(lhs, rhs, mismatch, |a, b| Some(a + b), |a, b| {
                    a.checked_add(b)
                })
            }
            BinOp::Sub => Self::arithmetic(lhs, rhs, mismatch, |a, b| Some(a - b), |a, b| {
                a.checked_sub(b)
            }),
            BinOp::Mul => Self::arithmetic(lhs, rhs, mismatch, |a, b| Some(a * b), |a, b| {
                a.checked_mul(b)
            }),
            BinOp::Div => {
                if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
                    if *b == 0 {
                        return Err(ValueError::DivisionByZero);
                    }
                    // i64::MIN / -1 has no i64 representation
                    if let Some(v) = a.checked_div(*b) {
                        return Ok(Value::Int(v));
                    }
                }
                let (a, b) = Self::number_pair(lhs, rhs).ok_or_else(mismatch)?;
                if b == 0.0 {
                    return Err(ValueError::DivisionByZero);
                }
                Ok(Value::Float(a / b))
            }
            BinOp::Mod => {
                if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
                    if *b == 0 {
                        return Err(ValueError::DivisionByZero);
                    }
                    if let Some(v) = a.checked_rem(*b) {
                        return Ok(Value::Int(v));
                    }
                }
                let (a, b) = Self::number_pair(lhs, rhs).ok_or_else(mismatch)?;
                if b == 0.0 {
                    return Err(ValueError::DivisionByZero);
                }
                Ok(Value::Float(a % b))
            }
            BinOp::Eq => Ok(Value::Bool(lhs.loose_eq(rhs))),
            BinOp::Ne => Ok(Value::Bool(!lhs.loose_eq(rhs))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = match (lhs, rhs) {
                    (Value::Str(a), Value::Str(b)) => a.as_ref().partial_cmp(b.as_ref()),
                    _ => {
                        let (a, b) = Self::number_pair(lhs, rhs).ok_or_else(mismatch)?;
                        a.partial_cmp(&b)
                    }
                };
                let ordering = ordering.ok_or_else(mismatch)?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            BinOp::And | BinOp::Or => {
                let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) else {
                    return Err(mismatch());
                };
                Ok(Value::Bool(if op == BinOp::And {
                    *a && *b
                } else {
                    *a || *b
                }))
            }
        }
    }

    /// Apply a unary operator
    pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ValueError> {
        match (op, operand) {
            (UnaryOp::Neg, Value::Int(v)) => Ok(v
                .checked_neg()
                .map_or(Value::Float(-(*v as f64)), Value::Int)),
            (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
            (UnaryOp::Neg, Value::Delta(v)) => Ok(Value::Delta(-v)),
            (UnaryOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
            _ => Err(ValueError::UnaryTypeMismatch {
                op: match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                },
                operand: operand.type_name(),
            }),
        }
    }

    /// Rewrap a numeric value as a delta
    pub fn into_delta(self) -> Result<Value, ValueError> {
        match self.as_number() {
            Some(v) => Ok(Value::Delta(v)),
            None => Err(ValueError::NotNumeric(self.type_name())),
        }
    }

    fn number_pair(lhs: &Value, rhs: &Value) -> Option<(f64, f64)> {
        Some((lhs.as_number()?, rhs.as_number()?))
    }

    /// Arithmetic on numbers. Int op Int stays Int unless it overflows;
    /// anything involving a float or delta computes in f64. A delta
    /// operand makes the result a delta again.
    fn arithmetic(
        lhs: &Value,
        rhs: &Value,
        mismatch: impl Fn() -> ValueError + Copy,
        float_op: impl Fn(f64, f64) -> Option<f64>,
        int_op: impl Fn(i64, i64) -> Option<i64>,
    ) -> Result<Value, ValueError> {
        if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
            if let Some(v) = int_op(*a, *b) {
                return Ok(Value::Int(v));
            }
        }
        let (a, b) = Self::number_pair(lhs, rhs).ok_or_else(mismatch)?;
        let result = float_op(a, b).ok_or_else(mismatch)?;
        if matches!(lhs, Value::Delta(_)) || matches!(rhs, Value::Delta(_)) {
            Ok(Value::Delta(result))
        } else {
            Ok(Value::Float(result))
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Delta(v) => write!(f, "@{v}"),
            Value::Curve(points) => {
                for (i, p) in points.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if p.interior {
                        write!(f, "{{{}, {}}}", p.x, p.y)?;
                    } else {
                        write!(f, "({}, {})", p.x, p.y)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_numeric_equality() {
        assert!(Value::Int(3).loose_eq(&Value::Float(3.0)));
        assert!(Value::Delta(2.0).loose_eq(&Value::Int(2)));
        assert!(!Value::Int(3).loose_eq(&Value::str("3")));
        assert!(Value::Null.loose_eq(&Value::Null));
        assert!(!Value::Null.loose_eq(&Value::Int(0)));
    }

    #[test]
    fn int_arithmetic_stays_int() {
        let v = Value::binary(BinOp::Add, &Value::Int(2), &Value::Int(3)).unwrap();
        assert!(matches!(v, Value::Int(5)));
    }

    #[test]
    fn mixed_arithmetic_is_float() {
        let v = Value::binary(BinOp::Mul, &Value::Int(2), &Value::Float(1.5)).unwrap();
        assert!(matches!(v, Value::Float(x) if (x - 3.0).abs() < f64::EPSILON));
    }

    #[test]
    fn delta_is_contagious_in_arithmetic() {
        let v = Value::binary(BinOp::Add, &Value::Delta(10.0), &Value::Int(5)).unwrap();
        assert!(matches!(v, Value::Delta(x) if (x - 15.0).abs() < f64::EPSILON));
    }

    #[test]
    fn string_concatenation() {
        let v = Value::binary(BinOp::Add, &Value::str("fox"), &Value::str("glove")).unwrap();
        assert_eq!(v, Value::str("foxglove"));
    }

    #[test]
    fn string_ordering() {
        let v = Value::binary(BinOp::Lt, &Value::str("apple"), &Value::str("pear")).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(
            Value::binary(BinOp::Div, &Value::Int(1), &Value::Int(0)),
            Err(ValueError::DivisionByZero)
        );
        assert_eq!(
            Value::binary(BinOp::Mod, &Value::Int(1), &Value::Int(0)),
            Err(ValueError::DivisionByZero)
        );
    }

    #[test]
    fn int_min_division_widens_to_float() {
        let v = Value::binary(BinOp::Div, &Value::Int(i64::MIN), &Value::Int(-1)).unwrap();
        assert!(matches!(v, Value::Float(x) if x > 0.0));
        let v = Value::binary(BinOp::Mod, &Value::Int(i64::MIN), &Value::Int(-1)).unwrap();
        assert!(matches!(v, Value::Float(x) if x.abs() < f64::EPSILON));
    }

    #[test]
    fn type_mismatch_reports_names() {
        let err = Value::binary(BinOp::Sub, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(
            err,
            ValueError::BinaryTypeMismatch {
                op: "-",
                lhs: "string",
                rhs: "int"
            }
        );
    }

    #[test]
    fn logical_operators_require_bools() {
        let v = Value::binary(BinOp::And, &Value::Bool(true), &Value::Bool(false)).unwrap();
        assert_eq!(v, Value::Bool(false));
        assert!(Value::binary(BinOp::Or, &Value::Int(1), &Value::Bool(true)).is_err());
    }

    #[test]
    fn delta_conversion() {
        assert_eq!(Value::Int(30).into_delta().unwrap(), Value::Delta(30.0));
        assert!(Value::str("x").into_delta().is_err());
    }

    #[test]
    fn negate_keeps_representation() {
        assert!(matches!(
            Value::unary(UnaryOp::Neg, &Value::Int(4)).unwrap(),
            Value::Int(-4)
        ));
        assert!(matches!(
            Value::unary(UnaryOp::Neg, &Value::Delta(2.0)).unwrap(),
            Value::Delta(v) if (v + 2.0).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn negating_int_min_widens_to_float() {
        assert!(matches!(
            Value::unary(UnaryOp::Neg, &Value::Int(i64::MIN)).unwrap(),
            Value::Float(x) if x > 0.0
        ));
    }
}
