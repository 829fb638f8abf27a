//! Folding of scalar constant expressions.

use crate::{BinaryOperator, Literal, Scalar, ScalarKind, UnaryOperator};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConstantError {
    #[error("Operator {0:?} can't be applied to {1:?}")]
    InvalidUnaryOperand(UnaryOperator, Literal),
    #[error("Operator {0:?} can't be applied to {1:?} and {2:?}")]
    InvalidBinaryOperands(BinaryOperator, Literal, Literal),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Shift amount {0} is out of range")]
    ShiftOutOfRange(u32),
}

pub fn unary(op: UnaryOperator, value: Literal) -> Result<Literal, ConstantError> {
    Ok(match (op, value) {
        (UnaryOperator::Negate, Literal::I32(v)) => Literal::I32(v.wrapping_neg()),
        (UnaryOperator::Negate, Literal::F32(v)) => Literal::F32(-v),
        (UnaryOperator::Negate, Literal::F16(v)) => Literal::F16(-v),
        (UnaryOperator::LogicalNot, Literal::Bool(v)) => Literal::Bool(!v),
        (UnaryOperator::BitwiseNot, Literal::I32(v)) => Literal::I32(!v),
        (UnaryOperator::BitwiseNot, Literal::U32(v)) => Literal::U32(!v),
        _ => return Err(ConstantError::InvalidUnaryOperand(op, value)),
    })
}

/// Fold `left op right`.
///
/// Integer arithmetic wraps on overflow.
pub fn binary(op: BinaryOperator, left: Literal, right: Literal) -> Result<Literal, ConstantError> {
    use BinaryOperator as Bo;

    let invalid = || ConstantError::InvalidBinaryOperands(op, left, right);

    if op.is_comparison() {
        let ordering = match (left, right) {
            (Literal::I32(a), Literal::I32(b)) => a.partial_cmp(&b),
            (Literal::U32(a), Literal::U32(b)) => a.partial_cmp(&b),
            (Literal::F32(a), Literal::F32(b)) | (Literal::F16(a), Literal::F16(b)) => {
                a.partial_cmp(&b)
            }
            (Literal::Bool(a), Literal::Bool(b)) if matches!(op, Bo::Equal | Bo::NotEqual) => {
                a.partial_cmp(&b)
            }
            _ => return Err(invalid()),
        };
        let result = match ordering {
            Some(ordering) => match op {
                Bo::Equal => ordering.is_eq(),
                Bo::NotEqual => ordering.is_ne(),
                Bo::Less => ordering.is_lt(),
                Bo::LessEqual => ordering.is_le(),
                Bo::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            },
            // NaN compares unequal to everything
            None => op == Bo::NotEqual,
        };
        return Ok(Literal::Bool(result));
    }

    Ok(match (left, right) {
        (Literal::I32(a), Literal::I32(b)) => Literal::I32(match op {
            Bo::Add => a.wrapping_add(b),
            Bo::Subtract => a.wrapping_sub(b),
            Bo::Multiply => a.wrapping_mul(b),
            Bo::Divide => a.checked_div(b).ok_or(ConstantError::DivisionByZero)?,
            Bo::Modulo => a.checked_rem(b).ok_or(ConstantError::DivisionByZero)?,
            Bo::And => a & b,
            Bo::ExclusiveOr => a ^ b,
            Bo::InclusiveOr => a | b,
            _ => return Err(invalid()),
        }),
        (Literal::U32(a), Literal::U32(b)) => Literal::U32(match op {
            Bo::Add => a.wrapping_add(b),
            Bo::Subtract => a.wrapping_sub(b),
            Bo::Multiply => a.wrapping_mul(b),
            Bo::Divide => a.checked_div(b).ok_or(ConstantError::DivisionByZero)?,
            Bo::Modulo => a.checked_rem(b).ok_or(ConstantError::DivisionByZero)?,
            Bo::And => a & b,
            Bo::ExclusiveOr => a ^ b,
            Bo::InclusiveOr => a | b,
            Bo::ShiftLeft => a.checked_shl(b).ok_or(ConstantError::ShiftOutOfRange(b))?,
            Bo::ShiftRight => a.checked_shr(b).ok_or(ConstantError::ShiftOutOfRange(b))?,
            _ => return Err(invalid()),
        }),
        (Literal::I32(a), Literal::U32(b)) => Literal::I32(match op {
            Bo::ShiftLeft => a.checked_shl(b).ok_or(ConstantError::ShiftOutOfRange(b))?,
            Bo::ShiftRight => a.checked_shr(b).ok_or(ConstantError::ShiftOutOfRange(b))?,
            _ => return Err(invalid()),
        }),
        (Literal::F32(a), Literal::F32(b)) => Literal::F32(float_op(op, a, b).ok_or_else(invalid)?),
        (Literal::F16(a), Literal::F16(b)) => Literal::F16(float_op(op, a, b).ok_or_else(invalid)?),
        (Literal::Bool(a), Literal::Bool(b)) => Literal::Bool(match op {
            Bo::LogicalAnd | Bo::And => a && b,
            Bo::LogicalOr | Bo::InclusiveOr => a || b,
            _ => return Err(invalid()),
        }),
        _ => return Err(invalid()),
    })
}

fn float_op(op: BinaryOperator, a: f32, b: f32) -> Option<f32> {
    Some(match op {
        BinaryOperator::Add => a + b,
        BinaryOperator::Subtract => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => a / b,
        BinaryOperator::Modulo => a % b,
        _ => return None,
    })
}

/// Convert `value` to the scalar type `target`, as a value constructor does.
pub fn convert(value: Literal, target: Scalar) -> Literal {
    match (value, target.kind, target.width) {
        (Literal::Bool(v), ScalarKind::Bool, _) => Literal::Bool(v),
        (Literal::Bool(v), ScalarKind::Sint, _) => Literal::I32(v as i32),
        (Literal::Bool(v), ScalarKind::Uint, _) => Literal::U32(v as u32),
        (Literal::Bool(v), ScalarKind::Float, 2) => Literal::F16(v as u32 as f32),
        (Literal::Bool(v), ScalarKind::Float, _) => Literal::F32(v as u32 as f32),
        (Literal::I32(v), ScalarKind::Sint, _) => Literal::I32(v),
        (Literal::I32(v), ScalarKind::Uint, _) => Literal::U32(v as u32),
        (Literal::U32(v), ScalarKind::Sint, _) => Literal::I32(v as i32),
        (Literal::U32(v), ScalarKind::Uint, _) => Literal::U32(v),
        (Literal::I32(v), ScalarKind::Float, width) => float(v as f32, width),
        (Literal::U32(v), ScalarKind::Float, width) => float(v as f32, width),
        (Literal::I32(v), ScalarKind::Bool, _) => Literal::Bool(v != 0),
        (Literal::U32(v), ScalarKind::Bool, _) => Literal::Bool(v != 0),
        (Literal::F32(v) | Literal::F16(v), ScalarKind::Float, width) => float(v, width),
        // Float to integer conversions saturate, which `as` already does.
        (Literal::F32(v) | Literal::F16(v), ScalarKind::Sint, _) => Literal::I32(v as i32),
        (Literal::F32(v) | Literal::F16(v), ScalarKind::Uint, _) => Literal::U32(v as u32),
        (Literal::F32(v) | Literal::F16(v), ScalarKind::Bool, _) => Literal::Bool(v != 0.0),
    }
}

fn float(value: f32, width: crate::Bytes) -> Literal {
    if width == 2 {
        Literal::F16(value)
    } else {
        Literal::F32(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(
            binary(BinaryOperator::Add, Literal::U32(u32::MAX), Literal::U32(2)),
            Ok(Literal::U32(1))
        );
        assert_eq!(
            binary(BinaryOperator::Multiply, Literal::I32(i32::MIN), Literal::I32(-1)),
            Ok(Literal::I32(i32::MIN))
        );
        assert_eq!(unary(UnaryOperator::Negate, Literal::I32(i32::MIN)), Ok(Literal::I32(i32::MIN)));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            binary(BinaryOperator::Divide, Literal::U32(1), Literal::U32(0)),
            Err(ConstantError::DivisionByZero)
        );
        assert_eq!(
            binary(BinaryOperator::Divide, Literal::F32(1.0), Literal::F32(0.0)),
            Ok(Literal::F32(f32::INFINITY))
        );
    }

    #[test]
    fn comparisons_and_mismatches() {
        assert_eq!(
            binary(BinaryOperator::Less, Literal::I32(-1), Literal::I32(3)),
            Ok(Literal::Bool(true))
        );
        assert!(binary(BinaryOperator::Add, Literal::I32(1), Literal::U32(1)).is_err());
        assert!(unary(UnaryOperator::LogicalNot, Literal::U32(1)).is_err());
    }

    #[test]
    fn conversions() {
        assert_eq!(convert(Literal::I32(-1), Scalar::U32), Literal::U32(u32::MAX));
        assert_eq!(convert(Literal::F32(2.5), Scalar::I32), Literal::I32(2));
        assert_eq!(convert(Literal::U32(3), Scalar::F16), Literal::F16(3.0));
        assert_eq!(convert(Literal::Bool(true), Scalar::F32), Literal::F32(1.0));
    }
}
