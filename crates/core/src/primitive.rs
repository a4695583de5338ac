//! Primitive values and promotion arithmetic.
//!
//! A primitive is a char, a 32-bit int or a 64-bit float. Binary operations
//! promote both sides to the wider of the two types in the order
//! char < int < float; int arithmetic is two's-complement wrapping, float
//! arithmetic is IEEE-754. The integer-only operations (`%`, `&&`, `||`,
//! `^`) reject float operands.

use thiserror::Error;

/// Result alias for primitive operations that can reject their operands.
pub type PrimitiveResult = Result<Primitive, PrimitiveError>;

/// Errors produced by primitive arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Integer-only op applied to a float
    #[error("op '{op}' not valid for floating-point operands")]
    FloatOperand { op: &'static str },

    /// Integer division or modulo by zero
    #[error("division by zero in op '{op}'")]
    DivisionByZero { op: &'static str },
}

/// The width class of a primitive, ordered by promotion rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrimitiveType {
    /// 8-bit character
    Char,
    /// 32-bit signed integer
    Int,
    /// 64-bit IEEE-754 float
    Float,
}

/// A primitive value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Primitive {
    /// 8-bit character
    Char(u8),
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit IEEE-754 float
    Float(f64),
}

impl Primitive {
    /// Returns the promotion rank of this value.
    pub fn type_of(&self) -> PrimitiveType {
        match self {
            Primitive::Char(_) => PrimitiveType::Char,
            Primitive::Int(_) => PrimitiveType::Int,
            Primitive::Float(_) => PrimitiveType::Float,
        }
    }

    /// Widens to float.
    pub fn as_float(&self) -> f64 {
        match *self {
            Primitive::Char(c) => c as f64,
            Primitive::Int(i) => i as f64,
            Primitive::Float(f) => f,
        }
    }

    /// Narrows to int (floats truncate).
    pub fn as_int(&self) -> i32 {
        match *self {
            Primitive::Char(c) => c as i32,
            Primitive::Int(i) => i,
            Primitive::Float(f) => f as i32,
        }
    }

    /// Narrows to char.
    pub fn as_char(&self) -> u8 {
        match *self {
            Primitive::Char(c) => c,
            Primitive::Int(i) => i as u8,
            Primitive::Float(f) => f as u8,
        }
    }

    /// True when this is an int (used by index checks).
    pub fn is_int(&self) -> bool {
        matches!(self, Primitive::Int(_))
    }
}

macro_rules! promoting_op {
    ($name:ident, $int_fn:ident, $float_op:tt) => {
        /// Promotion arithmetic: float if either side is float, else int,
        /// else char.
        pub fn $name(a: Primitive, b: Primitive) -> Primitive {
            use PrimitiveType::*;
            match a.type_of().max(b.type_of()) {
                Float => Primitive::Float(a.as_float() $float_op b.as_float()),
                Int => Primitive::Int(a.as_int().$int_fn(b.as_int())),
                Char => Primitive::Char(a.as_char().$int_fn(b.as_char())),
            }
        }
    };
}

promoting_op!(add, wrapping_add, +);
promoting_op!(sub, wrapping_sub, -);
promoting_op!(mult, wrapping_mul, *);

/// Promotion division. Integer division by zero is rejected; float division
/// follows IEEE-754.
pub fn div(a: Primitive, b: Primitive) -> PrimitiveResult {
    use PrimitiveType::*;
    match a.type_of().max(b.type_of()) {
        Float => Ok(Primitive::Float(a.as_float() / b.as_float())),
        Int => {
            let rhs = b.as_int();
            if rhs == 0 {
                return Err(PrimitiveError::DivisionByZero { op: "DIV" });
            }
            Ok(Primitive::Int(a.as_int().wrapping_div(rhs)))
        }
        Char => {
            let rhs = b.as_char();
            if rhs == 0 {
                return Err(PrimitiveError::DivisionByZero { op: "DIV" });
            }
            Ok(Primitive::Char(a.as_char().wrapping_div(rhs)))
        }
    }
}

fn int_only(op: &'static str, a: Primitive, b: Primitive) -> Result<(i32, i32), PrimitiveError> {
    if a.type_of() == PrimitiveType::Float || b.type_of() == PrimitiveType::Float {
        return Err(PrimitiveError::FloatOperand { op });
    }
    Ok((a.as_int(), b.as_int()))
}

/// Integer modulo; rejects floats and zero divisors.
pub fn modulo(a: Primitive, b: Primitive) -> PrimitiveResult {
    let (x, y) = int_only("MOD", a, b)?;
    if y == 0 {
        return Err(PrimitiveError::DivisionByZero { op: "MOD" });
    }
    Ok(Primitive::Int(x.wrapping_rem(y)))
}

/// Logical and over ints; `0`/`1` result.
pub fn and(a: Primitive, b: Primitive) -> PrimitiveResult {
    let (x, y) = int_only("AND", a, b)?;
    Ok(Primitive::Int((x != 0 && y != 0) as i32))
}

/// Logical or over ints; `0`/`1` result.
pub fn or(a: Primitive, b: Primitive) -> PrimitiveResult {
    let (x, y) = int_only("OR", a, b)?;
    Ok(Primitive::Int((x != 0 || y != 0) as i32))
}

/// Bitwise xor over ints.
pub fn xor(a: Primitive, b: Primitive) -> PrimitiveResult {
    let (x, y) = int_only("XOR", a, b)?;
    Ok(Primitive::Int(x ^ y))
}

macro_rules! comparing_op {
    ($name:ident, $op:tt) => {
        /// Promotion comparison.
        pub fn $name(a: Primitive, b: Primitive) -> bool {
            use PrimitiveType::*;
            match a.type_of().max(b.type_of()) {
                Float => a.as_float() $op b.as_float(),
                Int => a.as_int() $op b.as_int(),
                Char => a.as_char() $op b.as_char(),
            }
        }
    };
}

comparing_op!(lt, <);
comparing_op!(gt, >);
comparing_op!(lte, <=);
comparing_op!(gte, >=);
comparing_op!(eq, ==);

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Primitive::Char(c) => write!(f, "{}", *c as char),
            Primitive::Int(i) => write!(f, "{i}"),
            Primitive::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_picks_widest_type() {
        assert_eq!(
            add(Primitive::Int(1), Primitive::Float(0.5)),
            Primitive::Float(1.5)
        );
        assert_eq!(
            add(Primitive::Char(b'a'), Primitive::Int(1)),
            Primitive::Int(98)
        );
        assert_eq!(
            add(Primitive::Char(1), Primitive::Char(2)),
            Primitive::Char(3)
        );
    }

    #[test]
    fn int_arithmetic_wraps() {
        assert_eq!(
            add(Primitive::Int(i32::MAX), Primitive::Int(1)),
            Primitive::Int(i32::MIN)
        );
    }

    #[test]
    fn integer_only_ops_reject_floats() {
        assert_eq!(
            modulo(Primitive::Float(1.0), Primitive::Int(2)),
            Err(PrimitiveError::FloatOperand { op: "MOD" })
        );
        assert_eq!(
            and(Primitive::Int(1), Primitive::Float(2.0)),
            Err(PrimitiveError::FloatOperand { op: "AND" })
        );
    }

    #[test]
    fn division_by_zero_is_rejected() {
        assert_eq!(
            div(Primitive::Int(4), Primitive::Int(0)),
            Err(PrimitiveError::DivisionByZero { op: "DIV" })
        );
        assert_eq!(
            modulo(Primitive::Int(4), Primitive::Int(0)),
            Err(PrimitiveError::DivisionByZero { op: "MOD" })
        );
    }

    #[test]
    fn comparisons_promote() {
        assert!(lt(Primitive::Char(b'a'), Primitive::Int(1000)));
        assert!(gte(Primitive::Float(2.0), Primitive::Int(2)));
        assert!(eq(Primitive::Int(65), Primitive::Char(b'A')));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Primitive::Int(14).to_string(), "14");
        assert_eq!(Primitive::Float(2.5).to_string(), "2.5");
        assert_eq!(Primitive::Float(3.0).to_string(), "3.0");
        assert_eq!(Primitive::Char(b'x').to_string(), "x");
    }
}
