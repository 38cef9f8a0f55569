//! Binary operator table
//!
//! Operators are listed longest name first so the lexer can match them by
//! prefix. A higher `prior` binds more loosely: the parser splits an
//! expression at the top-level operator with the highest prior.

use crate::value::Value;

/// Operation performed by a binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    LessEq,
    GreaterEq,
    Less,
    Greater,
    Add,
    Concat,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Operator table entry
#[derive(Debug, Clone, Copy)]
pub struct Operator {
    pub name: &'static str,
    pub prior: u8,
    pub left_to_right: bool,
    pub op: BinaryOp,
}

const fn op(name: &'static str, prior: u8, op: BinaryOp) -> Operator {
    Operator {
        name,
        prior,
        left_to_right: true,
        op,
    }
}

/// All operators, ordered by name length
pub const OPERATORS: &[Operator] = &[
    op("&&", 50, BinaryOp::And),
    op("||", 50, BinaryOp::Or),
    op("==", 40, BinaryOp::Eq),
    op("!=", 40, BinaryOp::NotEq),
    op("<=", 40, BinaryOp::LessEq),
    op(">=", 40, BinaryOp::GreaterEq),
    op("<", 40, BinaryOp::Less),
    op(">", 40, BinaryOp::Greater),
    op("+", 20, BinaryOp::Add),
    op("&", 25, BinaryOp::Concat),
    op("-", 20, BinaryOp::Sub),
    op("*", 10, BinaryOp::Mul),
    op("/", 10, BinaryOp::Div),
    op("%", 10, BinaryOp::Mod),
];

/// Longest operator that `text` starts with
pub fn match_prefix(text: &str) -> Option<&'static Operator> {
    OPERATORS.iter().find(|o| text.starts_with(o.name))
}

/// Operator with exactly this name
pub fn find(name: &str) -> Option<&'static Operator> {
    OPERATORS.iter().find(|o| o.name == name)
}

impl Operator {
    /// Whether this operator should replace `current` as the split point
    /// when it appears further right in the same token group.
    ///
    /// A shorter operator never replaces a longer one, so `2 == 2 < 3`
    /// splits at `==`.
    pub fn splits_over(&self, current: &Operator) -> bool {
        if self.name.len() < current.name.len() {
            return false;
        }
        if self.left_to_right {
            self.prior >= current.prior
        } else {
            self.prior > current.prior
        }
    }
}

impl BinaryOp {
    /// Apply a strict (non short-circuit) operator
    ///
    /// `And`/`Or` are handled by the interpreter so the right side can be
    /// skipped; here they fall back to strict evaluation.
    pub fn apply(self, left: &Value, right: &Value) -> Value {
        match self {
            BinaryOp::And => Value::from_bool(left.is_truthy() && right.is_truthy()),
            BinaryOp::Or => Value::from_bool(left.is_truthy() || right.is_truthy()),
            BinaryOp::Eq => Value::from_bool(left.compare(right).is_eq()),
            BinaryOp::NotEq => Value::from_bool(left.compare(right).is_ne()),
            BinaryOp::LessEq => Value::from_bool(left.compare(right).is_le()),
            BinaryOp::GreaterEq => Value::from_bool(left.compare(right).is_ge()),
            BinaryOp::Less => Value::from_bool(left.compare(right).is_lt()),
            BinaryOp::Greater => Value::from_bool(left.compare(right).is_gt()),
            BinaryOp::Add => Value::Number(left.as_number() + right.as_number()),
            BinaryOp::Concat => Value::Text(left.as_text() + &right.as_text()),
            BinaryOp::Sub => Value::Number(left.as_number() - right.as_number()),
            BinaryOp::Mul => Value::Number(left.as_number() * right.as_number()),
            BinaryOp::Div => {
                let r = right.as_number();
                if r != 0.0 {
                    Value::Number(left.as_number() / r)
                } else {
                    log::warn!("Division by zero");
                    Value::Number(0.0)
                }
            }
            BinaryOp::Mod => {
                let r = right.as_int();
                if r == 0 {
                    log::warn!("Modulo by zero");
                    return Value::Number(0.0);
                }
                match left.as_int().checked_rem(r) {
                    Some(m) => Value::Number(m as f64),
                    None => {
                        log::warn!("Modulo overflow");
                        Value::Number(0.0)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_prefers_longer_operator() {
        assert_eq!(match_prefix("<= 3").map(|o| o.op), Some(BinaryOp::LessEq));
        assert_eq!(match_prefix("< 3").map(|o| o.op), Some(BinaryOp::Less));
        assert_eq!(match_prefix("&&b").map(|o| o.op), Some(BinaryOp::And));
        assert_eq!(match_prefix("&b").map(|o| o.op), Some(BinaryOp::Concat));
        assert!(match_prefix("?").is_none());
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        let v = BinaryOp::Div.apply(&Value::Number(4.0), &Value::Number(0.0));
        assert_eq!(v, Value::Number(0.0));
        let v = BinaryOp::Mod.apply(&Value::Number(4.0), &Value::Number(0.0));
        assert_eq!(v, Value::Number(0.0));
    }

    #[test]
    fn test_modulo_overflow_is_zero() {
        let v = BinaryOp::Mod.apply(&Value::Number(i64::MIN as f64), &Value::Number(-1.0));
        assert_eq!(v, Value::Number(0.0));
    }

    #[test]
    fn test_modulo_truncates() {
        let v = BinaryOp::Mod.apply(&Value::Number(7.9), &Value::Number(3.2));
        assert_eq!(v, Value::Number(1.0));
    }

    #[test]
    fn test_split_rule() {
        let plus = find("+").unwrap();
        let mul = find("*").unwrap();
        let and = find("&&").unwrap();
        assert!(plus.splits_over(mul));
        assert!(plus.splits_over(plus));
        assert!(!mul.splits_over(plus));
        assert!(and.splits_over(plus));

        let eq = find("==").unwrap();
        let less = find("<").unwrap();
        assert!(eq.splits_over(less));
        assert!(!less.splits_over(eq));
    }
}
