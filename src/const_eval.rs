//! Constant evaluator (C8)
//!
//! Folds pure expressions over numeric and string literals at compile time.
//! Mirrors the teacher's `codegen/specialization.rs` constant-folding idiom:
//! a small recursive `Option`-returning evaluator that the caller treats as
//! "no opinion" rather than an error when it can't fold, except at the two
//! call sites (`CONSTANT` initializers, `DIM` dimension expressions) where
//! spec.md §4.4 requires a non-constant result to be an error.

use crate::ast::{BinOp, CompareOp, Expr, UnaryOp};
use crate::types::{BaseType, TypeDescriptor};
use std::collections::HashMap;

/// A folded constant value. Integer arithmetic stays integer when both
/// operands are integer; `/`, `^`, or any float operand promotes to `Float`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConstValue {
    pub fn type_descriptor(&self) -> TypeDescriptor {
        match self {
            ConstValue::Int(_) => TypeDescriptor::simple(BaseType::Long),
            ConstValue::Float(_) => TypeDescriptor::simple(BaseType::Double),
            ConstValue::Str(_) => TypeDescriptor::simple(BaseType::String),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ConstValue::Int(i) => Some(*i as f64),
            ConstValue::Float(f) => Some(*f),
            ConstValue::Str(_) => None,
        }
    }

    fn truthy(&self) -> Option<bool> {
        match self {
            ConstValue::Int(i) => Some(*i != 0),
            ConstValue::Float(f) => Some(*f != 0.0),
            ConstValue::Str(_) => None,
        }
    }
}

const BUILTIN_FNS: &[&str] = &[
    "ABS", "SIN", "COS", "TAN", "ATN", "SQR", "INT", "SGN", "LOG", "EXP", "FIX", "CINT", "LEN",
    "MIN", "MAX",
];

/// Fold `expr` to a constant value given the already-known constants table
/// (name -> value, looked up case-insensitively). Returns `None` the moment
/// any sub-expression is non-constant; the caller decides whether that's an
/// error.
pub fn fold(expr: &Expr, constants: &HashMap<String, ConstValue>) -> Option<ConstValue> {
    match expr {
        Expr::NumberLiteral(v) => {
            if v.fract() == 0.0 && v.is_finite() && v.abs() < (i64::MAX as f64) {
                Some(ConstValue::Int(*v as i64))
            } else {
                Some(ConstValue::Float(*v))
            }
        }
        Expr::StringLiteral(s) => Some(ConstValue::Str(s.clone())),
        Expr::Variable(name) => constants.get(&name.to_ascii_uppercase()).cloned(),
        Expr::Unary { op, expr } => {
            let v = fold(expr, constants)?;
            match op {
                UnaryOp::Plus => Some(v),
                UnaryOp::Neg => match v {
                    ConstValue::Int(i) => Some(ConstValue::Int(-i)),
                    ConstValue::Float(f) => Some(ConstValue::Float(-f)),
                    ConstValue::Str(_) => None,
                },
                UnaryOp::Not => {
                    let b = v.truthy()?;
                    Some(ConstValue::Int(if b { 0 } else { -1 }))
                }
            }
        }
        Expr::Binary { op, lhs, rhs } => fold_binary(*op, lhs, rhs, constants),
        Expr::Compare { op, lhs, rhs } => fold_compare(*op, lhs, rhs, constants),
        Expr::Call { name, args } => fold_call(name, args, constants),
        _ => None,
    }
}

fn fold_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    constants: &HashMap<String, ConstValue>,
) -> Option<ConstValue> {
    let l = fold(lhs, constants)?;
    let r = fold(rhs, constants)?;

    if op == BinOp::Add {
        if let (ConstValue::Str(a), ConstValue::Str(b)) = (&l, &r) {
            return Some(ConstValue::Str(format!("{a}{b}")));
        }
    }

    let both_int = matches!((&l, &r), (ConstValue::Int(_), ConstValue::Int(_)));
    let (lf, rf) = (l.as_f64()?, r.as_f64()?);

    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul if both_int => {
            let (li, ri) = match (&l, &r) {
                (ConstValue::Int(a), ConstValue::Int(b)) => (*a, *b),
                _ => unreachable!(),
            };
            Some(ConstValue::Int(match op {
                BinOp::Add => li + ri,
                BinOp::Sub => li - ri,
                BinOp::Mul => li * ri,
                _ => unreachable!(),
            }))
        }
        BinOp::Add => Some(ConstValue::Float(lf + rf)),
        BinOp::Sub => Some(ConstValue::Float(lf - rf)),
        BinOp::Mul => Some(ConstValue::Float(lf * rf)),
        BinOp::Div => Some(ConstValue::Float(lf / rf)),
        BinOp::Pow => Some(ConstValue::Float(lf.powf(rf))),
        BinOp::IntDiv => Some(ConstValue::Int((lf / rf).trunc() as i64)),
        BinOp::Mod => {
            if both_int {
                let (li, ri) = match (&l, &r) {
                    (ConstValue::Int(a), ConstValue::Int(b)) => (*a, *b),
                    _ => unreachable!(),
                };
                Some(ConstValue::Int(li % ri))
            } else {
                Some(ConstValue::Float(lf % rf))
            }
        }
        BinOp::And => Some(ConstValue::Int((li_trunc(lf) & li_trunc(rf)) as i64)),
        BinOp::Or => Some(ConstValue::Int((li_trunc(lf) | li_trunc(rf)) as i64)),
        BinOp::Xor => Some(ConstValue::Int((li_trunc(lf) ^ li_trunc(rf)) as i64)),
        BinOp::Imp => {
            let a = lf != 0.0;
            let b = rf != 0.0;
            Some(ConstValue::Int(if !a || b { -1 } else { 0 }))
        }
        BinOp::Eqv => {
            let a = lf != 0.0;
            let b = rf != 0.0;
            Some(ConstValue::Int(if a == b { -1 } else { 0 }))
        }
    }
}

fn li_trunc(f: f64) -> i64 {
    f as i64
}

fn fold_compare(
    op: CompareOp,
    lhs: &Expr,
    rhs: &Expr,
    constants: &HashMap<String, ConstValue>,
) -> Option<ConstValue> {
    let l = fold(lhs, constants)?;
    let r = fold(rhs, constants)?;
    let ordering = match (&l, &r) {
        (ConstValue::Str(a), ConstValue::Str(b)) => a.partial_cmp(b)?,
        _ => l.as_f64()?.partial_cmp(&r.as_f64()?)?,
    };
    let truth = match op {
        CompareOp::Eq => ordering == std::cmp::Ordering::Equal,
        CompareOp::Ne => ordering != std::cmp::Ordering::Equal,
        CompareOp::Lt => ordering == std::cmp::Ordering::Less,
        CompareOp::Le => ordering != std::cmp::Ordering::Greater,
        CompareOp::Gt => ordering == std::cmp::Ordering::Greater,
        CompareOp::Ge => ordering != std::cmp::Ordering::Less,
    };
    Some(ConstValue::Int(if truth { -1 } else { 0 }))
}

fn fold_call(
    name: &str,
    args: &[Expr],
    constants: &HashMap<String, ConstValue>,
) -> Option<ConstValue> {
    let upper = name.to_ascii_uppercase();
    if !BUILTIN_FNS.contains(&upper.as_str()) {
        return None;
    }
    let folded: Vec<ConstValue> = args
        .iter()
        .map(|a| fold(a, constants))
        .collect::<Option<Vec<_>>>()?;
    match upper.as_str() {
        "ABS" => match &folded[..] {
            [ConstValue::Int(i)] => Some(ConstValue::Int(i.abs())),
            [v] => Some(ConstValue::Float(v.as_f64()?.abs())),
            _ => None,
        },
        "SIN" => Some(ConstValue::Float(folded.first()?.as_f64()?.sin())),
        "COS" => Some(ConstValue::Float(folded.first()?.as_f64()?.cos())),
        "TAN" => Some(ConstValue::Float(folded.first()?.as_f64()?.tan())),
        "ATN" => Some(ConstValue::Float(folded.first()?.as_f64()?.atan())),
        "SQR" => Some(ConstValue::Float(folded.first()?.as_f64()?.sqrt())),
        "LOG" => Some(ConstValue::Float(folded.first()?.as_f64()?.ln())),
        "EXP" => Some(ConstValue::Float(folded.first()?.as_f64()?.exp())),
        "FIX" => Some(ConstValue::Int(folded.first()?.as_f64()?.trunc() as i64)),
        "INT" => Some(ConstValue::Int(folded.first()?.as_f64()?.floor() as i64)),
        "CINT" => Some(ConstValue::Int(folded.first()?.as_f64()?.round() as i64)),
        "SGN" => {
            let v = folded.first()?.as_f64()?;
            Some(ConstValue::Int(if v > 0.0 {
                1
            } else if v < 0.0 {
                -1
            } else {
                0
            }))
        }
        "LEN" => match folded.first()? {
            ConstValue::Str(s) => Some(ConstValue::Int(s.chars().count() as i64)),
            _ => None,
        },
        "MIN" => folded
            .iter()
            .map(|v| v.as_f64())
            .collect::<Option<Vec<_>>>()
            .and_then(|v| v.into_iter().reduce(f64::min))
            .map(ConstValue::Float),
        "MAX" => folded
            .iter()
            .map(|v| v.as_f64())
            .collect::<Option<Vec<_>>>()
            .and_then(|v| v.into_iter().reduce(f64::max))
            .map(ConstValue::Float),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> HashMap<String, ConstValue> {
        HashMap::new()
    }

    #[test]
    fn folds_integer_arithmetic_staying_integer() {
        let expr = Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::NumberLiteral(2.0)),
            rhs: Box::new(Expr::NumberLiteral(3.0)),
        };
        assert_eq!(fold(&expr, &empty()), Some(ConstValue::Int(5)));
    }

    #[test]
    fn division_promotes_to_float() {
        let expr = Expr::Binary {
            op: BinOp::Div,
            lhs: Box::new(Expr::NumberLiteral(7.0)),
            rhs: Box::new(Expr::NumberLiteral(2.0)),
        };
        assert_eq!(fold(&expr, &empty()), Some(ConstValue::Float(3.5)));
    }

    #[test]
    fn string_concat_with_plus() {
        let expr = Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::StringLiteral("foo".to_string())),
            rhs: Box::new(Expr::StringLiteral("bar".to_string())),
        };
        assert_eq!(fold(&expr, &empty()), Some(ConstValue::Str("foobar".to_string())));
    }

    #[test]
    fn comparisons_are_integer_valued() {
        let expr = Expr::Compare {
            op: CompareOp::Lt,
            lhs: Box::new(Expr::NumberLiteral(1.0)),
            rhs: Box::new(Expr::NumberLiteral(2.0)),
        };
        assert_eq!(fold(&expr, &empty()), Some(ConstValue::Int(-1)));
    }

    #[test]
    fn unknown_call_is_not_constant() {
        let expr = Expr::Call {
            name: "RND".to_string(),
            args: vec![],
        };
        assert_eq!(fold(&expr, &empty()), None);
    }

    #[test]
    fn constant_reference_resolves_case_insensitively() {
        let mut consts = HashMap::new();
        consts.insert("MAX_SIZE".to_string(), ConstValue::Int(100));
        let expr = Expr::Variable("max_size".to_string());
        assert_eq!(fold(&expr, &consts), Some(ConstValue::Int(100)));
    }

    #[test]
    fn builtin_function_call_folds() {
        let expr = Expr::Call {
            name: "ABS".to_string(),
            args: vec![Expr::NumberLiteral(-5.0)],
        };
        assert_eq!(fold(&expr, &empty()), Some(ConstValue::Int(5)));
    }
}
