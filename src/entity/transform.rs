//! Restricted per-signal transform expressions (`spec.md` §9 Design Notes).
//!
//! The reference implementation evaluates inline source-language
//! expressions; this port replaces that with a small, closed AST —
//! arithmetic, comparison, conditional, and field lookup only — so there
//! is never dynamic code evaluation. Transforms are pure, total functions
//! over a decoded message's signal map.

use std::collections::HashMap;

use serde::Deserialize;

use crate::decode::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expression {
    Field { name: String },
    Const { value: f64 },
    Add { left: Box<Expression>, right: Box<Expression> },
    Sub { left: Box<Expression>, right: Box<Expression> },
    Mul { left: Box<Expression>, right: Box<Expression> },
    Div { left: Box<Expression>, right: Box<Expression> },
    Eq { left: Box<Expression>, right: Box<Expression> },
    Ne { left: Box<Expression>, right: Box<Expression> },
    Lt { left: Box<Expression>, right: Box<Expression> },
    Le { left: Box<Expression>, right: Box<Expression> },
    Gt { left: Box<Expression>, right: Box<Expression> },
    Ge { left: Box<Expression>, right: Box<Expression> },
    If {
        cond: Box<Expression>,
        then: Box<Expression>,
        #[serde(rename = "else")]
        else_: Box<Expression>,
    },
}

impl Expression {
    /// Evaluate against a decoded message's signal map. Returns `None`
    /// only when a referenced field is absent; all other operators are
    /// total over `f64`.
    pub fn eval(&self, signals: &HashMap<String, Value>) -> Option<f64> {
        match self {
            Expression::Field { name } => signals.get(name).and_then(Value::as_f64),
            Expression::Const { value } => Some(*value),
            Expression::Add { left, right } => Some(left.eval(signals)? + right.eval(signals)?),
            Expression::Sub { left, right } => Some(left.eval(signals)? - right.eval(signals)?),
            Expression::Mul { left, right } => Some(left.eval(signals)? * right.eval(signals)?),
            Expression::Div { left, right } => {
                let r = right.eval(signals)?;
                if r == 0.0 {
                    None
                } else {
                    Some(left.eval(signals)? / r)
                }
            }
            Expression::Eq { left, right } => bool_to_f64(left.eval(signals)? == right.eval(signals)?),
            Expression::Ne { left, right } => bool_to_f64(left.eval(signals)? != right.eval(signals)?),
            Expression::Lt { left, right } => bool_to_f64(left.eval(signals)? < right.eval(signals)?),
            Expression::Le { left, right } => bool_to_f64(left.eval(signals)? <= right.eval(signals)?),
            Expression::Gt { left, right } => bool_to_f64(left.eval(signals)? > right.eval(signals)?),
            Expression::Ge { left, right } => bool_to_f64(left.eval(signals)? >= right.eval(signals)?),
            Expression::If { cond, then, else_ } => {
                if cond.eval(signals)? != 0.0 {
                    then.eval(signals)
                } else {
                    else_.eval(signals)
                }
            }
        }
    }
}

fn bool_to_f64(b: bool) -> Option<f64> {
    Some(if b { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn field_lookup() {
        let expr = Expression::Field { name: "a".into() };
        let sigs = signals(&[("a", Value::Integer(5))]);
        assert_eq!(expr.eval(&sigs), Some(5.0));
    }

    #[test]
    fn arithmetic_and_conditional() {
        // if a > 10 then a * 2 else 0
        let expr = Expression::If {
            cond: Box::new(Expression::Gt {
                left: Box::new(Expression::Field { name: "a".into() }),
                right: Box::new(Expression::Const { value: 10.0 }),
            }),
            then: Box::new(Expression::Mul {
                left: Box::new(Expression::Field { name: "a".into() }),
                right: Box::new(Expression::Const { value: 2.0 }),
            }),
            else_: Box::new(Expression::Const { value: 0.0 }),
        };
        let sigs = signals(&[("a", Value::Integer(20))]);
        assert_eq!(expr.eval(&sigs), Some(40.0));
        let sigs_low = signals(&[("a", Value::Integer(1))]);
        assert_eq!(expr.eval(&sigs_low), Some(0.0));
    }

    #[test]
    fn missing_field_is_none_not_panic() {
        let expr = Expression::Field { name: "missing".into() };
        assert_eq!(expr.eval(&HashMap::new()), None);
    }

    #[test]
    fn division_by_zero_is_none() {
        let expr = Expression::Div {
            left: Box::new(Expression::Const { value: 1.0 }),
            right: Box::new(Expression::Const { value: 0.0 }),
        };
        assert_eq!(expr.eval(&HashMap::new()), None);
    }
}
