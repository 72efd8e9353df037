use crate::context::Context;
use crate::error::MetaError;
use crate::types::{ArithOp, Expr, Value};

/// Failure of an expression: either its own (wrapped by the caller with the
/// expression text) or a nested engine error passed through unchanged.
#[derive(Debug)]
pub(crate) enum EvalError {
    Failed(String),
    Meta(MetaError),
}

impl From<MetaError> for EvalError {
    fn from(e: MetaError) -> Self {
        EvalError::Meta(e)
    }
}

/// Evaluate an expression with `context` as the receiver.
pub(crate) fn evaluate(expr: &Expr, context: &mut Context) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(context.resolve_path(segments)?),
        Expr::Index { target, index } => {
            let target = evaluate(target, context)?;
            let index = evaluate(index, context)?;
            let item = match (&target, &index) {
                (Value::Object(object), Value::String(name)) => {
                    object.get().field(name).unwrap_or_default()
                }
                (Value::Map(map), Value::String(key)) => map.get(key).cloned().unwrap_or_default(),
                (Value::List(items), Value::Int(i)) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
                _ => Value::Null,
            };
            Ok(context.resolve_value(item)?)
        }
        Expr::Compare { lhs, op, rhs } => {
            let lhs = evaluate(lhs, context)?;
            let rhs = evaluate(rhs, context)?;
            Ok(Value::Bool(lhs.compare(*op, &rhs).unwrap_or(false)))
        }
        Expr::Arith { lhs, op, rhs } => {
            let lhs = evaluate(lhs, context)?;
            let rhs = evaluate(rhs, context)?;
            arith(*op, &lhs, &rhs)
        }
        Expr::Neg(inner) => match evaluate(inner, context)? {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::Failed("integer overflow".to_owned())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(EvalError::Failed(format!("cannot negate {other}"))),
        },
        Expr::And(a, b) => {
            if !evaluate(a, context)?.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(evaluate(b, context)?.truthy()))
        }
        Expr::Or(a, b) => {
            if evaluate(a, context)?.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(evaluate(b, context)?.truthy()))
        }
        Expr::Not(inner) => Ok(Value::Bool(!evaluate(inner, context)?.truthy())),
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if evaluate(condition, context)?.truthy() {
                evaluate(then, context)
            } else {
                evaluate(otherwise, context)
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::String(_), _) | (_, Value::String(_)) if op == ArithOp::Add => {
            Ok(Value::String(format!("{}{}", text(lhs), text(rhs))))
        }
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
                ArithOp::Div | ArithOp::Rem if *b == 0 => {
                    return Err(EvalError::Failed("division by zero".to_owned()));
                }
                ArithOp::Div => a.checked_div(*b),
                ArithOp::Rem => a.checked_rem(*b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| EvalError::Failed("integer overflow".to_owned()))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let as_float = |v: &Value| match v {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                _ => f64::NAN,
            };
            let (a, b) = (as_float(lhs), as_float(rhs));
            Ok(Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Rem => a % b,
            }))
        }
        _ => Err(EvalError::Failed(format!("cannot apply {op} to {lhs} and {rhs}"))),
    }
}

/// Unquoted text for string concatenation.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parse::parse_expression;
    use crate::Meta;

    fn eval_in(ctx: &mut Context, source: &str) -> Result<Value, EvalError> {
        let expr = parse_expression(source).unwrap();
        evaluate(&expr, ctx)
    }

    fn context() -> Context {
        let meta = Meta::builder().build().unwrap();
        let mut ctx = Context::new(Arc::clone(&meta));
        ctx.set("a", 6_i64).unwrap();
        ctx.set("b", 4_i64).unwrap();
        ctx.set("name", "Ada").unwrap();
        ctx
    }

    #[test]
    fn arithmetic_and_comparison() {
        let mut ctx = context();
        assert_eq!(eval_in(&mut ctx, "a + b * 2").unwrap(), Value::Int(14));
        assert_eq!(eval_in(&mut ctx, "(a + b) * 2").unwrap(), Value::Int(20));
        assert_eq!(eval_in(&mut ctx, "a % b").unwrap(), Value::Int(2));
        assert_eq!(eval_in(&mut ctx, "a / 4.0").unwrap(), Value::Float(1.5));
        assert_eq!(eval_in(&mut ctx, "a > b && b >= 4").unwrap(), Value::Bool(true));
        assert_eq!(eval_in(&mut ctx, "-a").unwrap(), Value::Int(-6));
    }

    #[test]
    fn strings_concatenate() {
        let mut ctx = context();
        assert_eq!(
            eval_in(&mut ctx, "\"Hi \" + name + \"!\"").unwrap(),
            Value::from("Hi Ada!")
        );
    }

    #[test]
    fn unset_paths_are_null() {
        let mut ctx = context();
        assert_eq!(eval_in(&mut ctx, "missing").unwrap(), Value::Null);
        assert_eq!(eval_in(&mut ctx, "missing == null").unwrap(), Value::Bool(true));
        assert_eq!(eval_in(&mut ctx, "!missing").unwrap(), Value::Bool(true));
    }

    #[test]
    fn conditional() {
        let mut ctx = context();
        assert_eq!(
            eval_in(&mut ctx, "a > 5 ? \"big\" : \"small\"").unwrap(),
            Value::from("big")
        );
    }

    #[test]
    fn division_by_zero_fails() {
        let mut ctx = context();
        assert!(matches!(
            eval_in(&mut ctx, "a / (b - 4)"),
            Err(EvalError::Failed(msg)) if msg == "division by zero"
        ));
    }

    #[test]
    fn type_errors_fail() {
        let mut ctx = context();
        assert!(matches!(eval_in(&mut ctx, "a - name"), Err(EvalError::Failed(_))));
    }
}
