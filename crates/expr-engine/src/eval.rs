//! Pure, deterministic tree-walking evaluator.

use std::collections::HashMap;

use crate::ast::{BinOp, Expr, Program, Stmt};
use crate::lexer::Span;
use crate::value::Value;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum EvalError {
    #[error("{0}: unknown item reference {{q{1}}}")]
    UnknownItemRef(Span, u32),
    #[error("{0}: unknown variable '{1}'")]
    UnknownVar(Span, String),
    #[error("{0}: unknown function '{1}'")]
    UnknownFunction(Span, String),
    #[error("{0}: wrong number of arguments to '{1}'")]
    Arity(Span, String),
    #[error("{0}: type error: {1}")]
    TypeError(Span, String),
}

pub fn eval_program(
    program: &Program,
    items: &HashMap<u32, Value>,
) -> Result<Value, EvalError> {
    let mut vars: HashMap<String, Value> = HashMap::new();
    let mut last = Value::Null;
    for stmt in &program.statements {
        match stmt {
            Stmt::Assign { name, value, .. } => {
                let v = eval_expr(value, items, &vars)?;
                vars.insert(name.clone(), v);
                last = v;
            }
            Stmt::Expr(expr) => {
                last = eval_expr(expr, items, &vars)?;
            }
        }
    }
    Ok(last)
}

fn eval_expr(
    expr: &Expr,
    items: &HashMap<u32, Value>,
    vars: &HashMap<String, Value>,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Null => Ok(Value::Null),
        Expr::ItemRef(n, span) => Ok(*items.get(n).ok_or(EvalError::UnknownItemRef(*span, *n))?),
        Expr::Var(name, span) => {
            vars.get(name).copied().ok_or_else(|| EvalError::UnknownVar(*span, name.clone()))
        }
        Expr::Neg(inner, span) => {
            let v = eval_expr(inner, items, vars)?;
            match v {
                Value::Number(n) => Ok(Value::Number(-n)),
                Value::Null => Ok(Value::Null),
                Value::Bool(_) => Err(EvalError::TypeError(*span, "cannot negate a bool".into())),
            }
        }
        Expr::Binary(op, lhs, rhs, span) => {
            let l = eval_expr(lhs, items, vars)?;
            let r = eval_expr(rhs, items, vars)?;
            eval_binary(*op, l, r, *span)
        }
        Expr::And(lhs, rhs, span) => {
            let l = eval_expr(lhs, items, vars)?;
            let l_bool = l.truthy().ok_or_else(|| {
                EvalError::TypeError(*span, "'and' requires a boolean or null operand".into())
            })?;
            if !l_bool {
                return Ok(Value::Bool(false));
            }
            let r = eval_expr(rhs, items, vars)?;
            let r_bool = r.truthy().ok_or_else(|| {
                EvalError::TypeError(*span, "'and' requires a boolean or null operand".into())
            })?;
            Ok(Value::Bool(r_bool))
        }
        Expr::Or(lhs, rhs, span) => {
            let l = eval_expr(lhs, items, vars)?;
            let l_bool = l.truthy().ok_or_else(|| {
                EvalError::TypeError(*span, "'or' requires a boolean or null operand".into())
            })?;
            if l_bool {
                return Ok(Value::Bool(true));
            }
            let r = eval_expr(rhs, items, vars)?;
            let r_bool = r.truthy().ok_or_else(|| {
                EvalError::TypeError(*span, "'or' requires a boolean or null operand".into())
            })?;
            Ok(Value::Bool(r_bool))
        }
        Expr::Xor(lhs, rhs, span) => {
            // strict: both sides always evaluated, no short-circuit
            let l = eval_expr(lhs, items, vars)?;
            let r = eval_expr(rhs, items, vars)?;
            let l_bool = l.truthy().ok_or_else(|| {
                EvalError::TypeError(*span, "'xor' requires a boolean or null operand".into())
            })?;
            let r_bool = r.truthy().ok_or_else(|| {
                EvalError::TypeError(*span, "'xor' requires a boolean or null operand".into())
            })?;
            Ok(Value::Bool(l_bool ^ r_bool))
        }
        Expr::Call(name, args, span) => eval_call(name, args, items, vars, *span),
        Expr::If { arms, else_branch, span } => {
            for (cond, branch) in arms {
                let c = eval_expr(cond, items, vars)?;
                let truthy = c.truthy().ok_or_else(|| {
                    EvalError::TypeError(*span, "if condition must be boolean or null".into())
                })?;
                if truthy {
                    return eval_expr(branch, items, vars);
                }
            }
            eval_expr(else_branch, items, vars)
        }
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value, span: Span) -> Result<Value, EvalError> {
    use BinOp::*;
    if matches!(op, Eq | Ne) {
        return eval_equality(op, l, r, span);
    }
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let (ln, rn) = (
        l.as_number().ok_or_else(|| EvalError::TypeError(span, "expected a number".into()))?,
        r.as_number().ok_or_else(|| EvalError::TypeError(span, "expected a number".into()))?,
    );
    match op {
        Add => Ok(Value::Number(ln + rn)),
        Sub => Ok(Value::Number(ln - rn)),
        Mul => Ok(Value::Number(ln * rn)),
        Div => {
            if rn == 0.0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Number(ln / rn))
            }
        }
        Pow => {
            let result = ln.powf(rn);
            if result.is_finite() {
                Ok(Value::Number(result))
            } else {
                Ok(Value::Null)
            }
        }
        Gt => Ok(Value::Bool(ln > rn)),
        Lt => Ok(Value::Bool(ln < rn)),
        Ge => Ok(Value::Bool(ln >= rn)),
        Le => Ok(Value::Bool(ln <= rn)),
        Eq | Ne => unreachable!("handled above"),
    }
}

fn eval_equality(op: BinOp, l: Value, r: Value, span: Span) -> Result<Value, EvalError> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let result = match (l, r) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => {
            return Err(EvalError::TypeError(
                span,
                "cannot compare values of different types".into(),
            ))
        }
    };
    Ok(Value::Bool(if op == BinOp::Eq { result } else { !result }))
}

fn eval_call(
    name: &str,
    args: &[Expr],
    items: &HashMap<u32, Value>,
    vars: &HashMap<String, Value>,
    span: Span,
) -> Result<Value, EvalError> {
    let values: Result<Vec<Value>, EvalError> =
        args.iter().map(|a| eval_expr(a, items, vars)).collect();
    let values = values?;

    let unary = |f: fn(f64) -> Option<f64>| -> Result<Value, EvalError> {
        if values.len() != 1 {
            return Err(EvalError::Arity(span, name.to_string()));
        }
        match values[0] {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => Ok(match f(n) {
                Some(v) => Value::Number(v),
                None => Value::Null,
            }),
            Value::Bool(_) => Err(EvalError::TypeError(span, "expected a number".into())),
        }
    };

    match name {
        "abs" => unary(|n| Some(n.abs())),
        "sqrt" => unary(|n| if n < 0.0 { None } else { Some(n.sqrt()) }),
        "round" => unary(|n| Some(round_half_to_even(n))),
        "count_available" => {
            let count = values.iter().filter(|v| !v.is_null()).count();
            Ok(Value::Number(count as f64))
        }
        "sum" => {
            if values.is_empty() {
                return Err(EvalError::Arity(span, name.to_string()));
            }
            fold_non_null(&values, span, 0.0, |acc, n| acc + n).map(|opt| opt.unwrap_or(Value::Null))
        }
        "mean" => {
            if values.is_empty() {
                return Err(EvalError::Arity(span, name.to_string()));
            }
            let nums = numbers_or_err(&values, span)?;
            let present: Vec<f64> = nums.into_iter().flatten().collect();
            if present.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Number(present.iter().sum::<f64>() / present.len() as f64))
            }
        }
        "min" => reduce_non_null(&values, span, f64::min),
        "max" => reduce_non_null(&values, span, f64::max),
        other => Err(EvalError::UnknownFunction(span, other.to_string())),
    }
}

fn numbers_or_err(values: &[Value], span: Span) -> Result<Vec<Option<f64>>, EvalError> {
    values
        .iter()
        .map(|v| match v {
            Value::Number(n) => Ok(Some(*n)),
            Value::Null => Ok(None),
            Value::Bool(_) => Err(EvalError::TypeError(span, "expected a number".into())),
        })
        .collect()
}

fn fold_non_null(
    values: &[Value],
    span: Span,
    init: f64,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Option<Value>, EvalError> {
    let nums = numbers_or_err(values, span)?;
    let present: Vec<f64> = nums.into_iter().flatten().collect();
    if present.is_empty() {
        return Ok(Some(Value::Null));
    }
    Ok(Some(Value::Number(present.into_iter().fold(init, f))))
}

fn reduce_non_null(
    values: &[Value],
    span: Span,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let nums = numbers_or_err(values, span)?;
    let mut present = nums.into_iter().flatten();
    match present.next() {
        None => Ok(Value::Null),
        Some(first) => Ok(Value::Number(present.fold(first, f))),
    }
}

/// Round half to even ("banker's rounding"), per §4.B.
fn round_half_to_even(n: f64) -> f64 {
    let floor = n.floor();
    let diff = n - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_half_to_even_ties() {
        assert_eq!(round_half_to_even(0.5), 0.0);
        assert_eq!(round_half_to_even(1.5), 2.0);
        assert_eq!(round_half_to_even(2.5), 2.0);
        assert_eq!(round_half_to_even(-0.5), 0.0);
        assert_eq!(round_half_to_even(-1.5), -2.0);
    }
}
