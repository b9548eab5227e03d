//! Construct-scoring expression language: lexer, parser, AST, compile-time
//! validator, and a pure deterministic evaluator (§4.B).

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod validate;
pub mod value;

use std::collections::{HashMap, HashSet};

pub use ast::Program;
pub use eval::EvalError;
pub use lexer::Span;
pub use validate::CompileError;
pub use value::Value;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CompileOrParseError {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Validate(#[from] CompileError),
}

/// A construct-scoring equation that has been parsed and validated
/// against its owning construct's item set. Validation happens once, at
/// registration time; `evaluate` is pure and never fails to compile.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    program: Program,
}

impl CompiledExpression {
    /// Parses and validates `source` against `valid_items` (the item
    /// numbers belonging to the owning ConstructScale). Any failure here
    /// is a definition-time `InvalidExpression` (§4.C).
    pub fn compile(
        source: &str,
        valid_items: &HashSet<u32>,
    ) -> Result<Self, CompileOrParseError> {
        let tokens = lexer::lex(source)?;
        let program = parser::parse(tokens)?;
        validate::validate(&program, valid_items)?;
        Ok(Self { program })
    }

    /// Evaluates the program against a mapping from item number to typed
    /// value. Pure and deterministic (§8 property 2): repeated calls with
    /// the same `items` yield identical results.
    pub fn evaluate(&self, items: &HashMap<u32, Value>) -> Result<Value, EvalError> {
        eval::eval_program(&self.program, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(vals: &[(u32, Option<f64>)]) -> HashMap<u32, Value> {
        vals.iter()
            .map(|(n, v)| (*n, v.map(Value::Number).unwrap_or(Value::Null)))
            .collect()
    }

    #[test]
    fn scenario_1_mean_over_available() {
        let valid: HashSet<u32> = [1, 2, 3, 4].into_iter().collect();
        let expr = CompiledExpression::compile(
            "sum(q1,q2,q3,q4) / count_available(q1,q2,q3,q4)",
            &valid,
        )
        .unwrap_err();
        // {qN} syntax requires braces; bare `q1` parses as an undefined variable.
        assert!(matches!(expr, CompileOrParseError::Validate(CompileError::UseBeforeAssign(_, _))));

        let expr = CompiledExpression::compile(
            "sum({q1},{q2},{q3},{q4}) / count_available({q1},{q2},{q3},{q4})",
            &valid,
        )
        .unwrap();
        let inputs = items(&[(1, Some(4.0)), (2, Some(5.0)), (3, Some(4.0)), (4, None)]);
        let result = expr.evaluate(&inputs).unwrap();
        match result {
            Value::Number(n) => assert!((n - 4.333333333333333).abs() < 1e-9),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn plain_sum_division_propagates_null() {
        let valid: HashSet<u32> = [1, 2, 3, 4].into_iter().collect();
        let expr = CompiledExpression::compile("({q1}+{q2}+{q3}+{q4})/4", &valid).unwrap();
        let inputs = items(&[(1, Some(4.0)), (2, Some(5.0)), (3, Some(4.0)), (4, None)]);
        assert_eq!(expr.evaluate(&inputs).unwrap(), Value::Null);
    }

    #[test]
    fn if_then_elif_else() {
        let valid: HashSet<u32> = [1].into_iter().collect();
        let expr = CompiledExpression::compile(
            "if {q1} > 3 then 1 elif {q1} == 3 then 0 else -1",
            &valid,
        )
        .unwrap();
        assert_eq!(expr.evaluate(&items(&[(1, Some(4.0))])).unwrap(), Value::Number(1.0));
        assert_eq!(expr.evaluate(&items(&[(1, Some(3.0))])).unwrap(), Value::Number(0.0));
        assert_eq!(expr.evaluate(&items(&[(1, Some(2.0))])).unwrap(), Value::Number(-1.0));
    }

    #[test]
    fn null_condition_treated_as_false() {
        let valid: HashSet<u32> = [1].into_iter().collect();
        let expr = CompiledExpression::compile("if {q1} > 3 then 1 else 2", &valid).unwrap();
        assert_eq!(expr.evaluate(&items(&[(1, None)])).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn assignments_and_multi_statement_program() {
        let valid: HashSet<u32> = [1, 2].into_iter().collect();
        let expr = CompiledExpression::compile("x = {q1} + {q2}\ny = x / 2\ny", &valid).unwrap();
        let inputs = items(&[(1, Some(2.0)), (2, Some(4.0))]);
        assert_eq!(expr.evaluate(&inputs).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn use_before_assign_rejected() {
        let valid: HashSet<u32> = [1].into_iter().collect();
        let err = CompiledExpression::compile("y = x + 1\nx = {q1}", &valid).unwrap_err();
        assert!(matches!(err, CompileOrParseError::Validate(CompileError::UseBeforeAssign(_, _))));
    }

    #[test]
    fn unknown_item_ref_rejected() {
        let valid: HashSet<u32> = [1].into_iter().collect();
        let err = CompiledExpression::compile("{q2} + 1", &valid).unwrap_err();
        assert!(matches!(err, CompileOrParseError::Validate(CompileError::UnknownItemRef(_, 2))));
    }

    #[test]
    fn unknown_function_rejected() {
        let valid: HashSet<u32> = [1].into_iter().collect();
        let err = CompiledExpression::compile("bogus({q1})", &valid).unwrap_err();
        assert!(matches!(err, CompileOrParseError::Validate(CompileError::UnknownFunction(_, _))));
    }

    #[test]
    fn reserved_word_assignment_rejected() {
        let valid: HashSet<u32> = [1].into_iter().collect();
        let err = CompiledExpression::compile("sum = {q1}", &valid).unwrap_err();
        assert!(matches!(
            err,
            CompileOrParseError::Validate(CompileError::ReservedWordAssignment(_, _))
        ));
    }

    #[test]
    fn power_is_right_associative() {
        let valid: HashSet<u32> = HashSet::new();
        let expr = CompiledExpression::compile("2 ^ 3 ^ 2", &valid).unwrap();
        // right-assoc: 2 ^ (3 ^ 2) = 2^9 = 512, not (2^3)^2 = 64
        assert_eq!(expr.evaluate(&HashMap::new()).unwrap(), Value::Number(512.0));
    }

    #[test]
    fn pow_out_of_domain_is_null() {
        let valid: HashSet<u32> = [1, 2].into_iter().collect();
        let expr = CompiledExpression::compile("{q1} ^ {q2}", &valid).unwrap();
        // a negative base with a fractional exponent has no real result
        let inputs = items(&[(1, Some(-8.0)), (2, Some(0.5))]);
        assert_eq!(expr.evaluate(&inputs).unwrap(), Value::Null);
    }

    #[test]
    fn xor_is_strict_not_short_circuit() {
        let valid: HashSet<u32> = [1].into_iter().collect();
        // both arms reference the same var; xor must evaluate both sides
        let expr = CompiledExpression::compile("({q1} > 0) xor ({q1} > 10)", &valid).unwrap();
        assert_eq!(expr.evaluate(&items(&[(1, Some(5.0))])).unwrap(), Value::Bool(true));
        assert_eq!(expr.evaluate(&items(&[(1, Some(20.0))])).unwrap(), Value::Bool(false));
    }

    #[test]
    fn deterministic_repeated_evaluation() {
        let valid: HashSet<u32> = [1, 2].into_iter().collect();
        let expr = CompiledExpression::compile("({q1}+{q2})/2", &valid).unwrap();
        let inputs = items(&[(1, Some(3.0)), (2, Some(7.0))]);
        let a = expr.evaluate(&inputs).unwrap();
        let b = expr.evaluate(&inputs).unwrap();
        assert_eq!(a, b);
    }
}
