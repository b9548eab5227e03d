//! Compile-time validation (§4.B "Validation"). Run once when a
//! ConstructScale is registered; failures here are `InvalidExpression`
//! and prevent the scale from being usable (§4.C "Failure semantics") —
//! they never surface during evaluation.

use std::collections::HashSet;

use crate::ast::{Expr, Program, Stmt};
use crate::lexer::Span;

const KNOWN_FUNCTIONS: &[&str] = &["abs", "sqrt", "round", "count_available", "sum", "mean", "min", "max"];
const RESERVED_WORDS: &[&str] = &[
    "null", "and", "or", "xor", "if", "then", "elif", "else", "abs", "sqrt", "round",
    "count_available", "sum", "mean", "min", "max",
];

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CompileError {
    #[error("{0}: unknown function '{1}'")]
    UnknownFunction(Span, String),
    #[error("{0}: item reference {{q{1}}} is not a member of this construct")]
    UnknownItemRef(Span, u32),
    #[error("{0}: '{1}' is a reserved word and cannot be assigned")]
    ReservedWordAssignment(Span, String),
    #[error("{0}: variable '{1}' used before it is assigned")]
    UseBeforeAssign(Span, String),
}

/// Validates a parsed program against the set of item numbers that belong
/// to the owning construct scale.
pub fn validate(program: &Program, valid_items: &HashSet<u32>) -> Result<(), CompileError> {
    let mut defined: HashSet<String> = HashSet::new();
    for stmt in &program.statements {
        match stmt {
            Stmt::Assign { name, value, span } => {
                if RESERVED_WORDS.contains(&name.as_str()) {
                    return Err(CompileError::ReservedWordAssignment(*span, name.clone()));
                }
                validate_expr(value, valid_items, &defined)?;
                defined.insert(name.clone());
            }
            Stmt::Expr(expr) => validate_expr(expr, valid_items, &defined)?,
        }
    }
    Ok(())
}

fn validate_expr(
    expr: &Expr,
    valid_items: &HashSet<u32>,
    defined: &HashSet<String>,
) -> Result<(), CompileError> {
    match expr {
        Expr::Number(_) | Expr::Null => Ok(()),
        Expr::ItemRef(n, span) => {
            if valid_items.contains(n) {
                Ok(())
            } else {
                Err(CompileError::UnknownItemRef(*span, *n))
            }
        }
        Expr::Var(name, span) => {
            if defined.contains(name) {
                Ok(())
            } else {
                Err(CompileError::UseBeforeAssign(*span, name.clone()))
            }
        }
        Expr::Neg(inner, _) => validate_expr(inner, valid_items, defined),
        Expr::Binary(_, lhs, rhs, _) | Expr::And(lhs, rhs, _) | Expr::Or(lhs, rhs, _) | Expr::Xor(lhs, rhs, _) => {
            validate_expr(lhs, valid_items, defined)?;
            validate_expr(rhs, valid_items, defined)
        }
        Expr::Call(name, args, span) => {
            if !KNOWN_FUNCTIONS.contains(&name.as_str()) {
                return Err(CompileError::UnknownFunction(*span, name.clone()));
            }
            for arg in args {
                validate_expr(arg, valid_items, defined)?;
            }
            Ok(())
        }
        Expr::If { arms, else_branch, .. } => {
            for (cond, branch) in arms {
                validate_expr(cond, valid_items, defined)?;
                validate_expr(branch, valid_items, defined)?;
            }
            validate_expr(else_branch, valid_items, defined)
        }
    }
}
