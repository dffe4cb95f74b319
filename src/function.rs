use std::fmt;
use std::sync::Arc;

use crate::error::SyntaxError;
use crate::evaluator::{CompiledCall, Context};
use crate::formula::build_term;
use crate::parse::Expr;
use crate::rewrite::{PROTECT, UNPROTECT};
use crate::term::Term;

/// A call outside the formula language, lifted into a term and evaluated
/// element-wise.
///
/// Each distinct identifier in the call becomes a placeholder argument;
/// each distinct `unprotect(...)` sub-expression becomes an argument
/// holding the formula term built from it. The body is compiled once
/// against those arguments.
#[derive(Clone)]
pub struct FunctionCall {
    original: Expr,
    args: Vec<Term>,
    unprotected: Vec<bool>,
    program: Arc<CompiledCall>,
}

impl FunctionCall {
    pub fn capture(original: Expr) -> Result<FunctionCall, SyntaxError> {
        let body = match &original {
            Expr::Call { head, args } if head == PROTECT && args.len() == 1 => args[0].clone(),
            other => other.clone(),
        };
        let mut context = Context::new();
        let mut args = Vec::new();
        let mut unprotected = Vec::new();
        collect_args(&body, &mut context, &mut args, &mut unprotected)?;
        let program = Arc::new(context.compile(&body));
        Ok(FunctionCall {
            original,
            args,
            unprotected,
            program,
        })
    }

    /// The call as written.
    pub fn original(&self) -> &Expr {
        &self.original
    }

    pub fn head(&self) -> &str {
        self.original.head().unwrap_or("")
    }

    pub fn args(&self) -> &[Term] {
        &self.args
    }

    /// Whether argument `slot` came from `unprotect(...)` and so stands
    /// for a formula term rather than a host value.
    pub fn is_unprotected(&self, slot: usize) -> bool {
        self.unprotected.get(slot).copied().unwrap_or(false)
    }

    pub fn program(&self) -> &CompiledCall {
        &self.program
    }

    /// The same call over different (typically resolved) arguments.
    pub fn with_args(&self, args: Vec<Term>) -> FunctionCall {
        FunctionCall {
            original: self.original.clone(),
            args,
            unprotected: self.unprotected.clone(),
            program: Arc::clone(&self.program),
        }
    }
}

fn collect_args(
    expr: &Expr,
    context: &mut Context,
    args: &mut Vec<Term>,
    unprotected: &mut Vec<bool>,
) -> Result<(), SyntaxError> {
    match expr {
        Expr::Number(_) => {}
        Expr::Ident(name) => {
            if context.define_var(name) == args.len() {
                args.push(Term::Placeholder(name.clone()));
                unprotected.push(false);
            }
        }
        Expr::Call { head, args: inner } if head == UNPROTECT && inner.len() == 1 => {
            let label = inner[0].to_string();
            if context.define_var(&label) == args.len() {
                args.push(build_term(&inner[0])?);
                unprotected.push(true);
            }
        }
        Expr::Call { args: inner, .. } => {
            for arg in inner {
                collect_args(arg, context, args, unprotected)?;
            }
        }
    }
    Ok(())
}

impl PartialEq for FunctionCall {
    fn eq(&self, other: &FunctionCall) -> bool {
        self.original == other.original && self.args == other.args
    }
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("original", &self.original.to_string())
            .field("args", &self.args)
            .finish()
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use crate::rewrite::rewrite;

    fn capture(src: &str) -> FunctionCall {
        FunctionCall::capture(rewrite(parse(src).unwrap()).unwrap()).unwrap()
    }

    #[test]
    fn test_identifiers_become_arguments_once() {
        let f = capture("log(x + x * y)");
        assert_eq!(f.args(), &[Term::placeholder("x"), Term::placeholder("y")]);
        assert_eq!(f.program().variables(), &["x".to_string(), "y".to_string()]);
        assert_eq!(f.head(), "log");
    }

    #[test]
    fn test_protect_body_is_evaluated() {
        let f = capture("protect(a * b)");
        assert_eq!(f.to_string(), "protect(a * b)");
        assert_eq!(f.args().len(), 2);
        assert!(f.program().unknown_functions().is_empty());
    }

    #[test]
    fn test_unprotected_argument_is_a_term() {
        let f = capture("sqrt(unprotect(a & b))");
        assert_eq!(
            f.args(),
            &[Term::Interaction(vec![Term::placeholder("a"), Term::placeholder("b")])]
        );
        assert!(f.is_unprotected(0));
        let f = capture("exp(x + unprotect(a))");
        assert_eq!(f.args(), &[Term::placeholder("x"), Term::placeholder("a")]);
        assert!(!f.is_unprotected(0));
        assert!(f.is_unprotected(1));
    }
}
