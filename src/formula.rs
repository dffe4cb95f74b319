use std::fmt;
use std::str::FromStr;

use crate::error::SyntaxError;
use crate::function::FunctionCall;
use crate::parse::{parse, Expr};
use crate::rewrite::{rewrite, PROTECT, UNPROTECT};
use crate::term::Term;

/// A response paired with its predictors: `lhs ~ rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub lhs: Term,
    pub rhs: Term,
}

impl Formula {
    pub fn new(lhs: Term, rhs: Term) -> Formula {
        Formula { lhs, rhs }
    }

    /// Parse, rewrite and build a formula from source text.
    pub fn parse(src: &str) -> Result<Formula, SyntaxError> {
        build_formula(&rewrite(parse(src)?)?)
    }

    pub fn has_intercept(&self) -> bool {
        self.rhs.has_intercept()
    }

    pub fn omits_intercept(&self) -> bool {
        self.rhs.omits_intercept()
    }

    pub fn termvars(&self) -> Vec<String> {
        let mut vars = self.lhs.termvars();
        for v in self.rhs.termvars() {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
        vars
    }

    /// The formula as a single term, e.g. for schema computation.
    pub fn to_term(&self) -> Term {
        Term::Formula(Box::new(self.clone()))
    }
}

impl FromStr for Formula {
    type Err = SyntaxError;

    fn from_str(src: &str) -> Result<Formula, SyntaxError> {
        Formula::parse(src)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ~ {}", self.lhs, self.rhs)
    }
}

/// Build a formula from a rewritten `~` expression.
pub fn build_formula(expr: &Expr) -> Result<Formula, SyntaxError> {
    match expr {
        Expr::Call { head, args } if head == "~" => {
            if args.len() != 2 {
                return Err(SyntaxError::Arity {
                    head: head.clone(),
                    expected: 2,
                    found: args.len(),
                });
            }
            Ok(Formula::new(build_term(&args[0])?, build_term(&args[1])?))
        }
        other => Err(SyntaxError::MissingTilde(other.to_string())),
    }
}

/// Build the term for a rewritten formula fragment (no `~`).
pub fn build_term(expr: &Expr) -> Result<Term, SyntaxError> {
    match expr {
        Expr::Number(n) => {
            if *n == 1.0 || *n == 0.0 || *n == -1.0 {
                Ok(Term::Constant(*n))
            } else {
                Err(SyntaxError::InvalidLiteral(*n))
            }
        }
        Expr::Ident(name) => Ok(Term::Placeholder(name.clone())),
        Expr::Call { head, args } => match head.as_str() {
            "+" => Ok(Term::union(build_all(args)?)),
            "&" => Ok(Term::interact(build_all(args)?)),
            "*" => {
                let mut terms = build_all(args)?.into_iter();
                let first = terms.next().unwrap_or(Term::Constant(1.0));
                Ok(terms.fold(first, |acc, next| {
                    Term::union(vec![acc.clone(), next.clone(), Term::interact(vec![acc, next])])
                }))
            }
            "-" if args.len() == 2 => match &args[1] {
                Expr::Number(n) if *n == 1.0 => {
                    Ok(Term::union(vec![build_term(&args[0])?, Term::Constant(-1.0)]))
                }
                _ => Err(SyntaxError::InvalidSubtraction(expr.to_string())),
            },
            "~" => Err(SyntaxError::NestedTilde(expr.to_string())),
            UNPROTECT if args.len() == 1 => build_term(&args[0]),
            PROTECT if args.len() != 1 => Err(SyntaxError::Arity {
                head: head.clone(),
                expected: 1,
                found: args.len(),
            }),
            _ => Ok(Term::Function(FunctionCall::capture(expr.clone())?)),
        },
    }
}

fn build_all(args: &[Expr]) -> Result<Vec<Term>, SyntaxError> {
    args.iter().map(build_term).collect()
}

/// Parse a formula fragment such as `a * b` into its term.
pub fn term(src: &str) -> Result<Term, SyntaxError> {
    build_term(&rewrite(parse(src)?)?)
}
