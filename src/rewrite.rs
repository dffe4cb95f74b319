//! Canonicalization of surface syntax.
//!
//! Formula operator nodes (`+`, `&`, `*`, `~`) are rewritten depth first:
//! each argument is rewritten before the rules are tried against it, and
//! the same argument is re-examined whenever a rule fires, until nothing
//! applies. Once every argument is done, literal `1`s are dropped from
//! interactions and the argument list is sorted by degree.
//!
//! Arguments of any other call are host expressions: their operators are
//! arithmetic and left alone, except inside `unprotect(...)`.

use std::mem;

use tracing::{trace, warn};

use crate::error::SyntaxError;
use crate::parse::Expr;

pub const PROTECT: &str = "protect";
pub const UNPROTECT: &str = "unprotect";

/// Heads treated as formula operators in unprotected positions.
pub fn is_special(head: &str) -> bool {
    matches!(head, "+" | "&" | "*" | "~")
}

/// Whether `+ & * ~` are formula operators at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Unprotected,
    Protected,
}

/// Rewriting state carried down the tree. `in_call` records that some
/// enclosing non-formula call exists, which is where `unprotect` is
/// allowed.
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext {
    pub protection: Protection,
    pub in_call: bool,
    pub root: bool,
}

impl RewriteContext {
    pub fn top() -> Self {
        RewriteContext {
            protection: Protection::Unprotected,
            in_call: false,
            root: true,
        }
    }

    fn child(self) -> Self {
        RewriteContext { root: false, ..self }
    }

    fn protected(self) -> Self {
        RewriteContext {
            protection: Protection::Protected,
            in_call: true,
            root: false,
        }
    }

    fn unprotected(self) -> Self {
        RewriteContext {
            protection: Protection::Unprotected,
            root: false,
            ..self
        }
    }
}

#[derive(Debug)]
enum Rule {
    Star,
    Associative,
    Distributive,
    Subtraction,
}

/// Rewrite a parsed formula (or formula fragment) into canonical form.
pub fn rewrite(expr: Expr) -> Result<Expr, SyntaxError> {
    rewrite_in(expr, RewriteContext::top())
}

pub fn rewrite_in(expr: Expr, ctx: RewriteContext) -> Result<Expr, SyntaxError> {
    match expr {
        Expr::Call { head, args } => {
            if ctx.protection == Protection::Unprotected && is_special(&head) {
                rewrite_special(head, args, ctx)
            } else if head == UNPROTECT {
                if !ctx.in_call {
                    return Err(SyntaxError::MisplacedUnprotect(
                        Expr::call(head, args).to_string(),
                    ));
                }
                let args = wrapper_argument(&head, args)?;
                let inner = rewrite_in(args, ctx.unprotected())?;
                Ok(Expr::call(head, vec![inner]))
            } else if head == PROTECT {
                let args = wrapper_argument(&head, args)?;
                let inner = rewrite_in(args, ctx.protected())?;
                Ok(Expr::call(head, vec![inner]))
            } else {
                let args = args
                    .into_iter()
                    .map(|arg| rewrite_in(arg, ctx.protected()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::call(head, args))
            }
        }
        leaf => Ok(leaf),
    }
}

fn wrapper_argument(head: &str, mut args: Vec<Expr>) -> Result<Expr, SyntaxError> {
    if args.len() != 1 {
        return Err(SyntaxError::Arity {
            head: head.to_string(),
            expected: 1,
            found: args.len(),
        });
    }
    Ok(args.remove(0))
}

fn rewrite_special(head: String, args: Vec<Expr>, ctx: RewriteContext) -> Result<Expr, SyntaxError> {
    if head == "~" {
        if !ctx.root {
            return Err(SyntaxError::NestedTilde(Expr::call(head, args).to_string()));
        }
        if args.len() != 2 {
            return Err(SyntaxError::Arity {
                head,
                expected: 2,
                found: args.len(),
            });
        }
    }

    let mut node = Expr::call(head, args);
    let mut idx = 0;
    loop {
        let len = node.args().len();
        if idx >= len {
            break;
        }
        if let Expr::Call { args, .. } = &mut node {
            let child = mem::replace(&mut args[idx], Expr::Number(0.0));
            args[idx] = rewrite_in(child, ctx.child())?;
        }
        match applicable_rule(&node, idx) {
            Some(rule) => {
                trace!("{:?} at argument {} of {}", rule, idx, node);
                let (next, rewritten) = apply_rule(rule, node, idx)?;
                node = rewritten;
                idx = next;
            }
            None => idx += 1,
        }
    }

    node = drop_unit_literals(node);
    sort_by_degree(&mut node);
    Ok(node)
}

fn applicable_rule(node: &Expr, idx: usize) -> Option<Rule> {
    let head = node.head()?;
    let child = &node.args()[idx];
    if head == "*" {
        return Some(Rule::Star);
    }
    if matches!(head, "+" | "&" | "*") && child.is_call(head) {
        return Some(Rule::Associative);
    }
    if head == "&" && child.is_call("+") {
        return Some(Rule::Distributive);
    }
    if child.is_call("-") && child.args().len() == 2 {
        return Some(Rule::Subtraction);
    }
    None
}

/// Applies `rule` at argument `idx`, returning the argument index to
/// continue from and the rewritten node.
fn apply_rule(rule: Rule, node: Expr, idx: usize) -> Result<(usize, Expr), SyntaxError> {
    let (head, mut args) = match node {
        Expr::Call { head, args } => (head, args),
        leaf => return Ok((idx + 1, leaf)),
    };
    match rule {
        Rule::Star => Ok((idx, expand_star(args))),
        Rule::Associative => {
            let child = args.remove(idx);
            let spliced = match child {
                Expr::Call { args, .. } => args,
                leaf => vec![leaf],
            };
            args.splice(idx..idx, spliced);
            Ok((idx, Expr::call(head, args)))
        }
        Rule::Distributive => {
            let sum = args.remove(idx);
            let terms = match sum {
                Expr::Call { args, .. } => args,
                leaf => vec![leaf],
            };
            let copies = terms
                .into_iter()
                .map(|term| {
                    let mut copy = args.clone();
                    copy.insert(idx, term);
                    Expr::call(head.clone(), copy)
                })
                .collect();
            Ok((0, Expr::call("+", copies)))
        }
        Rule::Subtraction => {
            let child = args.remove(idx);
            let mut operands = match child {
                Expr::Call { args, .. } => args,
                leaf => vec![leaf],
            };
            let subtrahend = operands.pop();
            let minuend = operands.pop();
            match (minuend, subtrahend) {
                (Some(minuend), Some(Expr::Number(n))) if n == 1.0 => {
                    args.insert(idx, Expr::call("+", vec![minuend, Expr::Number(-1.0)]));
                    Ok((idx, Expr::call(head, args)))
                }
                (Some(minuend), Some(other)) => Err(SyntaxError::InvalidSubtraction(
                    Expr::call("-", vec![minuend, other]).to_string(),
                )),
                _ => Err(SyntaxError::Arity {
                    head: "-".to_string(),
                    expected: 2,
                    found: 0,
                }),
            }
        }
    }
}

/// `a * b * c` reduces pairwise through `x * y = x + y + x & y`.
fn expand_star(args: Vec<Expr>) -> Expr {
    let mut args = args.into_iter();
    let first = match args.next() {
        Some(first) => first,
        None => return Expr::call("+", Vec::new()),
    };
    args.fold(first, |acc, next| {
        let interaction = Expr::call("&", vec![acc.clone(), next.clone()]);
        Expr::call("+", vec![acc, next, interaction])
    })
}

fn drop_unit_literals(node: Expr) -> Expr {
    match node {
        Expr::Call { head, args } if head == "&" => {
            let mut kept = Vec::with_capacity(args.len());
            for arg in args {
                match arg {
                    Expr::Number(n) if n == 1.0 => {}
                    Expr::Number(n) => {
                        warn!("number {} inside an interaction has no effect", n);
                        kept.push(Expr::Number(n));
                    }
                    other => kept.push(other),
                }
            }
            match kept.len() {
                0 => Expr::Number(1.0),
                1 => kept.remove(0),
                _ => Expr::call(head, kept),
            }
        }
        other => other,
    }
}

/// Degree used to order formula operator arguments: numbers come
/// first, then main effects, then interactions by order.
pub fn degree(expr: &Expr) -> usize {
    match expr {
        Expr::Number(_) => 0,
        Expr::Ident(_) => 1,
        Expr::Call { head, args } if head == "&" => args.len(),
        Expr::Call { .. } => 1,
    }
}

fn sort_by_degree(node: &mut Expr) {
    if let Expr::Call { head, args } = node {
        if matches!(head.as_str(), "+" | "&" | "*") {
            args.sort_by_key(degree);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn rw(src: &str) -> Result<Expr, SyntaxError> {
        rewrite(parse(src).unwrap())
    }

    fn canonical(src: &str) -> String {
        rw(src).unwrap().to_string()
    }

    #[test]
    fn test_star_expansion() {
        assert_eq!(canonical("a * b"), "a + b + a & b");
        assert_eq!(
            canonical("a * b * c"),
            "a + b + c + a & b + a & c + b & c + a & b & c"
        );
    }

    #[test]
    fn test_associative_flattening() {
        assert_eq!(canonical("a + (b + c)"), "a + b + c");
        assert_eq!(canonical("(a & b) & c"), "a & b & c");
    }

    #[test]
    fn test_distributive() {
        assert_eq!(canonical("(a + b) & c"), "a & c + b & c");
        assert_eq!(canonical("(a + b) & (c + d)"), "a & c + a & d + b & c + b & d");
    }

    #[test]
    fn test_subtraction() {
        assert_eq!(canonical("y ~ x - 1"), "y ~ -1 + x");
        assert_eq!(
            rw("y ~ x - z"),
            Err(SyntaxError::InvalidSubtraction("x - z".to_string()))
        );
    }

    #[test]
    fn test_unit_interaction_cleanup() {
        assert_eq!(canonical("1 & a"), "a");
        assert_eq!(canonical("a & 1 & b"), "a & b");
        assert_eq!(canonical("1 & 1"), "1");
    }

    #[test]
    fn test_degree_sort_is_stable() {
        assert_eq!(canonical("a & b + c + 1 + log(d)"), "1 + c + log(d) + a & b");
    }

    #[test]
    fn test_calls_are_protected() {
        assert_eq!(canonical("y ~ log(a * b) + c"), "y ~ log(a * b) + c");
        assert_eq!(canonical("y ~ f(x - 2)"), "y ~ f(x - 2)");
    }

    #[test]
    fn test_unprotect_resumes_rewriting() {
        assert_eq!(
            canonical("y ~ f(unprotect(a * b))"),
            "y ~ f(unprotect(a + b + a & b))"
        );
        assert_eq!(
            canonical("y ~ f(unprotect(g(protect(a * b) + unprotect(c * d))))"),
            "y ~ f(unprotect(g(protect(a * b) + unprotect(c + d + c & d))))"
        );
    }

    #[test]
    fn test_misplaced_wrappers() {
        assert!(matches!(rw("y ~ unprotect(a)"), Err(SyntaxError::MisplacedUnprotect(_))));
        assert!(matches!(rw("y ~ f(unprotect(a, b))"), Err(SyntaxError::Arity { .. })));
    }

    #[test]
    fn test_tilde_checks() {
        assert!(matches!(rw("y ~ (a ~ b)"), Err(SyntaxError::NestedTilde(_))));
        assert!(rw("y ~ f(a ~ b)").is_ok());
    }
}
