//! Applying a schema: placeholders become concrete terms, and each
//! categorical occurrence on the right-hand side is coded with reduced
//! or full rank depending on which terms precede it.
//!
//! A categorical variable inside a term is coded with full rank unless
//! the term left after dropping that variable (its alias) has already
//! been seen. Seen terms are every rhs component visited so far, the
//! intercept when the model implies or absorbs it, and every alias that
//! caused a promotion.

use std::collections::BTreeSet;

use tracing::debug;

use crate::context::ModelContext;
use crate::error::{ResolutionError, Result};
use crate::formula::Formula;
use crate::function::FunctionCall;
use crate::registry::Registry;
use crate::rewrite::Protection;
use crate::schema::{unknown_column, Schema};
use crate::term::{AliasKey, CategoricalTerm, Term};

/// Alias keys already present while one right-hand side is resolved.
#[derive(Debug, Default)]
pub struct FullRank {
    seen: BTreeSet<AliasKey>,
}

impl FullRank {
    pub fn new() -> FullRank {
        FullRank::default()
    }

    pub fn contains(&self, key: &AliasKey) -> bool {
        self.seen.contains(key)
    }

    /// Returns whether the key was new.
    pub fn insert(&mut self, key: AliasKey) -> bool {
        self.seen.insert(key)
    }
}

struct Resolver<'a> {
    schema: &'a Schema,
    model: &'a dyn ModelContext,
    registry: &'a Registry,
}

/// Resolve a formula with the default call handlers.
pub fn apply_schema(
    formula: &Formula,
    schema: &Schema,
    model: &dyn ModelContext,
) -> Result<Formula> {
    apply_schema_with(formula, schema, model, &Registry::default())
}

pub fn apply_schema_with(
    formula: &Formula,
    schema: &Schema,
    model: &dyn ModelContext,
    registry: &Registry,
) -> Result<Formula> {
    let resolver = Resolver::new(schema, model, registry)?;
    let lhs = resolver.concrete(&formula.lhs, Protection::Unprotected)?;

    let mut seen = FullRank::new();
    let mut rhs = formula.rhs.clone();
    if model.drop_intercept() {
        if rhs.has_intercept() {
            return Err(ResolutionError::InterceptForbidden(model.kind()).into());
        }
        seen.insert(AliasKey::intercept());
    } else if model.implicit_intercept() && !rhs.has_intercept() && !rhs.omits_intercept() {
        rhs = Term::union(vec![Term::Intercept(true), rhs]);
    }

    let mut resolved = Vec::new();
    for component in rhs.components() {
        resolved.push(resolver.promote(component, &mut seen)?);
    }
    Ok(Formula::new(lhs, collect_matrix(resolved)))
}

/// Resolve a bare term against a schema without rank promotion.
pub fn apply_schema_term(term: &Term, schema: &Schema, model: &dyn ModelContext) -> Result<Term> {
    let registry = Registry::default();
    Resolver::new(schema, model, &registry)?.concrete(term, Protection::Unprotected)
}

/// Matrix-compatible terms form one block; the rest follow it.
fn collect_matrix(terms: Vec<Term>) -> Term {
    let (block, rest): (Vec<Term>, Vec<Term>) = terms.into_iter().partition(|t| match t {
        Term::Custom(c) => c.is_matrix_term(),
        _ => true,
    });
    if rest.is_empty() {
        Term::Matrix(block)
    } else {
        let mut members = vec![Term::Matrix(block)];
        members.extend(rest);
        Term::Group(members)
    }
}

impl<'a> Resolver<'a> {
    fn new(
        schema: &'a Schema,
        model: &'a dyn ModelContext,
        registry: &'a Registry,
    ) -> Result<Resolver<'a>> {
        if model.implicit_intercept() && model.drop_intercept() {
            return Err(ResolutionError::ContradictoryContext(model.kind()).into());
        }
        Ok(Resolver {
            schema,
            model,
            registry,
        })
    }

    /// Resolve one top-level rhs component, recording it as seen.
    fn promote(&self, term: &Term, seen: &mut FullRank) -> Result<Term> {
        let key = term.alias_key();
        match term {
            Term::Interaction(parts) => {
                seen.insert(key.clone());
                let mut resolved = Vec::with_capacity(parts.len());
                for part in parts {
                    resolved.push(self.in_context(part, &key, seen)?);
                }
                Ok(Term::Interaction(resolved))
            }
            Term::Placeholder(_) | Term::Categorical(_) => {
                seen.insert(key.clone());
                self.in_context(term, &key, seen)
            }
            _ => {
                let resolved = self.concrete(term, Protection::Unprotected)?;
                seen.insert(resolved.alias_key());
                Ok(resolved)
            }
        }
    }

    /// Resolve `term` as part of the rhs component with alias key
    /// `context`.
    fn in_context(&self, term: &Term, context: &AliasKey, seen: &mut FullRank) -> Result<Term> {
        match self.concrete(term, Protection::Unprotected)? {
            Term::Categorical(c) => {
                let alias = context.without(&AliasKey::atom(c.name.clone()));
                if seen.contains(&alias) {
                    debug!(
                        "{} in {:?} ({}): alias {:?} seen, keeping contrasts",
                        c.name,
                        context.atoms,
                        self.model.kind(),
                        alias.atoms
                    );
                    Ok(Term::Categorical(c))
                } else {
                    debug!(
                        "{} in {:?} ({}): alias {:?} not seen, promoting to full rank",
                        c.name,
                        context.atoms,
                        self.model.kind(),
                        alias.atoms
                    );
                    seen.insert(alias);
                    Ok(Term::Categorical(CategoricalTerm {
                        contrasts: c.contrasts.full_rank(),
                        name: c.name,
                    }))
                }
            }
            other => Ok(other),
        }
    }

    /// Resolve without promotion.
    fn concrete(&self, term: &Term, protection: Protection) -> Result<Term> {
        Ok(match term {
            Term::Placeholder(name) => self
                .schema
                .get(name)
                .cloned()
                .ok_or_else(|| unknown_column(name, &self.schema.names()))?,
            Term::Constant(n) if *n == 1.0 => Term::Intercept(true),
            Term::Constant(n) if *n == 0.0 || *n == -1.0 => Term::Intercept(false),
            Term::Constant(n) => return Err(ResolutionError::InvalidConstant(*n).into()),
            Term::Intercept(_) | Term::Custom(_) => term.clone(),
            Term::Continuous(t) => self.reapply(&t.name, term, "continuous")?,
            Term::Categorical(t) => self.reapply(&t.name, term, "categorical")?,
            Term::Interaction(parts) => Term::Interaction(self.concrete_all(parts, protection)?),
            Term::Group(parts) => Term::Group(self.concrete_all(parts, protection)?),
            Term::Matrix(parts) => Term::Matrix(self.concrete_all(parts, protection)?),
            Term::Function(call) => self.function(call, protection)?,
            Term::Formula(f) => Term::formula(
                self.concrete(&f.lhs, protection)?,
                self.concrete(&f.rhs, protection)?,
            ),
        })
    }

    fn concrete_all(&self, terms: &[Term], protection: Protection) -> Result<Vec<Term>> {
        terms.iter().map(|t| self.concrete(t, protection)).collect()
    }

    /// An already concrete term takes the schema's entry for its name,
    /// which has to be of the same kind.
    fn reapply(&self, name: &str, term: &Term, kind: &'static str) -> Result<Term> {
        match self.schema.get(name) {
            None => Ok(term.clone()),
            Some(entry) if kind_of(entry) == kind => Ok(entry.clone()),
            Some(entry) => Err(ResolutionError::TypeMismatch {
                name: name.to_string(),
                expected: kind_of(entry),
                found: kind,
            }
            .into()),
        }
    }

    /// Registered handlers apply to calls written at formula level; any
    /// other call is evaluated element-wise over its resolved arguments.
    fn function(&self, call: &FunctionCall, protection: Protection) -> Result<Term> {
        if protection == Protection::Unprotected {
            if let Some(handler) = self.registry.lookup(call.head(), self.model.kind()) {
                debug!("{}: custom handler for {}", call, self.model.kind());
                return handler.resolve(call, self.schema, self.model);
            }
        }
        if let Some(function) = call.program().unknown_functions().first() {
            return Err(ResolutionError::UnknownFunction {
                call: call.to_string(),
                function: function.to_string(),
            }
            .into());
        }
        let mut args = Vec::with_capacity(call.args().len());
        for (slot, arg) in call.args().iter().enumerate() {
            // plain identifiers are host values; unprotected arguments are formula terms
            let unprotected = call.is_unprotected(slot);
            let inner = if unprotected {
                Protection::Unprotected
            } else {
                Protection::Protected
            };
            let resolved = self.concrete(arg, inner)?;
            if let (false, Term::Categorical(c)) = (unprotected, &resolved) {
                return Err(ResolutionError::NotNumeric(c.name.clone()).into());
            }
            let width = resolved.width()?;
            if width != 1 {
                return Err(ResolutionError::ArgumentWidth {
                    call: call.to_string(),
                    arg: arg.to_string(),
                    width,
                }
                .into());
            }
            args.push(resolved);
        }
        Ok(Term::Function(call.with_args(args)))
    }
}

fn kind_of(term: &Term) -> &'static str {
    match term {
        Term::Continuous(_) => "continuous",
        Term::Categorical(_) => "categorical",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DropInterceptModel, NoModel, StatisticalModel};
    use crate::data::{Column, ColumnTable};
    use crate::error::Error;
    use crate::schema::{schema, Hints};

    fn table() -> ColumnTable {
        ColumnTable::from_columns(vec![
            ("y", Column::from(vec![1.0, 2.0, 3.0, 4.0])),
            ("x", Column::from(vec![0.5, 1.5, 2.5, 3.5])),
            ("a", Column::from(vec!["p", "q", "p", "q"])),
            ("b", Column::from(vec!["p", "p", "q", "q"])),
            ("c", Column::from(vec!["r", "s", "s", "r"])),
        ])
        .unwrap()
    }

    fn resolve(src: &str, model: &dyn ModelContext) -> Result<Formula> {
        let f = Formula::parse(src)?;
        let s = schema(&f.to_term(), &table(), &Hints::new())?;
        apply_schema(&f, &s, model)
    }

    fn widths(f: &Formula) -> Vec<usize> {
        match &f.rhs {
            Term::Matrix(terms) => terms.iter().map(|t| t.width().unwrap()).collect(),
            other => panic!("expected a matrix block, got {:?}", other),
        }
    }

    #[test]
    fn test_main_effect_after_intercept_is_reduced() {
        let f = resolve("y ~ 1 + a", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![1, 1]);
    }

    #[test]
    fn test_main_effect_without_intercept_is_full() {
        let f = resolve("y ~ 0 + a", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![0, 2]);
        let f = resolve("y ~ 0 + a + b", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![0, 2, 1]);
    }

    #[test]
    fn test_interaction_promotion() {
        let f = resolve("y ~ 1 + a + a & b", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![1, 1, 2]);
        match &f.rhs {
            Term::Matrix(terms) => match &terms[2] {
                Term::Interaction(parts) => {
                    assert!(matches!(&parts[0], Term::Categorical(a) if a.is_full_rank()));
                    assert!(matches!(&parts[1], Term::Categorical(b) if !b.is_full_rank()));
                }
                other => panic!("expected interaction, got {:?}", other),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_interaction_without_main_effects() {
        let f = resolve("y ~ 0 + a & b", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![0, 4]);
    }

    #[test]
    fn test_promoted_alias_is_seen_later() {
        // promoting `a` in `a & b` seeds `b`, so `c` in `b & c` keeps its
        // contrasts while `b` there (alias `c`) is promoted
        let f = resolve("y ~ 1 + a + a & b + b & c", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_implicit_intercept() {
        let f = resolve("y ~ a", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![1, 1]);
        assert!(f.has_intercept());
        let f = resolve("y ~ a", &NoModel).unwrap();
        assert_eq!(widths(&f), vec![2]);
        assert!(!f.has_intercept());
    }

    #[test]
    fn test_drop_intercept_model() {
        let f = resolve("y ~ a", &DropInterceptModel).unwrap();
        assert_eq!(widths(&f), vec![1]);
        let err = resolve("y ~ 1 + a", &DropInterceptModel).unwrap_err();
        assert_eq!(
            err,
            Error::Resolution(ResolutionError::InterceptForbidden("DropInterceptModel"))
        );
    }

    #[test]
    fn test_contradictory_context() {
        struct Both;
        impl ModelContext for Both {
            fn kind(&self) -> &'static str {
                "Both"
            }
            fn implicit_intercept(&self) -> bool {
                true
            }
            fn drop_intercept(&self) -> bool {
                true
            }
        }
        let err = resolve("y ~ a", &Both).unwrap_err();
        assert_eq!(err, Error::Resolution(ResolutionError::ContradictoryContext("Both")));
    }

    #[test]
    fn test_continuous_interactions_promote_categoricals() {
        let f = resolve("y ~ 1 + x & a", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![1, 2]);
    }

    #[test]
    fn test_lhs_is_not_promoted() {
        let f = resolve("a ~ 0 + x", &StatisticalModel).unwrap();
        assert_eq!(f.lhs.width().unwrap(), 1);
    }

    #[test]
    fn test_unknown_column_in_formula() {
        let f = Formula::parse("y ~ qty").unwrap();
        let s = schema(&Term::placeholder("y"), &table(), &Hints::new()).unwrap();
        let err = apply_schema(&f, &s, &NoModel).unwrap_err();
        assert!(matches!(err, Error::Resolution(ResolutionError::UnknownColumn { .. })));
    }

    #[test]
    fn test_function_arguments() {
        let f = resolve("y ~ log(x) + exp(unprotect(a))", &NoModel).unwrap();
        assert_eq!(widths(&f), vec![1, 1]);
        let err = resolve("y ~ log(unprotect(a + c))", &NoModel).unwrap_err();
        assert_eq!(
            err,
            Error::Resolution(ResolutionError::ArgumentWidth {
                call: "log(unprotect(a + c))".to_string(),
                arg: "a + c".to_string(),
                width: 2,
            })
        );
        let err = resolve("y ~ frobnicate(x)", &NoModel).unwrap_err();
        assert_eq!(
            err,
            Error::Resolution(ResolutionError::UnknownFunction {
                call: "frobnicate(x)".to_string(),
                function: "frobnicate".to_string(),
            })
        );
    }

    #[test]
    fn test_categorical_host_arguments_are_rejected() {
        for src in &["y ~ 0 + exp(a)", "y ~ 0 + exp(c)", "y ~ log(x + b)"] {
            let err = resolve(src, &NoModel).unwrap_err();
            assert!(
                matches!(&err, Error::Resolution(ResolutionError::NotNumeric(_))),
                "{}: {:?}",
                src,
                err
            );
        }
        assert_eq!(
            resolve("y ~ 0 + exp(a)", &NoModel).unwrap_err(),
            Error::Resolution(ResolutionError::NotNumeric("a".to_string()))
        );
    }

    #[test]
    fn test_poly_needs_a_model() {
        let f = resolve("y ~ poly(x, 2)", &StatisticalModel).unwrap();
        assert_eq!(widths(&f), vec![1, 2]);
        assert!(resolve("y ~ poly(x, 2)", &NoModel).is_err());
    }

    #[test]
    fn test_reapplying_is_stable() {
        let f = resolve("y ~ 1 + a + a & b", &StatisticalModel).unwrap();
        let s = schema(&f.to_term(), &table(), &Hints::new()).unwrap();
        let again = apply_schema(&f, &s, &StatisticalModel).unwrap();
        assert_eq!(widths(&again), widths(&f));
    }

    #[test]
    fn test_type_mismatch_on_reapply() {
        let f = resolve("y ~ 0 + x", &NoModel).unwrap();
        let mut hints = Hints::new();
        hints.insert("x".to_string(), crate::schema::Hint::Categorical);
        let s = schema(&Term::placeholder("x"), &table(), &hints).unwrap();
        let err = apply_schema(&f, &s, &NoModel).unwrap_err();
        assert_eq!(
            err,
            Error::Resolution(ResolutionError::TypeMismatch {
                name: "x".to_string(),
                expected: "categorical",
                found: "continuous",
            })
        );
    }

    #[test]
    fn test_apply_schema_term() {
        let t = crate::formula::term("a & b").unwrap();
        let s = schema(&t, &table(), &Hints::new()).unwrap();
        let resolved = apply_schema_term(&t, &s, &NoModel).unwrap();
        assert_eq!(resolved.width().unwrap(), 1);
    }
}
