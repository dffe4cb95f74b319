use std::collections::BTreeSet;
use std::fmt;
use std::ops;
use std::sync::Arc;

use ndarray::Array2;
use tracing::warn;

use crate::contrasts::ContrastsMatrix;
use crate::data::{Row, Table};
use crate::error::{ColumnError, Result};
use crate::formula::Formula;
use crate::function::FunctionCall;

/// A node of a formula term tree.
///
/// Placeholders, constants, interactions, function calls and groups
/// come out of the rewriter; continuous, categorical, intercept and
/// matrix terms are produced by applying a schema. Terms are never
/// mutated; resolving produces a new tree.
#[derive(Debug, Clone)]
pub enum Term {
    /// Unresolved reference to a data column.
    Placeholder(String),
    /// Literal -1, 0 or 1.
    Constant(f64),
    Intercept(bool),
    Continuous(ContinuousTerm),
    Categorical(CategoricalTerm),
    /// Row-wise product of two or more components.
    Interaction(Vec<Term>),
    Function(FunctionCall),
    Custom(Arc<dyn CustomTerm>),
    /// Union of terms (`+`).
    Group(Vec<Term>),
    /// Terms concatenated into one contiguous block of columns.
    Matrix(Vec<Term>),
    Formula(Box<Formula>),
}

/// Numeric column with the summary statistics seen when the schema was
/// built.
#[derive(Debug, Clone)]
pub struct ContinuousTerm {
    pub name: String,
    pub mean: f64,
    pub var: f64,
    pub min: f64,
    pub max: f64,
}

impl PartialEq for ContinuousTerm {
    fn eq(&self, other: &Self) -> bool {
        // bitwise, so NaN statistics still compare equal to themselves
        self.name == other.name
            && self.mean.to_bits() == other.mean.to_bits()
            && self.var.to_bits() == other.var.to_bits()
            && self.min.to_bits() == other.min.to_bits()
            && self.max.to_bits() == other.max.to_bits()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalTerm {
    pub name: String,
    pub contrasts: ContrastsMatrix,
}

impl CategoricalTerm {
    pub fn is_full_rank(&self) -> bool {
        self.contrasts.ncols() == self.contrasts.levels().len()
    }
}

/// Term kinds contributed by call handlers (see
/// [`Registry`](crate::registry::Registry)).
pub trait CustomTerm: fmt::Debug + Send + Sync {
    /// Display form; also identifies the term for aliasing.
    fn label(&self) -> String;
    fn width(&self) -> usize;
    fn coefnames(&self) -> Vec<String>;
    fn termvars(&self) -> Vec<String>;
    fn columns(&self, data: &dyn Table) -> Result<Array2<f64>>;
    fn row_values(&self, row: &Row) -> Result<Vec<f64>>;

    /// Whether the term's columns can be concatenated with the ordinary
    /// model matrix.
    fn is_matrix_term(&self) -> bool {
        true
    }
}

/// What a term refers to, ignoring its surface form: the set of atoms
/// (variables, or the rendered call for function terms) and whether the
/// intercept is among them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AliasKey {
    pub intercept: bool,
    pub atoms: BTreeSet<String>,
}

impl AliasKey {
    pub fn intercept() -> AliasKey {
        AliasKey {
            intercept: true,
            atoms: BTreeSet::new(),
        }
    }

    pub fn empty() -> AliasKey {
        AliasKey {
            intercept: false,
            atoms: BTreeSet::new(),
        }
    }

    pub(crate) fn atom(label: String) -> AliasKey {
        let mut atoms = BTreeSet::new();
        atoms.insert(label);
        AliasKey {
            intercept: false,
            atoms,
        }
    }

    fn union(mut self, other: AliasKey) -> AliasKey {
        self.intercept |= other.intercept;
        self.atoms.extend(other.atoms);
        self
    }

    /// The key left after dropping `part` from `self`. Dropping the last
    /// atom leaves the intercept.
    pub fn without(&self, part: &AliasKey) -> AliasKey {
        let atoms: BTreeSet<String> = self.atoms.difference(&part.atoms).cloned().collect();
        let intercept = atoms.is_empty() || (self.intercept && !part.intercept);
        AliasKey { intercept, atoms }
    }
}

impl Term {
    pub fn placeholder<S: Into<String>>(name: S) -> Term {
        Term::Placeholder(name.into())
    }

    /// Term union: flattens groups and keeps the first of any alias-equal
    /// terms. A union of one term is that term.
    pub fn union<I: IntoIterator<Item = Term>>(terms: I) -> Term {
        let mut members: Vec<Term> = Vec::new();
        let mut keys: Vec<AliasKey> = Vec::new();
        let mut pending: Vec<Term> = terms.into_iter().collect();
        pending.reverse();
        while let Some(term) = pending.pop() {
            match term {
                Term::Group(inner) => pending.extend(inner.into_iter().rev()),
                term => {
                    let key = term.alias_key();
                    if !keys.contains(&key) {
                        keys.push(key);
                        members.push(term);
                    }
                }
            }
        }
        if members.len() == 1 {
            members.remove(0)
        } else {
            Term::Group(members)
        }
    }

    /// Interaction: flattens nested interactions, distributes over groups
    /// and drops constants. An interaction of one term is that term.
    pub fn interact<I: IntoIterator<Item = Term>>(terms: I) -> Term {
        let mut rows: Vec<Vec<Term>> = vec![Vec::new()];
        let mut distributed = false;
        for term in terms {
            match term {
                Term::Group(members) => {
                    distributed = true;
                    rows = rows
                        .into_iter()
                        .flat_map(|row| {
                            members.iter().map(move |m| {
                                let mut row = row.clone();
                                row.push(m.clone());
                                row
                            })
                        })
                        .collect();
                }
                term => rows.iter_mut().for_each(|row| row.push(term.clone())),
            }
        }
        if distributed {
            return Term::union(rows.into_iter().map(Term::interact));
        }
        let components = rows.pop().unwrap_or_default();

        let mut kept = Vec::with_capacity(components.len());
        let mut constant = None;
        for term in components {
            match term {
                Term::Interaction(inner) => kept.extend(inner),
                Term::Constant(n) => {
                    if n != 1.0 {
                        warn!("constant {} inside an interaction has no effect", n);
                    }
                    constant.get_or_insert(Term::Constant(n));
                }
                Term::Intercept(present) => {
                    constant.get_or_insert(Term::Intercept(present));
                }
                term => kept.push(term),
            }
        }
        match kept.len() {
            0 => constant.unwrap_or(Term::Constant(1.0)),
            1 => kept.remove(0),
            _ => Term::Interaction(kept),
        }
    }

    pub fn formula(lhs: Term, rhs: Term) -> Term {
        Term::Formula(Box::new(Formula::new(lhs, rhs)))
    }

    pub fn alias_key(&self) -> AliasKey {
        match self {
            Term::Placeholder(name) => AliasKey::atom(name.clone()),
            Term::Continuous(t) => AliasKey::atom(t.name.clone()),
            Term::Categorical(t) => AliasKey::atom(t.name.clone()),
            Term::Constant(n) if *n == 1.0 => AliasKey::intercept(),
            Term::Intercept(true) => AliasKey::intercept(),
            Term::Constant(_) | Term::Intercept(false) => AliasKey::empty(),
            Term::Function(f) => AliasKey::atom(f.to_string()),
            Term::Custom(c) => AliasKey::atom(c.label()),
            Term::Interaction(terms) | Term::Group(terms) | Term::Matrix(terms) => terms
                .iter()
                .fold(AliasKey::empty(), |key, t| key.union(t.alias_key())),
            Term::Formula(f) => f.lhs.alias_key().union(f.rhs.alias_key()),
        }
    }

    /// Two terms are alias-equal when they refer to the same atoms and
    /// agree on the intercept, whatever their surface form.
    pub fn alias_eq(&self, other: &Term) -> bool {
        self.alias_key() == other.alias_key()
    }

    /// Members of a group or matrix block, or the term itself.
    pub fn components(&self) -> Vec<&Term> {
        match self {
            Term::Group(terms) | Term::Matrix(terms) => terms.iter().collect(),
            other => vec![other],
        }
    }

    pub fn has_intercept(&self) -> bool {
        match self {
            Term::Constant(n) => *n == 1.0,
            Term::Intercept(present) => *present,
            Term::Group(terms) | Term::Matrix(terms) => terms.iter().any(Term::has_intercept),
            Term::Formula(f) => f.rhs.has_intercept(),
            _ => false,
        }
    }

    pub fn omits_intercept(&self) -> bool {
        match self {
            Term::Constant(n) => *n == 0.0 || *n == -1.0,
            Term::Intercept(present) => !*present,
            Term::Group(terms) | Term::Matrix(terms) => terms.iter().any(Term::omits_intercept),
            Term::Formula(f) => f.rhs.omits_intercept(),
            _ => false,
        }
    }

    /// Names of the data columns a term reads, in order of first use.
    pub fn termvars(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.collect_termvars(&mut vars);
        vars
    }

    fn collect_termvars(&self, vars: &mut Vec<String>) {
        let mut push = |name: &str| {
            if !vars.iter().any(|v| v == name) {
                vars.push(name.to_string());
            }
        };
        match self {
            Term::Placeholder(name) => push(name),
            Term::Continuous(t) => push(&t.name),
            Term::Categorical(t) => push(&t.name),
            Term::Custom(c) => c.termvars().iter().for_each(|name| push(name)),
            Term::Constant(_) | Term::Intercept(_) => {}
            Term::Function(f) => f.args().iter().for_each(|t| t.collect_termvars(vars)),
            Term::Interaction(terms) | Term::Group(terms) | Term::Matrix(terms) => {
                terms.iter().for_each(|t| t.collect_termvars(vars))
            }
            Term::Formula(f) => {
                f.lhs.collect_termvars(vars);
                f.rhs.collect_termvars(vars);
            }
        }
    }

    /// Number of columns the term generates.
    pub fn width(&self) -> Result<usize> {
        Ok(match self {
            Term::Placeholder(_) | Term::Constant(_) => {
                return Err(ColumnError::Unresolved(self.to_string()).into())
            }
            Term::Intercept(present) => *present as usize,
            Term::Continuous(_) | Term::Function(_) => 1,
            Term::Categorical(t) => t.contrasts.ncols(),
            Term::Custom(c) => c.width(),
            Term::Interaction(terms) => {
                let mut width = 1;
                for t in terms {
                    width *= t.width()?;
                }
                width
            }
            Term::Group(terms) | Term::Matrix(terms) => {
                let mut width = 0;
                for t in terms {
                    width += t.width()?;
                }
                width
            }
            Term::Formula(f) => f.rhs.width()?,
        })
    }

    /// Coefficient names, one per generated column.
    pub fn coefnames(&self) -> Result<Vec<String>> {
        Ok(match self {
            Term::Placeholder(_) | Term::Constant(_) => {
                return Err(ColumnError::Unresolved(self.to_string()).into())
            }
            Term::Intercept(true) => vec!["(Intercept)".to_string()],
            Term::Intercept(false) => Vec::new(),
            Term::Continuous(t) => vec![t.name.clone()],
            Term::Categorical(t) => t
                .contrasts
                .coefnames()
                .iter()
                .map(|level| format!("{}: {}", t.name, level))
                .collect(),
            Term::Function(f) => vec![f.to_string()],
            Term::Custom(c) => c.coefnames(),
            Term::Interaction(terms) => {
                let parts = terms
                    .iter()
                    .map(Term::coefnames)
                    .collect::<Result<Vec<_>>>()?;
                kron_names(parts)
            }
            Term::Group(terms) | Term::Matrix(terms) => {
                let mut names = Vec::new();
                for t in terms {
                    names.extend(t.coefnames()?);
                }
                names
            }
            Term::Formula(f) => f.rhs.coefnames()?,
        })
    }
}

/// Interaction names with the first component varying fastest, matching
/// the column order of the row-wise product.
fn kron_names(parts: Vec<Vec<String>>) -> Vec<String> {
    let mut parts = parts.into_iter();
    let mut names = match parts.next() {
        Some(first) => first,
        None => return Vec::new(),
    };
    for part in parts {
        let mut next = Vec::with_capacity(names.len() * part.len());
        for outer in &part {
            for inner in &names {
                next.push(format!("{} & {}", inner, outer));
            }
        }
        names = next;
    }
    names
}

impl PartialEq for Term {
    fn eq(&self, other: &Term) -> bool {
        use Term::*;
        match (self, other) {
            (Placeholder(a), Placeholder(b)) => a == b,
            (Constant(a), Constant(b)) => a == b,
            (Intercept(a), Intercept(b)) => a == b,
            (Continuous(a), Continuous(b)) => a == b,
            (Categorical(a), Categorical(b)) => a == b,
            (Interaction(a), Interaction(b)) => a == b,
            (Function(a), Function(b)) => a == b,
            (Custom(a), Custom(b)) => a.label() == b.label() && a.width() == b.width(),
            (Group(a), Group(b)) => a == b,
            (Matrix(a), Matrix(b)) => a == b,
            (Formula(a), Formula(b)) => a == b,
            _ => false,
        }
    }
}

impl ops::Add for Term {
    type Output = Term;

    fn add(self, rhs: Term) -> Term {
        Term::union(vec![self, rhs])
    }
}

impl ops::BitAnd for Term {
    type Output = Term;

    fn bitand(self, rhs: Term) -> Term {
        Term::interact(vec![self, rhs])
    }
}

fn write_joined(f: &mut fmt::Formatter, terms: &[Term], sep: &str) -> fmt::Result {
    for (i, t) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        match t {
            // infix calls would bind differently next to `&`
            Term::Function(call) if sep == " & " && call.original().is_operator() => {
                write!(f, "({})", t)?
            }
            Term::Group(_) | Term::Matrix(_) if sep == " & " => write!(f, "({})", t)?,
            _ => write!(f, "{}", t)?,
        }
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Term::Placeholder(name) => write!(f, "{}", name),
            Term::Constant(n) => write!(f, "{}", n),
            Term::Intercept(present) => write!(f, "{}", if *present { 1 } else { 0 }),
            Term::Continuous(t) => write!(f, "{}", t.name),
            Term::Categorical(t) => write!(f, "{}", t.name),
            Term::Interaction(terms) => write_joined(f, terms, " & "),
            Term::Function(call) => write!(f, "{}", call),
            Term::Custom(c) => write!(f, "{}", c.label()),
            Term::Group(terms) | Term::Matrix(terms) => write_joined(f, terms, " + "),
            Term::Formula(formula) => write!(f, "{}", formula),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str) -> Term {
        Term::placeholder(name)
    }

    #[test]
    fn test_union_flattens_and_deduplicates() {
        let t = (p("a") + p("b")) + (p("b") + p("a"));
        assert_eq!(t, Term::Group(vec![p("a"), p("b")]));
        assert_eq!(p("a") + p("a"), p("a"));
    }

    #[test]
    fn test_union_uses_alias_equality() {
        let t = (p("a") & p("b")) + (p("b") & p("a"));
        assert_eq!(t, Term::Interaction(vec![p("a"), p("b")]));
        let t = Term::Constant(1.0) + Term::Intercept(true);
        assert_eq!(t, Term::Constant(1.0));
    }

    #[test]
    fn test_interaction_flattens() {
        let t = (p("a") & p("b")) & (p("c") & p("d"));
        assert_eq!(t, Term::Interaction(vec![p("a"), p("b"), p("c"), p("d")]));
    }

    #[test]
    fn test_interaction_drops_constants() {
        assert_eq!(Term::Constant(1.0) & p("a"), p("a"));
        assert_eq!(p("a") & Term::Constant(0.0), p("a"));
        assert_eq!(Term::Constant(1.0) & Term::Constant(1.0), Term::Constant(1.0));
    }

    #[test]
    fn test_interaction_distributes_over_groups() {
        let t = (p("a") + p("b")) & p("c");
        assert_eq!(
            t,
            Term::Group(vec![
                Term::Interaction(vec![p("a"), p("c")]),
                Term::Interaction(vec![p("b"), p("c")]),
            ])
        );
    }

    #[test]
    fn test_alias_key_without() {
        let ab = (p("a") & p("b")).alias_key();
        assert_eq!(ab.without(&p("a").alias_key()), p("b").alias_key());
        let a = p("a").alias_key();
        assert_eq!(a.without(&a), AliasKey::intercept());
    }

    #[test]
    fn test_intercept_queries() {
        let t = Term::Constant(1.0) + p("a");
        assert!(t.has_intercept());
        assert!(!t.omits_intercept());
        let t = Term::Constant(-1.0) + p("a");
        assert!(t.omits_intercept());
        assert!(!p("a").has_intercept());
    }

    #[test]
    fn test_termvars_in_order() {
        let t = p("b") + (p("a") & p("b")) + p("c");
        assert_eq!(t.termvars(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_unresolved_width_is_an_error() {
        assert!(p("a").width().is_err());
        assert_eq!(Term::Intercept(true).width().unwrap(), 1);
        assert_eq!(Term::Intercept(false).width().unwrap(), 0);
    }

    #[test]
    fn test_kron_names_first_component_fastest() {
        let names = kron_names(vec![
            vec!["a: p".to_string(), "a: q".to_string()],
            vec!["b: r".to_string(), "b: s".to_string()],
        ]);
        assert_eq!(
            names,
            vec!["a: p & b: r", "a: q & b: r", "a: p & b: s", "a: q & b: s"]
        );
    }

    #[test]
    fn test_display() {
        let t = Term::Constant(1.0) + p("a") + (p("a") & p("b"));
        assert_eq!(t.to_string(), "1 + a + a & b");
    }
}
