//! Data-dependent invariants of the variables a formula uses.

use std::collections::HashMap;

use tracing::debug;

use crate::contrasts::ContrastSpec;
use crate::data::{Column, Table};
use crate::error::{ResolutionError, Result};
use crate::term::{CategoricalTerm, ContinuousTerm, Term};

/// How a column should be typed, overriding inspection of its values.
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    Continuous,
    Categorical,
    Contrasts(ContrastSpec),
}

pub type Hints = HashMap<String, Hint>;

/// Mapping from variable name to its concrete term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    terms: HashMap<String, Term>,
}

impl Schema {
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.terms.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.terms.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.terms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Compute the schema for the variables `term` refers to. Columns the
/// term does not use are never inspected.
pub fn schema(term: &Term, data: &dyn Table, hints: &Hints) -> Result<Schema> {
    let mut terms = HashMap::new();
    for name in term.termvars() {
        let column = data
            .column(&name)
            .ok_or_else(|| unknown_column(&name, &data.column_names()))?;
        let concrete = concrete_term(&name, column, hints.get(&name))?;
        debug!("schema: {} => {:?}", name, concrete);
        terms.insert(name, concrete);
    }
    Ok(Schema { terms })
}

/// The concrete term for one column.
pub fn concrete_term(name: &str, column: &Column, hint: Option<&Hint>) -> Result<Term> {
    let numeric = column.is_numeric();
    match hint {
        Some(Hint::Continuous) => continuous(name, column),
        Some(Hint::Categorical) => categorical(name, column, &ContrastSpec::default()),
        Some(Hint::Contrasts(spec)) => categorical(name, column, spec),
        None if numeric => continuous(name, column),
        None => categorical(name, column, &ContrastSpec::default()),
    }
}

fn continuous(name: &str, column: &Column) -> Result<Term> {
    let values = column
        .to_f64()
        .ok_or_else(|| ResolutionError::NotNumeric(name.to_string()))?;
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = if n < 2 {
        0.0
    } else {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    };
    let min = values.iter().copied().fold(f64::NAN, f64::min);
    let max = values.iter().copied().fold(f64::NAN, f64::max);
    Ok(Term::Continuous(ContinuousTerm {
        name: name.to_string(),
        mean,
        var,
        min,
        max,
    }))
}

fn categorical(name: &str, column: &Column, spec: &ContrastSpec) -> Result<Term> {
    let contrasts = spec.matrix(&column.unique_levels())?;
    Ok(Term::Categorical(CategoricalTerm {
        name: name.to_string(),
        contrasts,
    }))
}

pub(crate) fn unknown_column(name: &str, known: &[&str]) -> ResolutionError {
    ResolutionError::UnknownColumn {
        name: name.to_string(),
        suggestions: suggestions(name, known),
    }
}

/// Up to three known names closest to `name` by case-insensitive edit
/// distance, skipping names that share nothing with it.
pub fn suggestions(name: &str, known: &[&str]) -> Vec<String> {
    let needle: Vec<char> = name.to_lowercase().chars().collect();
    let mut ranked: Vec<(usize, &str)> = known
        .iter()
        .map(|k| (levenshtein(&k.to_lowercase(), &needle), *k))
        .filter(|(d, k)| *d < k.chars().count().max(needle.len()))
        .collect();
    ranked.sort();
    ranked.into_iter().take(3).map(|(_, k)| k.to_string()).collect()
}

fn levenshtein(value: &str, needle: &[char]) -> usize {
    let n = needle.len();
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];
    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = if c == needle[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}
