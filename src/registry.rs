//! Custom resolution of calls, keyed by call head and model kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};

use crate::context::ModelContext;
use crate::data::{Row, Table};
use crate::error::{ColumnError, ResolutionError, Result};
use crate::function::FunctionCall;
use crate::parse::Expr;
use crate::schema::{unknown_column, Schema};
use crate::term::{ContinuousTerm, Term};

/// Model kind matching every context.
pub const ANY_CONTEXT: &str = "*";

/// Highest degree `poly` accepts.
pub const MAX_POLY_DEGREE: usize = 64;

/// Resolves a call to a term in place of element-wise evaluation.
pub trait CallHandler: Send + Sync {
    fn resolve(&self, call: &FunctionCall, schema: &Schema, context: &dyn ModelContext)
        -> Result<Term>;
}

impl<F> CallHandler for F
where
    F: Fn(&FunctionCall, &Schema, &dyn ModelContext) -> Result<Term> + Send + Sync,
{
    fn resolve(
        &self,
        call: &FunctionCall,
        schema: &Schema,
        context: &dyn ModelContext,
    ) -> Result<Term> {
        self(call, schema, context)
    }
}

#[derive(Clone)]
pub struct Registry {
    handlers: HashMap<(String, String), Arc<dyn CallHandler>>,
}

impl Registry {
    /// A registry without any handlers.
    pub fn new() -> Registry {
        Registry {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for calls to `head` in contexts of kind `kind`
    /// (or [`ANY_CONTEXT`]), replacing any previous entry.
    pub fn register<H: CallHandler + 'static>(&mut self, head: &str, kind: &str, handler: H) {
        self.handlers
            .insert((head.to_string(), kind.to_string()), Arc::new(handler));
    }

    pub fn lookup(&self, head: &str, kind: &str) -> Option<&Arc<dyn CallHandler>> {
        self.handlers
            .get(&(head.to_string(), kind.to_string()))
            .or_else(|| self.handlers.get(&(head.to_string(), ANY_CONTEXT.to_string())))
    }
}

impl Default for Registry {
    fn default() -> Registry {
        let mut registry = Registry::new();
        registry.register("poly", "StatisticalModel", Poly);
        registry.register("poly", "RegressionModel", Poly);
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("Registry").field("handlers", &keys).finish()
    }
}

/// `poly(x, d)`: raw powers `x^1..x^d` of a continuous variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Poly;

impl CallHandler for Poly {
    fn resolve(&self, call: &FunctionCall, schema: &Schema, _: &dyn ModelContext) -> Result<Term> {
        let args = call.original().args();
        if args.len() != 2 {
            return Err(ResolutionError::Arity {
                call: call.to_string(),
                expected: 2,
                found: args.len(),
            }
            .into());
        }
        let degree = match &args[1] {
            Expr::Number(d) if *d >= 1.0 && *d <= MAX_POLY_DEGREE as f64 && d.fract() == 0.0 => {
                *d as usize
            }
            other => {
                return Err(ResolutionError::InvalidDegree {
                    call: call.to_string(),
                    found: other.to_string(),
                }
                .into())
            }
        };
        let name = match &args[0] {
            Expr::Ident(name) => name,
            _ => return Err(ResolutionError::Unsupported(call.to_string()).into()),
        };
        match schema.get(name) {
            Some(Term::Continuous(term)) => Ok(Term::Custom(Arc::new(PolyTerm {
                term: term.clone(),
                degree,
            }))),
            Some(_) => Err(ResolutionError::TypeMismatch {
                name: name.clone(),
                expected: "continuous",
                found: "categorical",
            }
            .into()),
            None => Err(unknown_column(name, &schema.names()).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolyTerm {
    pub term: ContinuousTerm,
    pub degree: usize,
}

impl PolyTerm {
    fn powers(&self, x: f64) -> impl Iterator<Item = f64> {
        (1..=self.degree).scan(1.0, move |acc, _| {
            *acc *= x;
            Some(*acc)
        })
    }
}

impl crate::term::CustomTerm for PolyTerm {
    fn label(&self) -> String {
        format!("poly({}, {})", self.term.name, self.degree)
    }

    fn width(&self) -> usize {
        self.degree
    }

    fn coefnames(&self) -> Vec<String> {
        let label = self.label();
        (1..=self.degree).map(|p| format!("{}^{}", label, p)).collect()
    }

    fn termvars(&self) -> Vec<String> {
        vec![self.term.name.clone()]
    }

    fn columns(&self, data: &dyn Table) -> Result<Array2<f64>> {
        let name = &self.term.name;
        let x = data
            .column(name)
            .ok_or_else(|| ColumnError::MissingColumn(name.clone()))?
            .to_f64()
            .ok_or_else(|| ColumnError::NotNumeric(name.clone()))?;
        let mut out = Array2::zeros((x.len(), self.degree));
        for (mut row, x) in out.axis_iter_mut(Axis(0)).zip(x) {
            row.assign(&self.powers(x).collect::<Array1<f64>>());
        }
        Ok(out)
    }

    fn row_values(&self, row: &Row) -> Result<Vec<f64>> {
        let name = &self.term.name;
        let x = row
            .get(name)
            .ok_or_else(|| ColumnError::MissingColumn(name.clone()))?
            .as_f64()
            .ok_or_else(|| ColumnError::NotNumeric(name.clone()))?;
        Ok(self.powers(x).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{NoModel, StatisticalModel};
    use crate::data::{Column, ColumnTable};
    use crate::error::Error;
    use crate::formula::term;
    use crate::schema::{schema, Hints};
    use crate::term::CustomTerm;

    fn table() -> ColumnTable {
        ColumnTable::from_columns(vec![
            ("x", Column::from(vec![1.0, 2.0, 3.0])),
            ("g", Column::from(vec!["p", "q", "p"])),
        ])
        .unwrap()
    }

    fn call(src: &str) -> (FunctionCall, Schema) {
        let t = term(src).unwrap();
        let s = schema(&t, &table(), &Hints::new()).unwrap();
        match t {
            Term::Function(call) => (call, s),
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_falls_back_to_any_context() {
        let mut registry = Registry::new();
        registry.register(
            "f",
            ANY_CONTEXT,
            |_: &FunctionCall, _: &Schema, _: &dyn ModelContext| -> Result<Term> {
                Ok(Term::Intercept(true))
            },
        );
        assert!(registry.lookup("f", "NoModel").is_some());
        assert!(registry.lookup("g", "NoModel").is_none());
        assert!(Registry::default().lookup("poly", NoModel.kind()).is_none());
        assert!(Registry::default().lookup("poly", StatisticalModel.kind()).is_some());
    }

    #[test]
    fn test_poly_columns() {
        let (c, s) = call("poly(x, 3)");
        let t = Poly.resolve(&c, &s, &StatisticalModel).unwrap();
        assert_eq!(t.width().unwrap(), 3);
        assert_eq!(
            t.coefnames().unwrap(),
            vec!["poly(x, 3)^1", "poly(x, 3)^2", "poly(x, 3)^3"]
        );
        match t {
            Term::Custom(p) => {
                let m = p.columns(&table()).unwrap();
                assert_eq!(m.row(2).to_vec(), vec![3.0, 9.0, 27.0]);
                let row = table().row(1).unwrap();
                assert_eq!(p.row_values(&row).unwrap(), vec![2.0, 4.0, 8.0]);
            }
            other => panic!("expected custom term, got {:?}", other),
        }
    }

    #[test]
    fn test_poly_degree_must_be_a_bounded_positive_integer() {
        let sources = [
            "poly(x, 0)",
            "poly(x, 1.5)",
            "poly(x, g)",
            "poly(x, 65)",
            "poly(x, 4294967297)",
        ];
        for src in &sources {
            let (c, s) = call(src);
            let err = Poly.resolve(&c, &s, &StatisticalModel).unwrap_err();
            assert!(
                matches!(err, Error::Resolution(ResolutionError::InvalidDegree { .. })),
                "{}: {:?}",
                src,
                err
            );
        }
    }

    #[test]
    fn test_poly_needs_continuous() {
        let (c, s) = call("poly(g, 2)");
        let err = Poly.resolve(&c, &s, &StatisticalModel).unwrap_err();
        assert!(matches!(err, Error::Resolution(ResolutionError::TypeMismatch { .. })));
    }
}
