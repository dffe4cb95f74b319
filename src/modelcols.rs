//! Numeric columns of resolved terms.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::{s, Array1, Array2, Axis};

use crate::data::{Row, Table};
use crate::error::{ColumnError, Result};
use crate::formula::Formula;
use crate::function::FunctionCall;
use crate::term::{CategoricalTerm, Term};

/// Predictor matrix with, per column, the index of the rhs term that
/// produced it and its coefficient name.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMatrix {
    pub matrix: Array2<f64>,
    pub assign: Vec<usize>,
    pub coefnames: Vec<String>,
}

impl ModelMatrix {
    /// Writes the matrix column by column as little-endian `f64`.
    pub fn write_f64_le<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for column in self.matrix.axis_iter(Axis(1)) {
            for x in column.iter() {
                out.write_f64::<LittleEndian>(*x)?;
            }
        }
        Ok(())
    }
}

/// Response columns and the model matrix of a resolved formula.
pub fn model_cols(formula: &Formula, data: &dyn Table) -> Result<(Array2<f64>, ModelMatrix)> {
    let response = columns(&formula.lhs, data)?;
    let mut blocks = Vec::new();
    let mut assign = Vec::new();
    let mut coefnames = Vec::new();
    for (i, term) in logical_terms(&formula.rhs).into_iter().enumerate() {
        let block = columns(term, data)?;
        assign.extend(std::iter::repeat(i).take(block.ncols()));
        coefnames.extend(term.coefnames()?);
        blocks.push(block);
    }
    let matrix = hcat(blocks, data.nrows());
    Ok((
        response,
        ModelMatrix {
            matrix,
            assign,
            coefnames,
        },
    ))
}

/// The rhs terms columns are assigned to; matrix blocks are looked
/// through.
fn logical_terms(rhs: &Term) -> Vec<&Term> {
    let mut terms = Vec::new();
    for component in rhs.components() {
        match component {
            Term::Matrix(inner) => terms.extend(inner.iter()),
            other => terms.push(other),
        }
    }
    terms
}

/// Model columns of a resolved term, one row per data row.
pub fn columns(term: &Term, data: &dyn Table) -> Result<Array2<f64>> {
    let n = data.nrows();
    Ok(match term {
        Term::Placeholder(_) | Term::Constant(_) => {
            return Err(ColumnError::Unresolved(term.to_string()).into())
        }
        Term::Intercept(true) => Array2::ones((n, 1)),
        Term::Intercept(false) => Array2::zeros((n, 0)),
        Term::Continuous(t) => numeric(&t.name, data)?.insert_axis(Axis(1)),
        Term::Categorical(t) => categorical(t, data)?,
        Term::Interaction(parts) => {
            let parts = parts
                .iter()
                .map(|t| columns(t, data))
                .collect::<Result<Vec<_>>>()?;
            row_kron(&parts, n)
        }
        Term::Function(call) => function(call, data)?.insert_axis(Axis(1)),
        Term::Custom(c) => c.columns(data)?,
        Term::Group(parts) | Term::Matrix(parts) => {
            let blocks = parts
                .iter()
                .map(|t| columns(t, data))
                .collect::<Result<Vec<_>>>()?;
            hcat(blocks, n)
        }
        Term::Formula(f) => columns(&f.rhs, data)?,
    })
}

fn numeric(name: &str, data: &dyn Table) -> Result<Array1<f64>> {
    let values = data
        .column(name)
        .ok_or_else(|| ColumnError::MissingColumn(name.to_string()))?
        .to_f64()
        .ok_or_else(|| ColumnError::NotNumeric(name.to_string()))?;
    Ok(Array1::from(values))
}

fn categorical(term: &CategoricalTerm, data: &dyn Table) -> Result<Array2<f64>> {
    let levels = data
        .column(&term.name)
        .ok_or_else(|| ColumnError::MissingColumn(term.name.clone()))?
        .levels_per_row();
    let contrasts = term.contrasts.matrix();
    let mut out = Array2::zeros((levels.len(), contrasts.ncols()));
    for (mut row, level) in out.axis_iter_mut(Axis(0)).zip(&levels) {
        let i = level_index(term, level)?;
        row.assign(&contrasts.row(i));
    }
    Ok(out)
}

fn level_index(term: &CategoricalTerm, level: &str) -> Result<usize> {
    term.contrasts.level_index(level).ok_or_else(|| {
        ColumnError::UnseenLevel {
            name: term.name.clone(),
            level: level.to_string(),
        }
        .into()
    })
}

fn function(call: &FunctionCall, data: &dyn Table) -> Result<Array1<f64>> {
    let args = call
        .args()
        .iter()
        .map(|t| columns(t, data))
        .collect::<Result<Vec<_>>>()?;
    let mut instance = call.program().instantiate();
    let mut out = Array1::zeros(data.nrows());
    for (r, value) in out.iter_mut().enumerate() {
        for (slot, arg) in args.iter().enumerate() {
            instance.set_f64(slot, arg.get((r, 0)).copied().unwrap_or(f64::NAN));
        }
        *value = instance.run()?;
    }
    Ok(out)
}

/// Row-wise Kronecker product; the first part's columns vary fastest.
fn row_kron(parts: &[Array2<f64>], n: usize) -> Array2<f64> {
    let mut acc = Array2::ones((n, 1));
    for part in parts {
        let (w, pw) = (acc.ncols(), part.ncols());
        let mut next = Array2::zeros((n, w * pw));
        for j2 in 0..pw {
            let mut block = next.slice_mut(s![.., j2 * w..(j2 + 1) * w]);
            block.assign(&acc);
            block *= &part.column(j2).insert_axis(Axis(1));
        }
        acc = next;
    }
    acc
}

fn hcat(blocks: Vec<Array2<f64>>, n: usize) -> Array2<f64> {
    let width = blocks.iter().map(Array2::ncols).sum();
    let mut out = Array2::zeros((n, width));
    let mut start = 0;
    for block in blocks {
        let w = block.ncols();
        out.slice_mut(s![.., start..start + w]).assign(&block);
        start += w;
    }
    out
}

/// Model columns of a resolved term for a single observation.
pub fn row_values(term: &Term, row: &Row) -> Result<Vec<f64>> {
    Ok(match term {
        Term::Placeholder(_) | Term::Constant(_) => {
            return Err(ColumnError::Unresolved(term.to_string()).into())
        }
        Term::Intercept(true) => vec![1.0],
        Term::Intercept(false) => Vec::new(),
        Term::Continuous(t) => vec![row
            .get(&t.name)
            .ok_or_else(|| ColumnError::MissingColumn(t.name.clone()))?
            .as_f64()
            .ok_or_else(|| ColumnError::NotNumeric(t.name.clone()))?],
        Term::Categorical(t) => {
            let level = row
                .get(&t.name)
                .ok_or_else(|| ColumnError::MissingColumn(t.name.clone()))?
                .level();
            t.contrasts.matrix().row(level_index(t, &level)?).to_vec()
        }
        Term::Interaction(parts) => {
            let mut acc = vec![1.0];
            for part in parts {
                let values = row_values(part, row)?;
                acc = values
                    .iter()
                    .flat_map(|v| acc.iter().map(move |a| a * v))
                    .collect();
            }
            acc
        }
        Term::Function(call) => {
            let mut instance = call.program().instantiate();
            for (slot, arg) in call.args().iter().enumerate() {
                let value = row_values(arg, row)?.first().copied().unwrap_or(f64::NAN);
                instance.set_f64(slot, value);
            }
            vec![instance.run()?]
        }
        Term::Custom(c) => c.row_values(row)?,
        Term::Group(parts) | Term::Matrix(parts) => {
            let mut values = Vec::new();
            for part in parts {
                values.extend(row_values(part, row)?);
            }
            values
        }
        Term::Formula(f) => row_values(&f.rhs, row)?,
    })
}
