//! Coding schemes: how the levels of a categorical variable map to
//! numeric columns.
//!
//! Reduced-rank schemes produce `levels x (levels - 1)` matrices,
//! `FullDummy` produces `levels x levels`. Term resolution depends only on
//! that shape, never on the coding math.

use std::collections::HashSet;

use ndarray::Array2;

use crate::error::CodingError;

#[derive(Debug, Clone, PartialEq)]
pub enum Coding {
    /// Indicator columns for every level except the base.
    Dummy,
    /// Indicator columns for every level.
    FullDummy,
    /// Like `Dummy`, with the base row coded as -1.
    Effects,
    /// Each level against the mean of the levels before it.
    Helmert,
    /// A user supplied `levels x (levels - 1)` matrix, rows in level order.
    Manual {
        matrix: Vec<Vec<f64>>,
        labels: Option<Vec<String>>,
    },
}

/// A coding scheme with its optional base level and level order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContrastSpec {
    pub coding: Coding,
    pub base: Option<String>,
    pub levels: Option<Vec<String>>,
}

impl ContrastSpec {
    pub fn new(coding: Coding) -> ContrastSpec {
        ContrastSpec {
            coding,
            base: None,
            levels: None,
        }
    }

    pub fn with_base<S: Into<String>>(mut self, base: S) -> ContrastSpec {
        self.base = Some(base.into());
        self
    }

    pub fn with_levels<S: Into<String>, I: IntoIterator<Item = S>>(mut self, levels: I) -> ContrastSpec {
        self.levels = Some(levels.into_iter().map(Into::into).collect());
        self
    }

    /// Materialize the contrast matrix for the levels observed in the data.
    pub fn matrix(&self, observed: &[String]) -> Result<ContrastsMatrix, CodingError> {
        let levels = match &self.levels {
            Some(requested) => {
                check_duplicates(requested)?;
                let missing: Vec<String> = observed
                    .iter()
                    .filter(|l| !requested.contains(l))
                    .cloned()
                    .collect();
                let unexpected: Vec<String> = requested
                    .iter()
                    .filter(|l| !observed.contains(l))
                    .cloned()
                    .collect();
                if !missing.is_empty() || !unexpected.is_empty() {
                    return Err(CodingError::LevelMismatch {
                        missing,
                        unexpected,
                    });
                }
                requested.clone()
            }
            None => observed.to_vec(),
        };
        ContrastsMatrix::new(self.coding.clone(), self.base.clone(), levels)
    }
}

impl Default for ContrastSpec {
    fn default() -> ContrastSpec {
        ContrastSpec::new(Coding::Dummy)
    }
}

fn check_duplicates(levels: &[String]) -> Result<(), CodingError> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = levels
        .iter()
        .filter(|l| !seen.insert(l.as_str()))
        .cloned()
        .collect();
    if duplicates.is_empty() {
        Ok(())
    } else {
        duplicates.dedup();
        Err(CodingError::DuplicateLevels(duplicates))
    }
}

/// A concrete contrast matrix: one row per level, one column per
/// generated model column.
#[derive(Debug, Clone, PartialEq)]
pub struct ContrastsMatrix {
    coding: Coding,
    base: Option<String>,
    levels: Vec<String>,
    matrix: Array2<f64>,
    coefnames: Vec<String>,
}

impl ContrastsMatrix {
    pub fn new(
        coding: Coding,
        base: Option<String>,
        levels: Vec<String>,
    ) -> Result<ContrastsMatrix, CodingError> {
        check_duplicates(&levels)?;
        let k = levels.len();
        if k == 0 {
            return Err(CodingError::NoLevels);
        }
        let base_index = match &base {
            Some(b) => levels
                .iter()
                .position(|l| l == b)
                .ok_or_else(|| CodingError::BaseNotFound(b.clone()))?,
            None => 0,
        };
        let not_base = |j: usize| if j < base_index { j } else { j + 1 };

        let (matrix, coefnames) = match &coding {
            Coding::Dummy | Coding::Effects => {
                let mut m = Array2::zeros((k, k - 1));
                for j in 0..k - 1 {
                    m[[not_base(j), j]] = 1.0;
                    if coding == Coding::Effects {
                        m[[base_index, j]] = -1.0;
                    }
                }
                let names = (0..k - 1).map(|j| levels[not_base(j)].clone()).collect();
                (m, names)
            }
            Coding::FullDummy => (Array2::eye(k), levels.clone()),
            Coding::Helmert => {
                let mut m = Array2::zeros((k, k - 1));
                for j in 0..k - 1 {
                    for i in 0..=j {
                        m[[i, j]] = -1.0;
                    }
                    m[[j + 1, j]] = (j + 1) as f64;
                }
                (m, levels[1..].to_vec())
            }
            Coding::Manual { matrix, labels } => {
                let rows = matrix.len();
                let cols = matrix.first().map(Vec::len).unwrap_or(0);
                if rows != k || cols != k - 1 || matrix.iter().any(|r| r.len() != cols) {
                    return Err(CodingError::Shape {
                        rows: k,
                        cols: k - 1,
                        found_rows: rows,
                        found_cols: cols,
                    });
                }
                let m = Array2::from_shape_fn((k, k - 1), |(i, j)| matrix[i][j]);
                let names = match labels {
                    Some(labels) if labels.len() != k - 1 => {
                        return Err(CodingError::Labels {
                            expected: k - 1,
                            found: labels.len(),
                        })
                    }
                    Some(labels) => labels.clone(),
                    None => levels[1..].to_vec(),
                };
                (m, names)
            }
        };

        Ok(ContrastsMatrix {
            coding,
            base,
            levels,
            matrix,
            coefnames,
        })
    }

    /// Same levels, one indicator column per level.
    pub fn full_rank(&self) -> ContrastsMatrix {
        ContrastsMatrix {
            coding: Coding::FullDummy,
            base: None,
            levels: self.levels.clone(),
            matrix: Array2::eye(self.levels.len()),
            coefnames: self.levels.clone(),
        }
    }

    pub fn coding(&self) -> &Coding {
        &self.coding
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn coefnames(&self) -> &[String] {
        &self.coefnames
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn levels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dummy_coding() {
        let c = ContrastsMatrix::new(Coding::Dummy, None, levels(&["a", "b", "c"])).unwrap();
        assert_eq!(c.matrix(), &array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(c.coefnames(), &["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_dummy_coding_with_base() {
        let c = ContrastsMatrix::new(Coding::Dummy, Some("b".into()), levels(&["a", "b", "c"]))
            .unwrap();
        assert_eq!(c.matrix(), &array![[1.0, 0.0], [0.0, 0.0], [0.0, 1.0]]);
        assert_eq!(c.coefnames(), &["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_effects_and_helmert() {
        let c = ContrastsMatrix::new(Coding::Effects, None, levels(&["a", "b", "c"])).unwrap();
        assert_eq!(c.matrix(), &array![[-1.0, -1.0], [1.0, 0.0], [0.0, 1.0]]);
        let c = ContrastsMatrix::new(Coding::Helmert, None, levels(&["a", "b", "c"])).unwrap();
        assert_eq!(c.matrix(), &array![[-1.0, -1.0], [1.0, -1.0], [0.0, 2.0]]);
    }

    #[test]
    fn test_full_rank_promotion_keeps_levels() {
        let c = ContrastsMatrix::new(Coding::Effects, None, levels(&["p", "q"])).unwrap();
        let full = c.full_rank();
        assert_eq!(full.levels(), c.levels());
        assert_eq!(full.ncols(), 2);
        assert_eq!(full.matrix(), &Array2::eye(2));
    }

    #[test]
    fn test_coding_errors() {
        let observed = levels(&["p", "q"]);
        let spec = ContrastSpec::default().with_levels(vec!["p", "r"]);
        assert_eq!(
            spec.matrix(&observed),
            Err(CodingError::LevelMismatch {
                missing: vec!["q".to_string()],
                unexpected: vec!["r".to_string()],
            })
        );
        let spec = ContrastSpec::default().with_levels(vec!["p", "q", "p"]);
        assert_eq!(
            spec.matrix(&observed),
            Err(CodingError::DuplicateLevels(vec!["p".to_string()]))
        );
        let spec = ContrastSpec::default().with_base("z");
        assert_eq!(spec.matrix(&observed), Err(CodingError::BaseNotFound("z".to_string())));
        let spec = ContrastSpec::new(Coding::Manual {
            matrix: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            labels: None,
        });
        assert!(matches!(spec.matrix(&observed), Err(CodingError::Shape { .. })));
    }

    #[test]
    fn test_requested_level_order_is_kept() {
        let spec = ContrastSpec::default().with_levels(vec!["q", "p"]);
        let c = spec.matrix(&levels(&["p", "q"])).unwrap();
        assert_eq!(c.levels(), &["q".to_string(), "p".to_string()]);
        assert_eq!(c.coefnames(), &["p".to_string()]);
    }
}
