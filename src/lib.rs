//! termula -- parse once, resolve per table, evaluate often
//!
//! Termula turns model formulas such as `y ~ 1 + a * b + log(x)` into
//! term trees, types them against a table (continuous or categorical,
//! with contrast coding chosen so the model matrix is neither redundant
//! nor incomplete), and generates the response and model matrix.
//!
//! Calls outside the formula language (`log(x)`, `(x + 1) ^ 2`) are
//! compiled once and evaluated element-wise for every row.
//!
//! Full usage example:
//! ```
//! use termula::context::StatisticalModel;
//! use termula::data::{Column, ColumnTable};
//! use termula::formula::Formula;
//! use termula::schema::{schema, Hints};
//! use termula::{apply_schema, model_cols};
//!
//! let data = ColumnTable::from_columns(vec![
//!     ("y", Column::from(vec![1.0, 2.0, 4.0, 3.0])),
//!     ("x", Column::from(vec![0.5, 1.0, 2.0, 4.0])),
//!     ("g", Column::from(vec!["p", "q", "p", "q"])),
//! ])
//! .unwrap();
//! let f = Formula::parse("y ~ g + log(x)").unwrap();
//! let s = schema(&f.to_term(), &data, &Hints::new()).unwrap();
//! let f = apply_schema(&f, &s, &StatisticalModel).unwrap();
//! let (y, mm) = model_cols(&f, &data).unwrap();
//! assert_eq!(y.ncols(), 1);
//! assert_eq!(mm.coefnames, vec!["(Intercept)", "g: q", "log(x)"]);
//! ```

pub mod apply;
pub mod context;
pub mod contrasts;
pub mod data;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod function;
pub mod modelcols;
pub mod parse;
pub mod registry;
pub mod rewrite;
pub mod schema;
pub mod term;

pub use apply::{apply_schema, apply_schema_term, apply_schema_with};
pub use error::{Error, Result};
pub use formula::Formula;
pub use modelcols::{columns, model_cols, row_values, ModelMatrix};
pub use term::Term;
