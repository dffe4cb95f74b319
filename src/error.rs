use thiserror::Error;

/// Errors raised while parsing and rewriting surface syntax, before any
/// data is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    #[error("cannot parse formula at `{0}`")]
    Parse(String),

    #[error("unexpected trailing input `{0}`")]
    TrailingInput(String),

    #[error("formula must have the form `lhs ~ rhs`, got `{0}`")]
    MissingTilde(String),

    #[error("`~` may only appear once, at the top of a formula: `{0}`")]
    NestedTilde(String),

    #[error("`{head}` takes {expected} argument(s), got {found}")]
    Arity {
        head: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid literal {0}: only -1, 0 and 1 are allowed outside function calls")]
    InvalidLiteral(f64),

    #[error("only `1` can be subtracted in a formula, got `{0}`")]
    InvalidSubtraction(String),

    #[error("`unprotect` is only meaningful inside a function call: `{0}`")]
    MisplacedUnprotect(String),
}

/// Errors raised while applying a schema to a term tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("column `{name}` not found{}", suggest(.suggestions))]
    UnknownColumn {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("`{name}` is {found} but {expected} was expected")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("column `{0}` is not numeric and cannot be continuous")]
    NotNumeric(String),

    #[error("model type `{0}` does not support an intercept term in the formula")]
    InterceptForbidden(&'static str),

    #[error("model type `{0}` both implies and drops the intercept")]
    ContradictoryContext(&'static str),

    #[error("invalid constant {0}: only -1, 0 and 1 describe an intercept")]
    InvalidConstant(f64),

    #[error("`{call}`: degree must be a positive integer literal, got `{found}`")]
    InvalidDegree { call: String, found: String },

    #[error("`{call}` expects {expected} argument(s), got {found}")]
    Arity {
        call: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown function `{function}` in `{call}`")]
    UnknownFunction { call: String, function: String },

    #[error("argument `{arg}` of `{call}` has {width} columns, element-wise calls need exactly one")]
    ArgumentWidth {
        call: String,
        arg: String,
        width: usize,
    },

    #[error("cannot resolve `{0}` inside a term")]
    Unsupported(String),
}

fn suggest(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!("; did you mean: {}?", suggestions.join(", "))
    }
}

/// Errors raised when a contrast matrix is materialized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodingError {
    #[error("requested levels do not match the data: missing {missing:?}, unexpected {unexpected:?}")]
    LevelMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("duplicate levels {0:?}")]
    DuplicateLevels(Vec<String>),

    #[error("base level `{0}` is not one of the levels")]
    BaseNotFound(String),

    #[error("contrast matrix must be {rows}x{cols}, got {found_rows}x{found_cols}")]
    Shape {
        rows: usize,
        cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("contrast labels must number {expected}, got {found}")]
    Labels { expected: usize, found: usize },

    #[error("cannot code a variable without levels")]
    NoLevels,
}

/// Errors raised while generating model columns from data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ColumnError {
    #[error("term `{0}` has no schema applied")]
    Unresolved(String),

    #[error("column `{0}` is missing from the data")]
    MissingColumn(String),

    #[error("level `{level}` of `{name}` was not seen when the schema was built")]
    UnseenLevel { name: String, level: String },

    #[error("column `{0}` is not numeric")]
    NotNumeric(String),

    #[error("column `{name}` has {found} rows, expected {expected}")]
    RowCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Coding(#[from] CodingError),

    #[error(transparent)]
    Column(#[from] ColumnError),
}

pub type Result<T> = std::result::Result<T, Error>;
