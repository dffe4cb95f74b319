//! Model contexts: tags describing the kind of model a formula is
//! resolved for. They decide how the intercept is treated and which call
//! handlers apply.

/// A model kind. Both intercept traits default to `false`; a context
/// must not answer `true` to both.
pub trait ModelContext {
    /// Name used to look up call handlers.
    fn kind(&self) -> &'static str;

    /// Whether the model has an intercept even when the formula does not
    /// mention one.
    fn implicit_intercept(&self) -> bool {
        false
    }

    /// Whether the model provides the intercept itself, forbidding it in
    /// the formula.
    fn drop_intercept(&self) -> bool {
        false
    }
}

/// No model: formulas are taken literally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModel;

impl ModelContext for NoModel {
    fn kind(&self) -> &'static str {
        "NoModel"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalModel;

impl ModelContext for StatisticalModel {
    fn kind(&self) -> &'static str {
        "StatisticalModel"
    }

    fn implicit_intercept(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionModel;

impl ModelContext for RegressionModel {
    fn kind(&self) -> &'static str {
        "RegressionModel"
    }

    fn implicit_intercept(&self) -> bool {
        true
    }
}

/// Models that absorb the intercept, e.g. fixed-effects models.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropInterceptModel;

impl ModelContext for DropInterceptModel {
    fn kind(&self) -> &'static str {
        "DropInterceptModel"
    }

    fn drop_intercept(&self) -> bool {
        true
    }
}
