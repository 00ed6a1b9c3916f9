//! # Traits
//!
//! $$
//! f:\Delta_{[l,u]}\subset\mathbb R^n\to\mathbb R
//! $$
//!
use ndarray::ArrayView1;

/// Scalar objective minimized by [`crate::portfolio::solver::ConstrainedSolver`].
///
/// Implementations receive a weight vector that already lies on the feasible
/// box-simplex.
pub trait ObjectiveExt: Send + Sync {
  fn value(&self, w: &[f64]) -> f64;

  fn name(&self) -> &'static str {
    "objective"
  }
}

/// Constraint on the weight vector handled by the augmented-Lagrangian loop.
///
/// Equalities are satisfied at `value(w) == 0`, inequalities at `value(w) >= 0`.
pub trait ConstraintExt: Send + Sync {
  fn value(&self, w: &[f64]) -> f64;

  fn is_equality(&self) -> bool;

  fn label(&self) -> String;
}

pub(crate) fn view(w: &[f64]) -> ArrayView1<'_, f64> {
  ArrayView1::from(w)
}
