//! Trait definitions

use crate::{operators::OperatorTerm, tree::MWTree, types::Result};

/// Two-scale relation between a node's compressed coefficients and its children's scaling
/// coefficients.
///
/// A compressed block holds `t_dim` consecutive sub-blocks of `kp1_d` values, the scaling
/// coefficients first and the wavelet coefficients after. A reconstructed block holds the
/// `t_dim` children's scaling coefficients in child index order. Both have `kp1_d * t_dim`
/// entries. The tree treats the arithmetic as opaque.
pub trait TwoScaleFilter: Send + Sync {
    /// Number of scaling functions per node, `(order + 1)^D`.
    fn kp1_d(&self) -> usize;

    /// Number of children per node, `2^D`.
    fn t_dim(&self) -> usize;

    /// Compress the children's scaling coefficients into a parent's scaling and wavelet
    /// coefficients.
    fn compress(&self, children: &[f64], parent: &mut [f64]);

    /// Reconstruct the children's scaling coefficients from a parent's scaling and wavelet
    /// coefficients.
    fn reconstruct(&self, parent: &[f64], children: &mut [f64]);
}

/// Projection of a single one-dimensional kernel term onto an operator tree. Implementations
/// refine the tree as needed and fill its coefficients.
pub trait TermProjector {
    /// Project `term` to precision `prec` into `tree`.
    fn project(&self, term: &OperatorTerm, prec: f64, tree: &mut MWTree<2>) -> Result<()>;
}
