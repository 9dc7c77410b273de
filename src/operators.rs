//! Convolution operators assembled from separable kernel expansions.
//!
//! A kernel is approximated by a finite sum of one-dimensional Gaussian-type terms. Each term is
//! projected into its own two-dimensional operator tree, which is then compressed so that its
//! norms can be used for screening.
use log::LevelFilter;

use crate::{
    traits::TermProjector,
    tree::MWTree,
    types::{Result, TransformDirection},
    verbosity::VerbosityGuard,
    world::{MultiResolutionAnalysis, WorldBox},
};

/// One term `coefficient * exp(-exponent * x^2)` of a kernel expansion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatorTerm {
    /// Gaussian exponent.
    pub exponent: f64,
    /// Prefactor.
    pub coefficient: f64,
}

impl OperatorTerm {
    /// Create a term.
    pub fn new(exponent: f64, coefficient: f64) -> Self {
        Self {
            exponent,
            coefficient,
        }
    }
}

/// A kernel as a list of terms, together with the precision it was fitted to.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelExpansion {
    terms: Vec<OperatorTerm>,
    precision: f64,
}

impl KernelExpansion {
    /// Create an expansion.
    pub fn new(terms: Vec<OperatorTerm>, precision: f64) -> Self {
        Self { terms, precision }
    }

    /// The terms.
    pub fn terms(&self) -> &[OperatorTerm] {
        &self.terms
    }

    /// Precision the expansion reaches.
    pub fn precision(&self) -> f64 {
        self.precision
    }

    /// Number of terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether there are no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Take the `dim`-th root of every coefficient, keeping its sign, so that a product of `dim`
    /// one-dimensional terms recovers the original prefactor.
    pub fn rescale(&mut self, dim: usize) {
        let power = 1.0 / dim as f64;
        for term in &mut self.terms {
            term.coefficient = term.coefficient.signum() * term.coefficient.abs().powf(power);
        }
    }
}

/// Reach covering the whole world box: the largest number of roots along any axis.
fn default_reach<const D: usize>(mra: &MultiResolutionAnalysis<D>) -> i64 {
    mra.world_box().n_boxes().iter().copied().max().unwrap_or(1) as i64
}

/// An operator as one compressed two-dimensional tree per kernel term.
pub struct ConvolutionOperator {
    build_precision: f64,
    kernel_precision: f64,
    components: Vec<MWTree<2>>,
}

impl ConvolutionOperator {
    /// Build an operator for functions on `mra`, with the roots at the function's root scale and
    /// a reach covering the whole world box.
    ///
    /// `build_kernel` receives the precision the kernel has to be fitted to, one tenth of `prec`.
    ///
    /// Logging is switched off while the terms are built, see [VerbosityGuard]. Operators should
    /// not be built concurrently on several threads.
    pub fn new<const D: usize, F, P>(
        mra: &MultiResolutionAnalysis<D>,
        prec: f64,
        build_kernel: F,
        projector: &P,
    ) -> Result<Self>
    where
        F: FnOnce(f64) -> KernelExpansion,
        P: TermProjector,
    {
        Self::build(
            mra,
            prec,
            prec / 10.0,
            mra.world_box().scale(),
            default_reach(mra),
            build_kernel,
            projector,
        )
    }

    /// Build an operator with explicit operator root scale and reach. A negative reach selects
    /// the default reach of [ConvolutionOperator::new]. The kernel is fitted to one hundredth
    /// of `prec`.
    pub fn with_root_reach<const D: usize, F, P>(
        mra: &MultiResolutionAnalysis<D>,
        prec: f64,
        root: i32,
        reach: i64,
        build_kernel: F,
        projector: &P,
    ) -> Result<Self>
    where
        F: FnOnce(f64) -> KernelExpansion,
        P: TermProjector,
    {
        let reach = if reach < 0 { default_reach(mra) } else { reach };
        Self::build(mra, prec, prec / 100.0, root, reach, build_kernel, projector)
    }

    fn build<const D: usize, F, P>(
        mra: &MultiResolutionAnalysis<D>,
        prec: f64,
        kern_prec: f64,
        root: i32,
        reach: i64,
        build_kernel: F,
        projector: &P,
    ) -> Result<Self>
    where
        F: FnOnce(f64) -> KernelExpansion,
        P: TermProjector,
    {
        debug_assert!(reach >= 0);
        let n_translations = (2 * reach + 1) as usize;
        let world = WorldBox::new(root, [0, -reach], [1, n_translations])?;
        let op_mra = MultiResolutionAnalysis::new(world, mra.order())
            .with_max_depth(mra.max_scale().saturating_sub(root).max(0) as u32);

        let (kernel, components) = {
            let _quiet = VerbosityGuard::new(LevelFilter::Off);
            let mut kernel = build_kernel(kern_prec);
            kernel.rescale(D);

            let mut components = Vec::with_capacity(kernel.len());
            for (i, term) in kernel.terms().iter().enumerate() {
                let mut tree = MWTree::new(op_mra.clone(), &format!("term {i}"))?;
                projector.project(term, prec, &mut tree)?;
                tree.mw_transform(TransformDirection::Up, true);
                tree.calc_square_norm();
                tree.make_max_square_norms();
                components.push(tree);
            }
            (kernel, components)
        };

        if kernel.precision() > kern_prec {
            log::warn!(
                "Kernel expansion reaches precision {:e}, requested {:e}",
                kernel.precision(),
                kern_prec
            );
        }
        log::info!(
            "Built convolution operator with {} terms at precision {:e}",
            components.len(),
            prec
        );

        Ok(Self {
            build_precision: prec,
            kernel_precision: kern_prec,
            components,
        })
    }

    /// Number of kernel terms.
    pub fn n_terms(&self) -> usize {
        self.components.len()
    }

    /// Operator tree of term `i`.
    pub fn component(&self, i: usize) -> &MWTree<2> {
        &self.components[i]
    }

    /// All operator trees in term order.
    pub fn components(&self) -> &[MWTree<2>] {
        &self.components
    }

    /// Precision the terms were projected to.
    pub fn build_precision(&self) -> f64 {
        self.build_precision
    }

    /// Precision requested from the kernel expansion.
    pub fn kernel_precision(&self) -> f64 {
        self.kernel_precision
    }
}
