//! Node headers stored in the allocator's slots.
use crate::{allocator::NodeHandle, constants::NOT_COMPUTED, index::NodeIndex};

/// Header of a tree node. The coefficient block lives next to it in the same allocator slot and
/// is reached through the tree or the allocator with the node's handle.
#[derive(Debug, Clone)]
pub struct MWNode<const D: usize> {
    handle: NodeHandle,
    index: NodeIndex<D>,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    has_coefs: bool,
    square_norm: f64,
    component_norms: Vec<f64>,
    max_square_norm: f64,
    max_w_square_norm: f64,
}

impl<const D: usize> MWNode<D> {
    pub(crate) fn new(handle: NodeHandle, index: NodeIndex<D>, parent: Option<NodeHandle>) -> Self {
        Self {
            handle,
            index,
            parent,
            children: Vec::new(),
            has_coefs: false,
            square_norm: NOT_COMPUTED,
            component_norms: vec![NOT_COMPUTED; 1 << D],
            max_square_norm: NOT_COMPUTED,
            max_w_square_norm: NOT_COMPUTED,
        }
    }

    /// Handle of the slot holding this node.
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// Tree coordinate of the node.
    pub fn index(&self) -> &NodeIndex<D> {
        &self.index
    }

    /// Scale of the node.
    pub fn scale(&self) -> i32 {
        self.index.scale()
    }

    /// Parent handle, `None` for roots.
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// Children in child index order, empty for end nodes.
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// Child with child index `c`.
    pub fn child(&self, c: usize) -> NodeHandle {
        self.children[c]
    }

    /// Whether the node has no children.
    pub fn is_end_node(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the node has children.
    pub fn is_branch_node(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether the node is a root.
    pub fn is_root_node(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether the coefficient block holds data.
    pub fn has_coefs(&self) -> bool {
        self.has_coefs
    }

    /// Cached squared norm, `NOT_COMPUTED` when stale.
    pub fn square_norm(&self) -> f64 {
        self.square_norm
    }

    /// Cached squared norm of the scaling block.
    pub fn scaling_norm(&self) -> f64 {
        self.component_norms[0]
    }

    /// Cached squared norm of the wavelet blocks.
    pub fn wavelet_norm(&self) -> f64 {
        if self.square_norm < 0.0 {
            return NOT_COMPUTED;
        }
        self.component_norms[1..].iter().sum()
    }

    /// Cached squared norm of block `i`.
    pub fn component_norm(&self, i: usize) -> f64 {
        self.component_norms[i]
    }

    /// Largest squared norm in the subtree below and including this node.
    pub fn max_square_norm(&self) -> f64 {
        self.max_square_norm
    }

    /// Largest squared wavelet norm in the subtree below and including this node.
    pub fn max_w_square_norm(&self) -> f64 {
        self.max_w_square_norm
    }

    pub(crate) fn set_children(&mut self, children: Vec<NodeHandle>) {
        debug_assert!(children.is_empty() || children.len() == 1 << D);
        self.children = children;
    }

    pub(crate) fn take_children(&mut self) -> Vec<NodeHandle> {
        std::mem::take(&mut self.children)
    }

    pub(crate) fn set_has_coefs(&mut self, has_coefs: bool) {
        self.has_coefs = has_coefs;
    }

    pub(crate) fn set_max_norms(&mut self, max_square_norm: f64, max_w_square_norm: f64) {
        self.max_square_norm = max_square_norm;
        self.max_w_square_norm = max_w_square_norm;
    }

    /// Recompute the norm caches from the node's coefficient block. Nodes without coefficients
    /// have zero norm.
    pub(crate) fn calc_norms(&mut self, coefs: &[f64]) {
        let kp1_d = coefs.len() >> D;
        for (norm, block) in self
            .component_norms
            .iter_mut()
            .zip(coefs.chunks_exact(kp1_d))
        {
            *norm = if self.has_coefs {
                block.iter().map(|c| c * c).sum()
            } else {
                0.0
            };
        }
        self.square_norm = self.component_norms.iter().sum();
    }

    pub(crate) fn zero_norms(&mut self) {
        self.component_norms.fill(0.0);
        self.square_norm = 0.0;
    }

    pub(crate) fn clear_norms(&mut self) {
        self.component_norms.fill(NOT_COMPUTED);
        self.square_norm = NOT_COMPUTED;
        self.max_square_norm = NOT_COMPUTED;
        self.max_w_square_norm = NOT_COMPUTED;
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_norm_cache() {
        let mut node = MWNode::<1>::new(NodeHandle::new(0, 0), NodeIndex::new(0, [0]), None);
        assert!(node.is_root_node());
        assert!(node.is_end_node());
        assert_eq!(node.square_norm(), NOT_COMPUTED);
        assert_eq!(node.wavelet_norm(), NOT_COMPUTED);

        let coefs = [1.0, 2.0, 3.0, 4.0];
        node.calc_norms(&coefs);
        assert_eq!(node.square_norm(), 0.0);

        node.set_has_coefs(true);
        node.calc_norms(&coefs);
        assert_relative_eq!(node.scaling_norm(), 5.0);
        assert_relative_eq!(node.wavelet_norm(), 25.0);
        assert_relative_eq!(node.square_norm(), 30.0);

        node.clear_norms();
        assert_eq!(node.square_norm(), NOT_COMPUTED);
    }
}
