//! Level-synchronous multiwavelet transforms.
use rayon::prelude::*;

use crate::{
    allocator::NodeHandle, constants::NOT_COMPUTED, tree::MWTree, types::TransformDirection,
};

impl<const D: usize> MWTree<D> {
    /// Apply the two-scale filter across every branch node of the tree.
    ///
    /// `Up` compresses the children's scaling coefficients into each parent's full block, from
    /// the finest level to the roots. `Down` reconstructs each parent's full block into its
    /// children's scaling coefficients, from the roots to the finest level, leaving the
    /// children's wavelet coefficients alone. With `overwrite` the target coefficients are
    /// replaced, otherwise the result is added to them.
    ///
    /// Nodes of one level are processed in parallel. Every level is finished before the next
    /// one is read.
    ///
    /// # Panics
    /// If a node the transform reads from has no coefficients.
    pub fn mw_transform(&mut self, direction: TransformDirection, overwrite: bool) {
        let levels = self.levels();
        let branch_levels: Vec<Vec<NodeHandle>> = levels
            .into_iter()
            .map(|level| {
                level
                    .into_iter()
                    .filter(|&h| self.node(h).is_branch_node())
                    .collect::<Vec<_>>()
            })
            .filter(|level| !level.is_empty())
            .collect();

        match direction {
            TransformDirection::Up => {
                for level in branch_levels.iter().rev() {
                    self.transform_up_level(level, overwrite);
                }
            }
            TransformDirection::Down => {
                for level in &branch_levels {
                    self.transform_down_level(level, overwrite);
                }
            }
        }
        self.square_norm = NOT_COMPUTED;
        log::debug!(
            "Transformed tree '{}' {:?} over {} levels",
            self.name,
            direction,
            branch_levels.len()
        );
    }

    fn assert_has_coefs(&self, handle: NodeHandle) {
        let node = self.node(handle);
        if !node.has_coefs() {
            panic!(
                "transform of tree '{}' reads node {} without coefficients",
                self.name,
                node.index()
            );
        }
    }

    fn transform_up_level(&mut self, level: &[NodeHandle], overwrite: bool) {
        let kp1_d = self.kp1_d;
        let coeff_size = self.coeff_size();
        let results: Vec<(NodeHandle, Vec<f64>)> = level
            .par_iter()
            .map(|&parent| {
                let mut scaling = Vec::with_capacity(coeff_size);
                for &child in self.node(parent).children() {
                    self.assert_has_coefs(child);
                    scaling.extend_from_slice(&self.allocator.coefs(child)[..kp1_d]);
                }
                let mut compressed = vec![0.0; coeff_size];
                self.filter.compress(&scaling, &mut compressed);
                (parent, compressed)
            })
            .collect();

        for (parent, compressed) in results {
            self.write_block(parent, 0, &compressed, overwrite);
        }
    }

    fn transform_down_level(&mut self, level: &[NodeHandle], overwrite: bool) {
        let kp1_d = self.kp1_d;
        let coeff_size = self.coeff_size();
        let results: Vec<(NodeHandle, Vec<f64>)> = level
            .par_iter()
            .map(|&parent| {
                self.assert_has_coefs(parent);
                let mut scaling = vec![0.0; coeff_size];
                self.filter
                    .reconstruct(self.allocator.coefs(parent), &mut scaling);
                (parent, scaling)
            })
            .collect();

        for (parent, scaling) in results {
            let children = self.node(parent).children().to_vec();
            for (child, block) in children.into_iter().zip(scaling.chunks_exact(kp1_d)) {
                self.write_block(child, 0, block, overwrite);
            }
        }
    }

    /// Write `values` into a node's coefficients starting at `offset`.
    fn write_block(&mut self, handle: NodeHandle, offset: usize, values: &[f64], overwrite: bool) {
        let node = self.allocator.node_mut(handle);
        let accumulate = !overwrite && node.has_coefs();
        node.set_has_coefs(true);
        node.clear_norms();

        let target = &mut self.allocator.coefs_mut(handle)[offset..offset + values.len()];
        if accumulate {
            for (t, v) in target.iter_mut().zip(values) {
                *t += v;
            }
        } else {
            target.copy_from_slice(values);
        }
    }
}
