//! Tree coordinates: a signed scale and a `D` dimensional translation.
use std::{cmp::Ordering, fmt};

use itertools::Itertools;

/// Unique coordinate of a node. The node covers the dyadic box
/// `[l 2^-n, (l + 1) 2^-n)` along each axis, where `n` is the scale and `l` the translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeIndex<const D: usize> {
    scale: i32,
    translation: [i64; D],
}

impl<const D: usize> NodeIndex<D> {
    /// Number of children of every branch node.
    pub const N_CHILDREN: usize = 1 << D;

    /// Create an index from its scale and translation.
    pub fn new(scale: i32, translation: [i64; D]) -> Self {
        Self { scale, translation }
    }

    /// Refinement level of the node, higher is finer.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Grid coordinate of the node at its scale.
    pub fn translation(&self) -> &[i64; D] {
        &self.translation
    }

    /// The parent of an index. Translations are floored, so negative ones stay consistent.
    pub fn parent(&self) -> Self {
        Self {
            scale: self.scale - 1,
            translation: self.translation.map(|l| l >> 1),
        }
    }

    /// The child with child index `c`, bit `d` of `c` selects the upper half along axis `d`.
    pub fn child(&self, c: usize) -> Self {
        debug_assert!(c < Self::N_CHILDREN);
        let mut translation = self.translation;
        for (d, l) in translation.iter_mut().enumerate() {
            *l = 2 * *l + ((c >> d) & 1) as i64;
        }
        Self {
            scale: self.scale + 1,
            translation,
        }
    }

    /// All children, ordered by child index.
    pub fn children(&self) -> Vec<Self> {
        (0..Self::N_CHILDREN).map(|c| self.child(c)).collect()
    }

    /// Position of this index among the children of its parent.
    pub fn child_index(&self) -> usize {
        self.translation
            .iter()
            .enumerate()
            .fold(0, |acc, (d, &l)| acc | (((l & 1) as usize) << d))
    }

    /// The ancestor at a coarser (or equal) `scale`, `None` if `scale` is finer than this index.
    pub fn ancestor(&self, scale: i32) -> Option<Self> {
        if scale > self.scale {
            return None;
        }
        let shift = (self.scale - scale) as u32;
        let translation = if shift >= i64::BITS {
            self.translation.map(|l| if l < 0 { -1 } else { 0 })
        } else {
            self.translation.map(|l| l >> shift)
        };
        Some(Self { scale, translation })
    }

    /// Check whether this index is an ancestor of (or equal to) `other`.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.ancestor(self.scale) == Some(*self)
    }
}

impl<const D: usize> Ord for NodeIndex<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scale
            .cmp(&other.scale)
            .then_with(|| self.translation.cmp(&other.translation))
    }
}

impl<const D: usize> PartialOrd for NodeIndex<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const D: usize> fmt::Display for NodeIndex<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ {:3} | {} ]",
            self.scale,
            self.translation.iter().map(|l| format!("{l:4}")).join(" ")
        )
    }
}
