//! The world box spanned by the root nodes and the multiresolution analysis built on it.
use num::Integer;

use crate::{
    constants::MAX_DEPTH,
    index::NodeIndex,
    types::{Error, Result},
};

/// A physical coordinate.
pub type Coord<const D: usize> = [f64; D];

/// A box of `n_boxes[0] * ... * n_boxes[D-1]` root nodes at a common root scale.
///
/// The root with translation `l` along axis `d` covers `[l w_d, (l + 1) w_d)`, where the box width
/// is `w_d = scaling[d] 2^-scale`. Roots are numbered with axis 0 running fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldBox<const D: usize> {
    scale: i32,
    corner: [i64; D],
    n_boxes: [usize; D],
    scaling: [f64; D],
    periodic: bool,
}

impl<const D: usize> WorldBox<D> {
    /// Create a world box with unit scaling.
    ///
    /// # Arguments
    /// * `scale` - The root scale.
    /// * `corner` - Translation of the lower corner root.
    /// * `n_boxes` - Number of roots along each axis.
    pub fn new(scale: i32, corner: [i64; D], n_boxes: [usize; D]) -> Result<Self> {
        if n_boxes.iter().any(|&n| n == 0) {
            return Err(Error::InvalidArgument(format!(
                "world box needs at least one root per axis, got {n_boxes:?}"
            )));
        }
        Ok(Self {
            scale,
            corner,
            n_boxes,
            scaling: [1.0; D],
            periodic: false,
        })
    }

    /// The unit cube as a single root at scale zero.
    pub fn unit() -> Self {
        Self {
            scale: 0,
            corner: [0; D],
            n_boxes: [1; D],
            scaling: [1.0; D],
            periodic: false,
        }
    }

    /// Stretch every axis by a positive factor.
    pub fn with_scaling(mut self, scaling: [f64; D]) -> Result<Self> {
        if scaling.iter().any(|&s| !(s > 0.0)) {
            return Err(Error::InvalidArgument(format!(
                "scaling factors must be positive, got {scaling:?}"
            )));
        }
        self.scaling = scaling;
        Ok(self)
    }

    /// Make coordinate and index lookups wrap around the box.
    pub fn with_periodic(mut self, periodic: bool) -> Self {
        self.periodic = periodic;
        self
    }

    /// Scale of the root nodes.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Translation of the lower corner root.
    pub fn corner(&self) -> &[i64; D] {
        &self.corner
    }

    /// Number of roots along each axis.
    pub fn n_boxes(&self) -> &[usize; D] {
        &self.n_boxes
    }

    /// Total number of roots.
    pub fn size(&self) -> usize {
        self.n_boxes.iter().product()
    }

    /// Whether lookups wrap around the box.
    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    /// Width of a node at `scale` along axis `d`.
    pub fn width_at(&self, scale: i32, d: usize) -> f64 {
        self.scaling[d] * 2f64.powi(-scale)
    }

    /// Lower bound of the box along axis `d`.
    pub fn lower_bound(&self, d: usize) -> f64 {
        self.corner[d] as f64 * self.width_at(self.scale, d)
    }

    /// Upper bound of the box along axis `d`.
    pub fn upper_bound(&self, d: usize) -> f64 {
        (self.corner[d] + self.n_boxes[d] as i64) as f64 * self.width_at(self.scale, d)
    }

    /// Map a coordinate into the half open box `[lower, upper)`, wrapping periodic boxes.
    fn wrap(&self, r: &Coord<D>) -> Result<Coord<D>> {
        let mut wrapped = *r;
        for (d, x) in wrapped.iter_mut().enumerate() {
            let lower = self.lower_bound(d);
            let upper = self.upper_bound(d);
            if self.periodic && x.is_finite() {
                *x = lower + (*x - lower).rem_euclid(upper - lower);
            }
            if !(lower <= *x && *x < upper) {
                return Err(Error::OutOfBounds(format!(
                    "coordinate {r:?} outside [{lower}, {upper}) along axis {d}"
                )));
            }
        }
        Ok(wrapped)
    }

    /// Linear root index of a root translation relative to the corner.
    fn linear_index(&self, offset: &[i64; D]) -> usize {
        let mut index = 0;
        let mut stride = 1;
        for d in 0..D {
            index += offset[d] as usize * stride;
            stride *= self.n_boxes[d];
        }
        index
    }

    /// Root index containing a physical coordinate. Coordinates on an interior box edge belong to
    /// the upper box.
    pub fn box_index(&self, r: &Coord<D>) -> Result<usize> {
        let r = self.wrap(r)?;
        let mut offset = [0i64; D];
        for d in 0..D {
            let width = self.width_at(self.scale, d);
            let l = ((r[d] - self.lower_bound(d)) / width).floor() as i64;
            // Rounding in the wrap can land exactly on the upper bound.
            offset[d] = l.clamp(0, self.n_boxes[d] as i64 - 1);
        }
        Ok(self.linear_index(&offset))
    }

    /// Root index containing a node index at the root scale or finer.
    pub fn box_index_of(&self, idx: &NodeIndex<D>) -> Result<usize> {
        let root = idx.ancestor(self.scale).ok_or_else(|| {
            Error::OutOfBounds(format!(
                "node {idx} is coarser than the root scale {}",
                self.scale
            ))
        })?;
        let mut offset = [0i64; D];
        for d in 0..D {
            let n = self.n_boxes[d] as i64;
            let mut l = root.translation()[d] - self.corner[d];
            if self.periodic {
                l = l.mod_floor(&n);
            }
            if !(0..n).contains(&l) {
                return Err(Error::OutOfBounds(format!(
                    "node {idx} outside the world box along axis {d}"
                )));
            }
            offset[d] = l;
        }
        Ok(self.linear_index(&offset))
    }

    /// Index of the root with linear index `i`.
    pub fn root_node_index(&self, i: usize) -> NodeIndex<D> {
        debug_assert!(i < self.size());
        let mut rest = i;
        let mut translation = [0i64; D];
        for d in 0..D {
            let (q, r) = rest.div_rem(&self.n_boxes[d]);
            translation[d] = self.corner[d] + r as i64;
            rest = q;
        }
        NodeIndex::new(self.scale, translation)
    }

    /// Index of the node at `scale` containing a physical coordinate.
    pub fn node_index_at(&self, r: &Coord<D>, scale: i32) -> Result<NodeIndex<D>> {
        let r = self.wrap(r)?;
        let mut translation = [0i64; D];
        for d in 0..D {
            translation[d] = (r[d] / self.width_at(scale, d)).floor() as i64;
        }
        Ok(NodeIndex::new(scale, translation))
    }
}

/// Polynomial order and world box shared by every tree built on the same analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiResolutionAnalysis<const D: usize> {
    world: WorldBox<D>,
    order: usize,
    max_depth: u32,
}

impl<const D: usize> MultiResolutionAnalysis<D> {
    /// Create an analysis of polynomial `order` on a world box.
    pub fn new(world: WorldBox<D>, order: usize) -> Self {
        let max_depth = Self::depth_limit(&world, MAX_DEPTH);
        Self {
            world,
            order,
            max_depth,
        }
    }

    /// Limit the refinement depth below the roots. Depths beyond the largest representable scale
    /// are clamped.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Self::depth_limit(&self.world, max_depth);
        self
    }

    fn depth_limit(world: &WorldBox<D>, max_depth: u32) -> u32 {
        let room = i64::from(i32::MAX) - i64::from(world.scale());
        u32::try_from(room).map_or(max_depth, |room| max_depth.min(room))
    }

    /// The world box.
    pub fn world_box(&self) -> &WorldBox<D> {
        &self.world
    }

    /// Polynomial order of the scaling basis.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Deepest allowed depth below the roots.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Finest scale a node may have.
    pub fn max_scale(&self) -> i32 {
        (i64::from(self.world.scale()) + i64::from(self.max_depth)) as i32
    }
}
