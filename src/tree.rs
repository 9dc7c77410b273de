//! The multiwavelet tree.
mod transform;

use std::{fmt, sync::Arc};

use crate::{
    allocator::{AllocatorOptions, NodeAllocator, NodeHandle},
    constants::NOT_COMPUTED,
    filter::WalshFilter,
    index::NodeIndex,
    node::MWNode,
    node_box::NodeBox,
    traits::TwoScaleFilter,
    types::{Error, Result},
    world::{Coord, MultiResolutionAnalysis},
};

/// An adaptive tree of multiwavelet nodes over the roots of a world box.
///
/// The tree owns its node allocator and root box. It keeps per-depth node counters in step with
/// every node it creates or frees, caches the end nodes (leaves) of the current refinement and
/// caches the squared norm of the represented function.
pub struct MWTree<const D: usize> {
    mra: MultiResolutionAnalysis<D>,
    kp1_d: usize,
    name: String,
    allocator: NodeAllocator<D>,
    filter: Arc<dyn TwoScaleFilter>,
    square_norm: f64,
    root_box: NodeBox<D>,
    end_node_table: Vec<NodeHandle>,
    nodes_at_depth: Vec<usize>,
    nodes_at_negative_depth: Vec<usize>,
}

impl<const D: usize> MWTree<D> {
    /// Create a tree with one root node per root box, using default allocator options.
    pub fn new(mra: MultiResolutionAnalysis<D>, name: &str) -> Result<Self> {
        Self::with_options(mra, name, AllocatorOptions::default())
    }

    /// Create a tree with one root node per root box.
    pub fn with_options(
        mra: MultiResolutionAnalysis<D>,
        name: &str,
        options: AllocatorOptions,
    ) -> Result<Self> {
        let kp1_d = (mra.order() + 1).pow(D as u32);
        let allocator = NodeAllocator::new(kp1_d << D, options)?;
        let root_box = NodeBox::new(mra.world_box().clone());
        let filter = Arc::new(WalshFilter::new(mra.order(), D));

        let mut tree = Self {
            mra,
            kp1_d,
            name: name.to_string(),
            allocator,
            filter,
            square_norm: NOT_COMPUTED,
            root_box,
            end_node_table: Vec::new(),
            nodes_at_depth: Vec::new(),
            nodes_at_negative_depth: Vec::new(),
        };
        tree.alloc_root_nodes()?;
        tree.reset_end_node_table();
        log::info!(
            "Created tree '{}' with {} root nodes in {} dimensions",
            tree.name,
            tree.root_box.size(),
            D
        );
        Ok(tree)
    }

    /// Replace the two-scale filter used by [MWTree::mw_transform].
    pub fn with_filter(mut self, filter: Arc<dyn TwoScaleFilter>) -> Result<Self> {
        if filter.kp1_d() != self.kp1_d || filter.t_dim() != self.t_dim() {
            return Err(Error::InvalidArgument(format!(
                "filter of block size {} x {} does not match tree blocks of {} x {}",
                filter.kp1_d(),
                filter.t_dim(),
                self.kp1_d,
                self.t_dim()
            )));
        }
        self.filter = filter;
        Ok(self)
    }

    fn alloc_root_nodes(&mut self) -> Result<()> {
        for i in 0..self.root_box.size() {
            let idx = self.root_box.world().root_node_index(i);
            let handle = self.allocator.allocate_node(idx, None)?;
            self.root_box.set_node(i, handle);
            self.increment_node_count(idx.scale());
        }
        Ok(())
    }

    /// The multiresolution analysis the tree is built on.
    pub fn mra(&self) -> &MultiResolutionAnalysis<D> {
        &self.mra
    }

    /// Name of the tree.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the tree.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Polynomial order.
    pub fn order(&self) -> usize {
        self.mra.order()
    }

    /// Scaling functions per dimension.
    pub fn kp1(&self) -> usize {
        self.mra.order() + 1
    }

    /// Scaling functions per node.
    pub fn kp1_d(&self) -> usize {
        self.kp1_d
    }

    /// Spatial dimension.
    pub fn dim(&self) -> usize {
        D
    }

    /// Children per branch node.
    pub fn t_dim(&self) -> usize {
        1 << D
    }

    /// Values per coefficient block.
    pub fn coeff_size(&self) -> usize {
        self.allocator.coeff_size()
    }

    /// Number of live nodes.
    pub fn n_nodes(&self) -> usize {
        self.allocator.n_nodes()
    }

    /// Number of scales coarser than the roots holding nodes.
    pub fn n_neg_scales(&self) -> usize {
        self.nodes_at_negative_depth.len()
    }

    /// Scale of the roots.
    pub fn root_scale(&self) -> i32 {
        self.root_box.scale()
    }

    /// Number of depths, counted from the roots, that hold nodes.
    pub fn depth(&self) -> usize {
        self.nodes_at_depth.len()
    }

    /// Number of nodes at depth `i` below the roots. Negative `i` counts the scales above.
    pub fn n_nodes_at_depth(&self, i: i32) -> usize {
        let counter = if i < 0 {
            self.nodes_at_negative_depth.get(i.unsigned_abs() as usize - 1)
        } else {
            self.nodes_at_depth.get(i as usize)
        };
        counter.copied().unwrap_or(0)
    }

    /// Node counters from the roots downwards.
    pub fn nodes_at_depth(&self) -> &[usize] {
        &self.nodes_at_depth
    }

    /// Node counters above the roots, nearest scale first.
    pub fn nodes_at_negative_depth(&self) -> &[usize] {
        &self.nodes_at_negative_depth
    }

    /// Memory held by coefficient chunks, in kB.
    pub fn size_nodes_kb(&self) -> usize {
        self.allocator.size_nodes_kb()
    }

    /// Whether the world box is periodic.
    pub fn is_periodic(&self) -> bool {
        self.root_box.world().is_periodic()
    }

    /// The root container.
    pub fn root_box(&self) -> &NodeBox<D> {
        &self.root_box
    }

    /// The node allocator.
    pub fn node_allocator(&self) -> &NodeAllocator<D> {
        &self.allocator
    }

    /// Mutable access to the allocator. Writes through it bypass the tree's norm caches.
    pub fn node_allocator_mut(&mut self) -> &mut NodeAllocator<D> {
        &mut self.allocator
    }

    /// Node at `handle`.
    ///
    /// # Panics
    /// If the handle does not refer to a live node.
    pub fn node(&self, handle: NodeHandle) -> &MWNode<D> {
        self.allocator.node(handle)
    }

    /// Number of root nodes.
    pub fn n_root_nodes(&self) -> usize {
        self.root_box.size()
    }

    /// Root node `i`.
    pub fn root_node(&self, i: usize) -> &MWNode<D> {
        self.allocator.node(self.root_box.node(i))
    }

    /// Number of entries in the end node table.
    pub fn n_end_nodes(&self) -> usize {
        self.end_node_table.len()
    }

    /// Entry `i` of the end node table.
    pub fn end_node(&self, i: usize) -> &MWNode<D> {
        self.allocator.node(self.end_node_table[i])
    }

    /// The end node table as of its last rebuild.
    pub fn end_node_table(&self) -> &[NodeHandle] {
        &self.end_node_table
    }

    /// An independent snapshot of the end node table.
    pub fn copy_end_node_table(&self) -> Vec<NodeHandle> {
        self.end_node_table.clone()
    }

    /// Root index containing a physical coordinate.
    pub fn root_index(&self, r: &Coord<D>) -> Result<usize> {
        self.root_box.box_index(r)
    }

    /// Root index containing a node index.
    pub fn root_index_of(&self, idx: &NodeIndex<D>) -> Result<usize> {
        self.root_box.box_index_of(idx)
    }

    /// Counter vector and position holding the count of `scale`.
    fn counter_at(&mut self, scale: i32) -> (&mut Vec<usize>, usize) {
        let depth = i64::from(scale) - i64::from(self.root_scale());
        if depth < 0 {
            (&mut self.nodes_at_negative_depth, (depth.unsigned_abs() - 1) as usize)
        } else {
            (&mut self.nodes_at_depth, depth as usize)
        }
    }

    /// Record a new node at `scale`. Every node creation must be paired with one call.
    pub fn increment_node_count(&mut self, scale: i32) {
        let (counters, i) = self.counter_at(scale);
        if counters.len() <= i {
            counters.resize(i + 1, 0);
        }
        counters[i] += 1;
    }

    /// Record a removed node at `scale`. Every node removal must be paired with one call.
    ///
    /// # Panics
    /// If no node is counted at that scale.
    pub fn decrement_node_count(&mut self, scale: i32) {
        let (counters, i) = self.counter_at(scale);
        match counters.get_mut(i) {
            Some(count) if *count > 0 => *count -= 1,
            _ => panic!("node count at scale {scale} would become negative"),
        }
        while counters.last() == Some(&0) {
            counters.pop();
        }
    }

    /// Descend from the root covering `idx` towards it. Returns the last node on the path and
    /// whether it is the target itself.
    fn descend(&self, idx: &NodeIndex<D>) -> Result<(NodeHandle, bool)> {
        let i = self.root_box.box_index_of(idx)?;
        let mut handle = self.root_box.get(i).ok_or_else(|| Error::NodeNotFound {
            scale: idx.scale(),
            translation: idx.translation().to_vec(),
        })?;
        loop {
            let node = self.allocator.node(handle);
            if node.scale() == idx.scale() {
                return Ok((handle, true));
            }
            let next = match idx.ancestor(node.scale() + 1) {
                Some(next) if node.is_branch_node() => next,
                _ => return Ok((handle, false)),
            };
            handle = node.child(next.child_index());
        }
    }

    /// The node at `idx`, `None` if the tree does not contain it. A node that exists without
    /// coefficients is returned, see [MWNode::has_coefs].
    pub fn find_node(&self, idx: &NodeIndex<D>) -> Option<&MWNode<D>> {
        match self.descend(idx) {
            Ok((handle, true)) => Some(self.allocator.node(handle)),
            _ => None,
        }
    }

    /// The node at `idx`, [Error::NodeNotFound] if the tree does not contain it.
    pub fn get_node(&self, idx: &NodeIndex<D>) -> Result<&MWNode<D>> {
        self.find_node(idx).ok_or_else(|| Error::NodeNotFound {
            scale: idx.scale(),
            translation: idx.translation().to_vec(),
        })
    }

    /// The node at `idx` or, if it does not exist, the end node on the path to it.
    pub fn get_node_or_end_node(&self, idx: &NodeIndex<D>) -> Result<&MWNode<D>> {
        let (handle, _) = self.descend(idx)?;
        Ok(self.allocator.node(handle))
    }

    /// The node `depth` levels below the roots containing the coordinate `r`.
    pub fn get_node_at(&self, r: &Coord<D>, depth: u32) -> Result<&MWNode<D>> {
        let idx = self
            .root_box
            .world()
            .node_index_at(r, self.root_scale() + depth as i32)?;
        self.get_node(&idx)
    }

    /// The node containing `r` at `depth` levels below the roots, or the end node on the path
    /// to it. Without a depth, the end node containing `r`.
    pub fn get_node_or_end_node_at(&self, r: &Coord<D>, depth: Option<u32>) -> Result<&MWNode<D>> {
        let scale = match depth {
            Some(depth) => self.root_scale() + depth as i32,
            None => self.mra.max_scale(),
        };
        let idx = self.root_box.world().node_index_at(r, scale)?;
        self.get_node_or_end_node(&idx)
    }

    /// Coefficient block of a node.
    pub fn coefs(&self, handle: NodeHandle) -> &[f64] {
        self.allocator.coefs(handle)
    }

    /// Mutable coefficient block of a node. The node is marked as holding coefficients and its
    /// norms, as well as the tree norm, are invalidated.
    pub fn coefs_mut(&mut self, handle: NodeHandle) -> &mut [f64] {
        let node = self.allocator.node_mut(handle);
        node.set_has_coefs(true);
        node.clear_norms();
        self.square_norm = NOT_COMPUTED;
        self.allocator.coefs_mut(handle)
    }

    /// Copy a full coefficient block into a node.
    pub fn set_coefs(&mut self, handle: NodeHandle, coefs: &[f64]) -> Result<()> {
        if coefs.len() != self.coeff_size() {
            return Err(Error::InvalidArgument(format!(
                "expected {} coefficients, got {}",
                self.coeff_size(),
                coefs.len()
            )));
        }
        self.coefs_mut(handle).copy_from_slice(coefs);
        Ok(())
    }

    /// Create all children of an end node, with zeroed coefficients. On failure nothing is
    /// allocated.
    pub fn split_node(&mut self, handle: NodeHandle) -> Result<&[NodeHandle]> {
        let node = self.allocator.node(handle);
        if node.is_branch_node() {
            return Err(Error::InvalidArgument(format!(
                "node {} already has children",
                node.index()
            )));
        }
        let idx = *node.index();
        if idx.scale() >= self.mra.max_scale() {
            return Err(Error::InvalidArgument(format!(
                "node {idx} is at the maximum scale {}",
                self.mra.max_scale()
            )));
        }

        let children = self
            .allocator
            .allocate_nodes(&idx.children(), Some(handle))?;
        for _ in &children {
            self.increment_node_count(idx.scale() + 1);
        }
        self.allocator.node_mut(handle).set_children(children);
        self.end_node_table.clear();
        self.square_norm = NOT_COMPUTED;
        Ok(self.allocator.node(handle).children())
    }

    /// Free every node below `handle`, leaving it as an end node.
    pub fn delete_children(&mut self, handle: NodeHandle) {
        let children = self.allocator.node_mut(handle).take_children();
        if children.is_empty() {
            return;
        }
        for child in children {
            self.free_subtree(child);
        }
        self.end_node_table.clear();
        self.square_norm = NOT_COMPUTED;
    }

    fn free_subtree(&mut self, handle: NodeHandle) {
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let node = self
                .allocator
                .deallocate_node(current)
                .unwrap_or_else(|e| panic!("corrupt tree '{}': {e}", self.name));
            stack.extend_from_slice(node.children());
            self.decrement_node_count(node.scale());
        }
    }

    /// Split every end node `levels` times and rebuild the end node table.
    pub fn refine_uniformly(&mut self, levels: u32) -> Result<()> {
        for _ in 0..levels {
            self.reset_end_node_table();
            for handle in self.copy_end_node_table() {
                self.split_node(handle)?;
            }
        }
        self.reset_end_node_table();
        Ok(())
    }

    /// All nodes reachable from the roots, depth first in child order.
    fn traverse(&self) -> Vec<NodeHandle> {
        let mut nodes = Vec::with_capacity(self.n_nodes());
        let mut stack: Vec<NodeHandle> = self.root_box.handles().collect();
        stack.reverse();
        while let Some(handle) = stack.pop() {
            nodes.push(handle);
            stack.extend(self.allocator.node(handle).children().iter().rev());
        }
        nodes
    }

    /// Nodes reachable from the roots grouped by depth, roots first.
    pub(crate) fn levels(&self) -> Vec<Vec<NodeHandle>> {
        let mut levels = Vec::new();
        let mut current: Vec<NodeHandle> = self.root_box.handles().collect();
        while !current.is_empty() {
            let next = current
                .iter()
                .flat_map(|&h| self.allocator.node(h).children().iter().copied())
                .collect();
            levels.push(current);
            current = next;
        }
        levels
    }

    /// Rebuild the end node table from the current structure.
    pub fn reset_end_node_table(&mut self) {
        let end_nodes = self
            .traverse()
            .into_iter()
            .filter(|&h| self.allocator.node(h).is_end_node())
            .collect();
        self.end_node_table = end_nodes;
    }

    /// Drop the end node table.
    pub fn clear_end_node_table(&mut self) {
        self.end_node_table.clear();
    }

    fn count_where(&self, depth: Option<u32>, pred: impl Fn(&MWNode<D>) -> bool) -> usize {
        let root_scale = self.root_scale();
        self.traverse()
            .into_iter()
            .map(|h| self.allocator.node(h))
            .filter(|node| depth.map_or(true, |d| node.scale() - root_scale == d as i32))
            .filter(|node| pred(node))
            .count()
    }

    /// Number of nodes with children, optionally only at one depth.
    pub fn count_branch_nodes(&self, depth: Option<u32>) -> usize {
        self.count_where(depth, MWNode::is_branch_node)
    }

    /// Number of nodes without children, optionally only at one depth.
    pub fn count_leaf_nodes(&self, depth: Option<u32>) -> usize {
        self.count_where(depth, MWNode::is_end_node)
    }

    /// Number of nodes reachable from the roots, optionally only at one depth.
    pub fn count_nodes(&self, depth: Option<u32>) -> usize {
        self.count_where(depth, |_| true)
    }

    /// Cached squared norm, `NOT_COMPUTED` when stale.
    pub fn square_norm(&self) -> f64 {
        self.square_norm
    }

    /// Mark the cached squared norm as stale.
    pub fn clear_square_norm(&mut self) {
        self.square_norm = NOT_COMPUTED;
    }

    /// Squared norm of the represented function, summed over the end nodes. The result is cached
    /// and returned unchanged until the tree is modified through its own interface.
    pub fn calc_square_norm(&mut self) -> f64 {
        if self.square_norm >= 0.0 {
            return self.square_norm;
        }
        if self.end_node_table.is_empty() {
            self.reset_end_node_table();
        }
        let mut square_norm = 0.0;
        for i in 0..self.end_node_table.len() {
            let handle = self.end_node_table[i];
            if self.allocator.node(handle).square_norm() < 0.0 {
                self.allocator.calc_norms(handle);
            }
            square_norm += self.allocator.node(handle).square_norm();
        }
        self.square_norm = square_norm;
        square_norm
    }

    /// Store in every node the largest squared norm and squared wavelet norm of its subtree.
    pub fn make_max_square_norms(&mut self) {
        let levels = self.levels();
        for handle in levels.iter().flatten() {
            if self.allocator.node(*handle).square_norm() < 0.0 {
                self.allocator.calc_norms(*handle);
            }
        }
        for level in levels.iter().rev() {
            for &handle in level {
                let node = self.allocator.node(handle);
                let (mut max_norm, mut max_w_norm) = (node.square_norm(), node.wavelet_norm());
                for &child in node.children() {
                    let child = self.allocator.node(child);
                    max_norm = max_norm.max(child.max_square_norm());
                    max_w_norm = max_w_norm.max(child.max_w_square_norm());
                }
                self.allocator
                    .node_mut(handle)
                    .set_max_norms(max_norm, max_w_norm);
            }
        }
    }

    /// Free every node including the roots. The allocator keeps its chunks.
    pub fn delete_root_nodes(&mut self) {
        for i in 0..self.root_box.size() {
            if let Some(root) = self.root_box.clear_node(i) {
                self.free_subtree(root);
            }
        }
        self.end_node_table.clear();
        self.square_norm = NOT_COMPUTED;
        log::info!("Deleted all nodes of tree '{}'", self.name);
    }

    /// Reset the tree to bare roots without coefficients. Allocated chunks are kept for reuse and
    /// deleted roots are recreated.
    pub fn clear(&mut self) -> Result<()> {
        if self.root_box.n_occupied() < self.root_box.size() {
            self.delete_root_nodes();
            self.alloc_root_nodes()?;
        }
        let roots: Vec<NodeHandle> = self.root_box.handles().collect();
        for root in roots {
            self.delete_children(root);
            self.allocator.coefs_mut(root).fill(0.0);
            let node = self.allocator.node_mut(root);
            node.set_has_coefs(false);
            node.clear_norms();
        }
        self.reset_end_node_table();
        self.square_norm = NOT_COMPUTED;
        Ok(())
    }

    /// Zero every coefficient in place. Structure and node counts are unchanged.
    pub fn set_zero(&mut self) {
        for handle in self.traverse() {
            self.allocator.coefs_mut(handle).fill(0.0);
            let node = self.allocator.node_mut(handle);
            node.set_has_coefs(true);
            node.zero_norms();
        }
        self.square_norm = 0.0;
    }
}

impl<const D: usize> fmt::Display for MWTree<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "*MWTree: {}", self.name)?;
        writeln!(f, "  dim:          {}", D)?;
        writeln!(f, "  order:        {}", self.order())?;
        writeln!(f, "  root scale:   {}", self.root_scale())?;
        writeln!(f, "  nodes:        {}", self.n_nodes())?;
        writeln!(f, "  end nodes:    {}", self.n_end_nodes())?;
        writeln!(f, "  chunks:       {}", self.allocator.n_chunks())?;
        writeln!(f, "  memory (kB):  {}", self.size_nodes_kb())?;
        writeln!(f, "  square norm:  {}", self.square_norm)?;
        writeln!(f, "  nodes per scale:")?;
        for (i, n) in self.nodes_at_negative_depth.iter().enumerate().rev() {
            writeln!(f, "    scale={:<4} nodes={}", self.root_scale() - i as i32 - 1, n)?;
        }
        for (i, n) in self.nodes_at_depth.iter().enumerate() {
            writeln!(f, "    scale={:<4} nodes={}", self.root_scale() + i as i32, n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::world::WorldBox;

    use super::*;

    fn tree_1d() -> MWTree<1> {
        let world = WorldBox::new(0, [0], [2]).unwrap();
        MWTree::new(MultiResolutionAnalysis::new(world, 1), "test").unwrap()
    }

    #[test]
    fn test_negative_depth_counters() {
        let mut tree = tree_1d();
        assert_eq!(tree.nodes_at_depth(), &[2]);

        tree.increment_node_count(-1);
        tree.increment_node_count(-2);
        tree.increment_node_count(-2);
        assert_eq!(tree.n_neg_scales(), 2);
        assert_eq!(tree.n_nodes_at_depth(-1), 1);
        assert_eq!(tree.n_nodes_at_depth(-2), 2);

        tree.decrement_node_count(-2);
        tree.decrement_node_count(-2);
        assert_eq!(tree.n_neg_scales(), 1);
        tree.decrement_node_count(-1);
        assert_eq!(tree.n_neg_scales(), 0);
        assert_eq!(tree.nodes_at_depth(), &[2]);
        assert_eq!(tree.n_nodes_at_depth(i32::MIN), 0);
        assert_eq!(tree.n_nodes_at_depth(i32::MAX), 0);
    }

    #[test]
    #[should_panic(expected = "would become negative")]
    fn test_unpaired_decrement_panics() {
        let mut tree = tree_1d();
        tree.decrement_node_count(3);
    }

    #[test]
    fn test_split_and_delete() {
        let mut tree = tree_1d();
        let root = tree.root_box().node(1);
        let children = tree.split_node(root).unwrap().to_vec();
        assert_eq!(children.len(), 2);
        assert_eq!(tree.n_end_nodes(), 0);
        assert!(tree.split_node(root).is_err());

        tree.split_node(children[1]).unwrap();
        tree.reset_end_node_table();
        assert_eq!(tree.nodes_at_depth(), &[2, 2, 2]);
        assert_eq!(tree.n_end_nodes(), 4);
        assert_eq!(tree.count_branch_nodes(None), 2);
        assert_eq!(tree.count_leaf_nodes(Some(2)), 2);
        assert_eq!(tree.count_nodes(None), tree.n_nodes());

        tree.delete_children(root);
        assert_eq!(tree.nodes_at_depth(), &[2]);
        assert_eq!(tree.n_nodes(), 2);
        assert!(tree.node(root).is_end_node());
    }

    #[test]
    fn test_end_node_order() {
        let mut tree = tree_1d();
        tree.refine_uniformly(2).unwrap();
        let translations: Vec<i64> = (0..tree.n_end_nodes())
            .map(|i| tree.end_node(i).index().translation()[0])
            .collect();
        assert_eq!(translations, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_max_scale_limit() {
        let world = WorldBox::new(0, [0], [1]).unwrap();
        let mra = MultiResolutionAnalysis::new(world, 0).with_max_depth(1);
        let mut tree = MWTree::new(mra, "shallow").unwrap();
        tree.refine_uniformly(1).unwrap();
        assert!(matches!(
            tree.refine_uniformly(1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_display() {
        let tree = tree_1d();
        let summary = tree.to_string();
        assert!(summary.contains("*MWTree: test"));
        assert!(summary.contains("scale=0    nodes=2"));
    }
}
