//! Container of the root nodes.
use crate::{
    allocator::NodeHandle,
    index::NodeIndex,
    types::Result,
    world::{Coord, WorldBox},
};

/// Maps every root of a [WorldBox] to the handle of its root node.
#[derive(Debug, Clone)]
pub struct NodeBox<const D: usize> {
    world: WorldBox<D>,
    nodes: Vec<Option<NodeHandle>>,
    n_occupied: usize,
}

impl<const D: usize> NodeBox<D> {
    /// An empty box over `world`.
    pub fn new(world: WorldBox<D>) -> Self {
        let nodes = vec![None; world.size()];
        Self {
            world,
            nodes,
            n_occupied: 0,
        }
    }

    /// The world box.
    pub fn world(&self) -> &WorldBox<D> {
        &self.world
    }

    /// Scale of the roots.
    pub fn scale(&self) -> i32 {
        self.world.scale()
    }

    /// Number of root positions.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Number of root positions holding a node.
    pub fn n_occupied(&self) -> usize {
        self.n_occupied
    }

    /// Whether no root node is present.
    pub fn is_empty(&self) -> bool {
        self.n_occupied == 0
    }

    /// Root index containing a physical coordinate.
    pub fn box_index(&self, r: &Coord<D>) -> Result<usize> {
        self.world.box_index(r)
    }

    /// Root index containing a node index.
    pub fn box_index_of(&self, idx: &NodeIndex<D>) -> Result<usize> {
        self.world.box_index_of(idx)
    }

    /// Root handle at position `i`, `None` if it has not been set.
    pub fn get(&self, i: usize) -> Option<NodeHandle> {
        self.nodes.get(i).copied().flatten()
    }

    /// Root handle at position `i`.
    ///
    /// # Panics
    /// If `i` is out of range or the root is missing.
    pub fn node(&self, i: usize) -> NodeHandle {
        match self.get(i) {
            Some(handle) => handle,
            None => panic!("no root node at position {i} of {}", self.size()),
        }
    }

    pub(crate) fn set_node(&mut self, i: usize, handle: NodeHandle) {
        if self.nodes[i].replace(handle).is_none() {
            self.n_occupied += 1;
        }
    }

    pub(crate) fn clear_node(&mut self, i: usize) -> Option<NodeHandle> {
        let handle = self.nodes[i].take();
        if handle.is_some() {
            self.n_occupied -= 1;
        }
        handle
    }

    /// Handles of all present roots in root order.
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.iter().flatten().copied()
    }
}
