//! Chunked node allocator.
//!
//! Nodes live in fixed capacity chunks. Each slot pairs a node header with a coefficient block of
//! `coeff_size` values; the coefficient blocks of a chunk are stored contiguously. Chunks are
//! appended on demand and never moved or shrunk, so a [NodeHandle] stays valid until the node it
//! refers to is deallocated. Freed slots are reused before a new chunk is created.
//!
//! The coefficient blocks can be kept in process local memory or carved from a
//! [SharedMemory] segment. The two variants share this interface.
mod chunk;
pub mod shared;

use std::collections::BTreeSet;

use crate::{
    constants::DEFAULT_MAX_NODES_PER_CHUNK,
    index::NodeIndex,
    node::MWNode,
    types::{Error, Result},
};
use chunk::Chunk;
pub use shared::SharedMemory;

/// Stable reference to a node slot, a `(chunk, slot)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    chunk: u32,
    slot: u32,
}

impl NodeHandle {
    /// Handle of `slot` in `chunk`.
    pub fn new(chunk: usize, slot: usize) -> Self {
        Self {
            chunk: chunk as u32,
            slot: slot as u32,
        }
    }

    /// Chunk index.
    pub fn chunk(&self) -> usize {
        self.chunk as usize
    }

    /// Slot within the chunk.
    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

/// Sizing of the allocator.
#[derive(Debug, Default)]
pub struct AllocatorOptions {
    /// Slots per chunk, `DEFAULT_MAX_NODES_PER_CHUNK` when unset.
    pub max_nodes_per_chunk: Option<usize>,

    /// Hard ceiling on the number of live nodes.
    pub max_nodes: Option<usize>,

    /// Segment to carve coefficient chunks from instead of the process heap.
    pub shared_memory: Option<SharedMemory>,
}

impl AllocatorOptions {
    /// Set the number of slots per chunk.
    pub fn with_max_nodes_per_chunk(mut self, max_nodes_per_chunk: usize) -> Self {
        self.max_nodes_per_chunk = Some(max_nodes_per_chunk);
        self
    }

    /// Set a ceiling on the number of live nodes.
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = Some(max_nodes);
        self
    }

    /// Place coefficient chunks in a shared segment.
    pub fn with_shared_memory(mut self, shared_memory: SharedMemory) -> Self {
        self.shared_memory = Some(shared_memory);
        self
    }
}

/// Backing store of the coefficient chunks.
#[derive(Debug)]
enum CoefficientStore {
    Local(Vec<Box<[f64]>>),
    Shared(SharedMemory),
}

/// Arena of node slots grouped in chunks.
#[derive(Debug)]
pub struct NodeAllocator<const D: usize> {
    coeff_size: usize,
    max_nodes_per_chunk: usize,
    max_nodes: Option<usize>,
    n_nodes: usize,
    chunks: Vec<Chunk<D>>,
    /// Chunks with at least one free slot.
    with_space: BTreeSet<usize>,
    store: CoefficientStore,
}

impl<const D: usize> NodeAllocator<D> {
    /// Create an empty allocator for coefficient blocks of `coeff_size` values.
    pub fn new(coeff_size: usize, options: AllocatorOptions) -> Result<Self> {
        let max_nodes_per_chunk = options
            .max_nodes_per_chunk
            .unwrap_or(DEFAULT_MAX_NODES_PER_CHUNK);
        if coeff_size == 0 || coeff_size % (1 << D) != 0 {
            return Err(Error::InvalidArgument(format!(
                "coefficient block of {coeff_size} values does not split into {} components",
                1 << D
            )));
        }
        if max_nodes_per_chunk == 0 || max_nodes_per_chunk > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "invalid chunk capacity {max_nodes_per_chunk}"
            )));
        }

        let store = match options.shared_memory {
            Some(segment) => {
                if segment.capacity() < coeff_size * max_nodes_per_chunk {
                    log::warn!(
                        "Shared segment of {} values cannot hold a single chunk of {} nodes",
                        segment.capacity(),
                        max_nodes_per_chunk
                    );
                }
                CoefficientStore::Shared(segment)
            }
            None => CoefficientStore::Local(Vec::new()),
        };

        Ok(Self {
            coeff_size,
            max_nodes_per_chunk,
            max_nodes: options.max_nodes,
            n_nodes: 0,
            chunks: Vec::new(),
            with_space: BTreeSet::new(),
            store,
        })
    }

    /// Number of live nodes.
    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of chunks created so far.
    pub fn n_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Slots per chunk.
    pub fn max_nodes_per_chunk(&self) -> usize {
        self.max_nodes_per_chunk
    }

    /// Values per coefficient block.
    pub fn coeff_size(&self) -> usize {
        self.coeff_size
    }

    /// Whether coefficient chunks live in a shared segment.
    pub fn is_shared(&self) -> bool {
        matches!(self.store, CoefficientStore::Shared(_))
    }

    /// The shared segment, if any.
    pub fn shared_memory(&self) -> Option<&SharedMemory> {
        match &self.store {
            CoefficientStore::Shared(segment) => Some(segment),
            CoefficientStore::Local(_) => None,
        }
    }

    /// Memory held by coefficient chunks, in kB.
    pub fn size_nodes_kb(&self) -> usize {
        self.chunks.len() * self.chunk_values() * std::mem::size_of::<f64>() / 1024
    }

    /// Number of live nodes per chunk.
    pub fn occupancy(&self) -> Vec<usize> {
        self.chunks.iter().map(Chunk::n_occupied).collect()
    }

    fn chunk_values(&self) -> usize {
        self.coeff_size * self.max_nodes_per_chunk
    }

    /// Largest number of nodes the shared segment can back, if there is one.
    fn store_limit(&self) -> Option<usize> {
        match &self.store {
            CoefficientStore::Shared(segment) => {
                Some(segment.capacity() / self.chunk_values() * self.max_nodes_per_chunk)
            }
            CoefficientStore::Local(_) => None,
        }
    }

    /// Append a chunk and return its index.
    fn grow(&mut self) -> Result<usize> {
        let index = self.chunks.len();
        let chunk_values = self.chunk_values();
        match &mut self.store {
            CoefficientStore::Local(blocks) => {
                blocks.push(vec![0.0; chunk_values].into_boxed_slice());
            }
            CoefficientStore::Shared(segment) => {
                let end = (index + 1) * chunk_values;
                if end > segment.capacity() {
                    return Err(Error::OutOfMemory {
                        max_nodes: index * self.max_nodes_per_chunk,
                    });
                }
                segment.values_mut()[index * chunk_values..end].fill(0.0);
            }
        }
        self.chunks.push(Chunk::new(self.max_nodes_per_chunk));
        self.with_space.insert(index);
        log::debug!(
            "Allocated chunk {} with {} slots of {} coefficients",
            index,
            self.max_nodes_per_chunk,
            self.coeff_size
        );
        Ok(index)
    }

    /// Allocate a slot for a node with zeroed coefficients.
    ///
    /// A free slot in the lowest chunk that has one is reused, otherwise a new chunk is created.
    /// Fails with [Error::OutOfMemory] when the node ceiling or the shared segment is exhausted.
    pub fn allocate_node(
        &mut self,
        index: NodeIndex<D>,
        parent: Option<NodeHandle>,
    ) -> Result<NodeHandle> {
        if let Some(max_nodes) = self.max_nodes {
            if self.n_nodes >= max_nodes {
                return Err(Error::OutOfMemory { max_nodes });
            }
        }

        let c = match self.with_space.first() {
            Some(&c) => c,
            None => self.grow()?,
        };
        let chunk = &mut self.chunks[c];
        let Some(slot) = chunk.take_free_slot() else {
            panic!("chunk {c} is listed with free space but has none");
        };
        let handle = NodeHandle::new(c, slot);
        chunk.occupy(slot, MWNode::new(handle, index, parent));
        if chunk.is_full() {
            self.with_space.remove(&c);
        }
        self.n_nodes += 1;
        self.coefs_unchecked_mut(handle).fill(0.0);
        Ok(handle)
    }

    /// Allocate `count` nodes with the given indices, all with the same parent. Nothing is
    /// allocated if any allocation fails.
    pub fn allocate_nodes(
        &mut self,
        indices: &[NodeIndex<D>],
        parent: Option<NodeHandle>,
    ) -> Result<Vec<NodeHandle>> {
        let mut handles = Vec::with_capacity(indices.len());
        for index in indices {
            match self.allocate_node(*index, parent) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in handles {
                        self.deallocate_node(handle)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Release a node's slot for reuse and return its header. Chunks are never shrunk.
    pub fn deallocate_node(&mut self, handle: NodeHandle) -> Result<MWNode<D>> {
        let node = self
            .chunks
            .get_mut(handle.chunk())
            .and_then(|chunk| chunk.release(handle.slot()))
            .ok_or(Error::InvalidHandle(handle))?;
        self.with_space.insert(handle.chunk());
        self.n_nodes -= 1;
        Ok(node)
    }

    /// Whether `handle` refers to a live node.
    pub fn is_occupied(&self, handle: NodeHandle) -> bool {
        self.try_node(handle).is_some()
    }

    /// The node at `handle`, `None` if the slot is free or out of range.
    pub fn try_node(&self, handle: NodeHandle) -> Option<&MWNode<D>> {
        self.chunks.get(handle.chunk())?.get(handle.slot())
    }

    /// The node at `handle`.
    ///
    /// # Panics
    /// If the handle does not refer to a live node.
    pub fn node(&self, handle: NodeHandle) -> &MWNode<D> {
        self.try_node(handle)
            .unwrap_or_else(|| panic!("{}", Error::InvalidHandle(handle)))
    }

    /// Mutable access to the node at `handle`.
    ///
    /// # Panics
    /// If the handle does not refer to a live node.
    pub fn node_mut(&mut self, handle: NodeHandle) -> &mut MWNode<D> {
        self.chunks
            .get_mut(handle.chunk())
            .and_then(|chunk| chunk.get_mut(handle.slot()))
            .unwrap_or_else(|| panic!("{}", Error::InvalidHandle(handle)))
    }

    /// Offset of a node's coefficient block from the start of the chunk storage. In shared mode
    /// this is the value offset into the segment.
    pub fn coefs_offset(&self, handle: NodeHandle) -> usize {
        handle.chunk() * self.chunk_values() + handle.slot() * self.coeff_size
    }

    fn coefs_unchecked(&self, handle: NodeHandle) -> &[f64] {
        match &self.store {
            CoefficientStore::Local(blocks) => {
                let start = handle.slot() * self.coeff_size;
                &blocks[handle.chunk()][start..start + self.coeff_size]
            }
            CoefficientStore::Shared(segment) => {
                let start = self.coefs_offset(handle);
                &segment.values()[start..start + self.coeff_size]
            }
        }
    }

    fn coefs_unchecked_mut(&mut self, handle: NodeHandle) -> &mut [f64] {
        let start = self.coefs_offset(handle);
        let coeff_size = self.coeff_size;
        match &mut self.store {
            CoefficientStore::Local(blocks) => {
                let start = handle.slot() * coeff_size;
                &mut blocks[handle.chunk()][start..start + coeff_size]
            }
            CoefficientStore::Shared(segment) => {
                &mut segment.values_mut()[start..start + coeff_size]
            }
        }
    }

    /// Coefficient block of a live node.
    ///
    /// # Panics
    /// If the handle does not refer to a live node.
    pub fn coefs(&self, handle: NodeHandle) -> &[f64] {
        self.node(handle);
        self.coefs_unchecked(handle)
    }

    /// Mutable coefficient block of a live node. Norm caches are not touched.
    ///
    /// # Panics
    /// If the handle does not refer to a live node.
    pub fn coefs_mut(&mut self, handle: NodeHandle) -> &mut [f64] {
        self.node(handle);
        self.coefs_unchecked_mut(handle)
    }

    /// Recompute a node's norm caches from its coefficients.
    pub(crate) fn calc_norms(&mut self, handle: NodeHandle) {
        let c = handle.chunk();
        let slot = handle.slot();
        let coeff_size = self.coeff_size;
        let start = self.coefs_offset(handle);
        let coefs = match &self.store {
            CoefficientStore::Local(blocks) => {
                &blocks[c][slot * coeff_size..(slot + 1) * coeff_size]
            }
            CoefficientStore::Shared(segment) => &segment.values()[start..start + coeff_size],
        };
        match self.chunks.get_mut(c).and_then(|chunk| chunk.get_mut(slot)) {
            Some(node) => node.calc_norms(coefs),
            None => panic!("{}", Error::InvalidHandle(handle)),
        }
    }

    /// Handles of all live nodes, chunk by chunk.
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.chunks.iter().enumerate().flat_map(|(c, chunk)| {
            chunk
                .occupied_slots()
                .map(move |slot| NodeHandle::new(c, slot))
        })
    }

    /// Largest number of live nodes this allocator can hold.
    pub fn max_nodes(&self) -> Option<usize> {
        match (self.max_nodes, self.store_limit()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
