//! Adaptive multiwavelet trees
//!
//! An [MWTree](tree::MWTree) refines the roots of a [WorldBox](world::WorldBox) adaptively and
//! stores a block of multiwavelet coefficients per node. Nodes live in the chunks of a
//! [NodeAllocator](allocator::NodeAllocator), optionally carved from a segment of shared memory
//! that several processes map.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod allocator;
pub mod constants;
pub mod filter;
pub mod index;
pub mod node;
pub mod node_box;
pub mod operators;
pub mod traits;
pub mod tree;
pub mod types;
pub mod verbosity;
pub mod world;

pub use allocator::{AllocatorOptions, NodeAllocator, NodeHandle, SharedMemory};
pub use index::NodeIndex;
pub use node::MWNode;
pub use tree::MWTree;
pub use types::{Error, Result, TransformDirection};
pub use world::{MultiResolutionAnalysis, WorldBox};
