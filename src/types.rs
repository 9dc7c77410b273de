//! General type definitions

use crate::allocator::NodeHandle;

/// Errors raised by the tree and its node allocator.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The allocator's node ceiling, or the shared segment, is exhausted.
    #[error("Out of memory: cannot allocate more than {max_nodes} nodes")]
    OutOfMemory {
        /// The ceiling that was hit.
        max_nodes: usize,
    },

    /// Use of a freed or out of range node handle.
    #[error("Invalid node handle {0:?}")]
    InvalidHandle(NodeHandle),

    /// No node exists at the requested index.
    #[error("Node not found at scale {scale}, translation {translation:?}")]
    NodeNotFound {
        /// Scale of the requested node.
        scale: i32,
        /// Translation of the requested node.
        translation: Vec<i64>,
    },

    /// A coordinate or index lies outside a non-periodic world box.
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Mapping or attaching a shared segment failed.
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] std::io::Error),

    /// A construction parameter was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result Type
pub type Result<T> = std::result::Result<T, Error>;

/// Direction of a multiwavelet transform.
///
/// - `Down`: scaling coefficients are pushed from parents into their children.
/// - `Up`: children's scaling coefficients are compressed into their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDirection {
    /// Reconstruction, root towards the leaves.
    Down,
    /// Compression, leaves towards the root.
    Up,
}
