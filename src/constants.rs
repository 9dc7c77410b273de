//! Crate wide constants

/// Number of node slots in a chunk when no other capacity is requested.
pub const DEFAULT_MAX_NODES_PER_CHUNK: usize = 2048;

/// Sentinel for a squared norm that has not been computed yet.
pub const NOT_COMPUTED: f64 = -1.0;

/// Deepest scale that may be refined to, relative to the root scale.
pub const MAX_DEPTH: u32 = 30;
