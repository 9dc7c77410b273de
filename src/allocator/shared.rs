//! Coefficient storage in a memory mapped segment that several processes can map.
//!
//! The segment only holds coefficient blocks. Chunk `c` starts at value offset
//! `c * max_nodes_per_chunk * coeff_size` and slot `s` of it a further `s * coeff_size` values
//! in, so a block is located by its `(chunk, slot)` pair in every process that maps the segment.
//!
//! Writers and readers in different processes must agree on an external barrier before reading
//! blocks written by someone else. Growing the same segment from two processes at once is not
//! supported and is not guarded against.
use std::{
    fs::OpenOptions,
    mem::{align_of, size_of},
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};

use crate::types::{Error, Result};

#[cfg(feature = "mpi")]
use mpi::traits::{Communicator, CommunicatorCollectives};

/// A mapped segment of `f64` values.
#[derive(Debug)]
pub struct SharedMemory {
    map: MmapMut,
    path: Option<PathBuf>,
    n_values: usize,
}

impl SharedMemory {
    /// Map an anonymous shared segment of `n_bytes`. It is inherited by forked children.
    pub fn anonymous(n_bytes: usize) -> Result<Self> {
        let map = MmapOptions::new().len(n_bytes).map_anon()?;
        Self::from_map(map, None)
    }

    /// Create (or truncate) the file at `path`, size it to `n_bytes` and map it.
    pub fn create(path: impl AsRef<Path>, n_bytes: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(n_bytes as u64)?;
        // Safety: the mapping is only reinterpreted as plain f64 values, any concurrent writer
        // in another process is covered by the external barrier contract of this module.
        let map = unsafe { MmapMut::map_mut(&file)? };
        log::debug!("Created shared segment {} of {} bytes", path.display(), n_bytes);
        Self::from_map(map, Some(path.to_path_buf()))
    }

    /// Attach to a segment created by another process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // Safety: see `create`.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Self::from_map(map, Some(path.to_path_buf()))
    }

    /// Rank zero of `comm` creates the segment, every other rank attaches to it after a barrier.
    #[cfg(feature = "mpi")]
    pub fn create_on_comm<C: Communicator + CommunicatorCollectives>(
        comm: &C,
        path: impl AsRef<Path>,
        n_bytes: usize,
    ) -> Result<Self> {
        let created = if comm.rank() == 0 {
            Some(Self::create(path.as_ref(), n_bytes))
        } else {
            None
        };
        comm.barrier();
        match created {
            Some(segment) => segment,
            None => Self::open(path),
        }
    }

    fn from_map(map: MmapMut, path: Option<PathBuf>) -> Result<Self> {
        if map.len() < size_of::<f64>() {
            return Err(Error::InvalidArgument(format!(
                "shared segment of {} bytes cannot hold a coefficient",
                map.len()
            )));
        }
        if map.as_ptr().align_offset(align_of::<f64>()) != 0 {
            return Err(Error::InvalidArgument(
                "shared segment is not aligned for f64".to_string(),
            ));
        }
        let n_values = map.len() / size_of::<f64>();
        Ok(Self {
            map,
            path,
            n_values,
        })
    }

    /// Number of `f64` values the segment holds.
    pub fn capacity(&self) -> usize {
        self.n_values
    }

    /// Backing file, `None` for anonymous segments.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The whole segment as values.
    pub fn values(&self) -> &[f64] {
        // Safety: the mapping is aligned (checked on construction), at least n_values * 8 bytes
        // long, every bit pattern is a valid f64, and the borrow is tied to the mapping.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr() as *const f64, self.n_values) }
    }

    /// The whole segment as mutable values.
    pub fn values_mut(&mut self) -> &mut [f64] {
        // Safety: as in `values`, and `&mut self` excludes other borrows in this process.
        unsafe {
            std::slice::from_raw_parts_mut(self.map.as_mut_ptr() as *mut f64, self.n_values)
        }
    }
}
