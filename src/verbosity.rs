//! Scoped control of the log level.
use log::LevelFilter;

/// Sets the global maximum log level for its lifetime and restores the previous level when
/// dropped, including on early returns and unwinding.
///
/// The level is process global and the guard is not thread-safe. Guards must be dropped in the
/// reverse order of their creation. Guards that overlap on different threads can restore a stale
/// level and leave logging switched off.
///
/// ```
/// use log::LevelFilter;
/// use mwtree::verbosity::VerbosityGuard;
///
/// let before = log::max_level();
/// {
///     let _quiet = VerbosityGuard::new(LevelFilter::Off);
///     assert_eq!(log::max_level(), LevelFilter::Off);
/// }
/// assert_eq!(log::max_level(), before);
/// ```
#[must_use = "the previous level is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct VerbosityGuard {
    previous: LevelFilter,
}

impl VerbosityGuard {
    /// Switch to `level` until the guard goes out of scope.
    pub fn new(level: LevelFilter) -> Self {
        let previous = log::max_level();
        log::set_max_level(level);
        Self { previous }
    }

    /// The level that will be restored.
    pub fn previous(&self) -> LevelFilter {
        self.previous
    }
}

impl Drop for VerbosityGuard {
    fn drop(&mut self) {
        log::set_max_level(self.previous);
    }
}
