use super::Scheduler;

/// Default usable stack size of a coroutine.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack size accepted by [`SchedulerBuilder::stack_size`].
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Default number of dead coroutines kept for reuse.
pub const DEFAULT_DEAD_CACHE: usize = 64;

/// Configuration captured by a [`Scheduler`] at construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Config {
    pub(crate) stack_size: usize,
    pub(crate) dead_cache: usize,
    pub(crate) guard_checks: bool,
}

/// Builder for configuring and creating a scheduler.
///
/// `SchedulerBuilder` allows customizing scheduler parameters before
/// constructing the scheduler: the default coroutine stack size, the
/// number of dead coroutines kept for reuse and whether stack sentinels
/// are checked on every switch.
///
/// # Examples
///
/// ```rust
/// let scheduler = costack::SchedulerBuilder::new()
///     .stack_size(64 * 1024)
///     .dead_cache(16)
///     .build();
///
/// let answer = scheduler.block_on(|| 6 * 7).unwrap();
/// assert_eq!(answer, 42);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
    config: Config,
}

impl SchedulerBuilder {
    /// Creates a new `SchedulerBuilder` with default configuration.
    ///
    /// By default coroutines get [`DEFAULT_STACK_SIZE`] bytes of stack, up
    /// to [`DEFAULT_DEAD_CACHE`] dead coroutines are cached, and guard
    /// checks are enabled in debug builds only.
    pub fn new() -> Self {
        Self {
            config: Config {
                stack_size: DEFAULT_STACK_SIZE,
                dead_cache: DEFAULT_DEAD_CACHE,
                guard_checks: cfg!(debug_assertions),
            },
        }
    }

    /// Sets the stack size used by [`Scheduler::spawn`] and the I/O loop.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than [`MIN_STACK_SIZE`].
    pub fn stack_size(mut self, size: usize) -> Self {
        assert!(
            size >= MIN_STACK_SIZE,
            "stack_size must be at least {MIN_STACK_SIZE} bytes"
        );

        self.config.stack_size = size;
        self
    }

    /// Sets how many dead coroutines are kept for reuse.
    ///
    /// Coroutines dying past the cap are destroyed, oldest first, by the
    /// next start.
    pub fn dead_cache(mut self, n: usize) -> Self {
        self.config.dead_cache = n;
        self
    }

    /// Enables or disables the stack sentinel checks.
    pub fn guard_checks(mut self, enabled: bool) -> Self {
        self.config.guard_checks = enabled;
        self
    }

    /// Builds the scheduler with the configured options.
    pub fn build(self) -> Scheduler {
        Scheduler::with_config(self.config)
    }

    pub(crate) fn config(&self) -> Config {
        self.config
    }
}

impl Default for SchedulerBuilder {
    /// Creates a default `SchedulerBuilder`.
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let builder = SchedulerBuilder::new();

        assert_eq!(builder.config.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(builder.config.dead_cache, DEFAULT_DEAD_CACHE);
        assert_eq!(builder.config.guard_checks, cfg!(debug_assertions));
    }

    #[test]
    #[should_panic(expected = "stack_size must be at least")]
    fn test_stack_size_too_small() {
        let _ = SchedulerBuilder::new().stack_size(1024);
    }
}
