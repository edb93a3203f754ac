use super::Runtime;

/// Time source driving the runtime's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    /// Timers wait on the wall clock.
    #[default]
    Real,

    /// Simulated time: when nothing else is runnable, the loop jumps straight
    /// to the next timer deadline.
    Virtual,
}

/// What the root zone does with an uncaught asynchronous error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UncaughtErrorPolicy {
    /// Rethrow from a priority microtask: the loop panics with the error.
    #[default]
    Panic,

    /// Log the error through the `log` facade and keep running.
    Log,
}

/// Builder for configuring and creating a runtime.
///
/// `RuntimeBuilder` allows customizing runtime parameters before
/// constructing the runtime.
///
/// # Examples
///
/// ```rust,ignore
/// let runtime = RuntimeBuilder::new()
///     .clock(Clock::Virtual)
///     .build();
/// ```
pub struct RuntimeBuilder {
    /// Time source for timers.
    clock: Clock,

    /// Root zone behavior for uncaught errors.
    uncaught: UncaughtErrorPolicy,
}

impl RuntimeBuilder {
    /// Creates a new `RuntimeBuilder` with default configuration:
    /// a real clock and uncaught errors that panic.
    pub fn new() -> Self {
        Self {
            clock: Clock::default(),
            uncaught: UncaughtErrorPolicy::default(),
        }
    }

    /// Selects the clock driving timers.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Selects how the root zone reports uncaught errors.
    pub fn uncaught_errors(mut self, policy: UncaughtErrorPolicy) -> Self {
        self.uncaught = policy;
        self
    }

    /// Builds the runtime with the configured options.
    pub fn build(self) -> Runtime {
        Runtime::new(self.clock, self.uncaught)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
