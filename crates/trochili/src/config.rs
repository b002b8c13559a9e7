//! Kernel sizing and tuning.

/// Configuration for a [`Kernel`](crate::Kernel).
///
/// Table sizes bound how many objects of each kind may exist at once; the
/// idle thread counts against `max_threads`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct KernelConfig {
    pub name: &'static str,
    pub max_threads: usize,
    pub max_semaphores: usize,
    pub max_mutexes: usize,
    pub max_flags: usize,
    pub max_mailboxes: usize,
    /// Time slice given to threads that do not set their own.
    pub default_time_slice: u32,
    /// Time slice of the idle thread.
    pub idle_time_slice: u32,
    /// Percentage of the stack that may be used before the alarm is raised.
    pub stack_alarm_ratio: u8,
    /// Word written at the stack base and checked on every switch.
    pub stack_barrier: u32,
    /// Entry function handed to the port for the idle thread.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub idle_hook: Option<fn(usize)>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "Trochili",
            max_threads: 16,
            max_semaphores: 16,
            max_mutexes: 8,
            max_flags: 8,
            max_mailboxes: 8,
            default_time_slice: 10,
            idle_time_slice: 1,
            stack_alarm_ratio: 70,
            stack_barrier: 0x5A5A_5A5A,
            idle_hook: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for [`KernelConfig`].
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    pub fn max_threads(mut self, max: usize) -> Self {
        self.config.max_threads = max;
        self
    }

    pub fn max_semaphores(mut self, max: usize) -> Self {
        self.config.max_semaphores = max;
        self
    }

    pub fn max_mutexes(mut self, max: usize) -> Self {
        self.config.max_mutexes = max;
        self
    }

    pub fn max_flags(mut self, max: usize) -> Self {
        self.config.max_flags = max;
        self
    }

    pub fn max_mailboxes(mut self, max: usize) -> Self {
        self.config.max_mailboxes = max;
        self
    }

    /// Sets the default and idle time slices, in ticks. Zero is raised to one.
    pub fn time_slices(mut self, default: u32, idle: u32) -> Self {
        self.config.default_time_slice = default.max(1);
        self.config.idle_time_slice = idle.max(1);
        self
    }

    /// Sets the stack alarm level, clamped to 100 percent.
    pub fn stack_alarm_ratio(mut self, percent: u8) -> Self {
        self.config.stack_alarm_ratio = percent.min(100);
        self
    }

    pub fn stack_barrier(mut self, word: u32) -> Self {
        self.config.stack_barrier = word;
        self
    }

    pub fn idle_hook(mut self, hook: fn(usize)) -> Self {
        self.config.idle_hook = Some(hook);
        self
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_degenerate_values() {
        let config = KernelConfig::builder()
            .time_slices(0, 0)
            .stack_alarm_ratio(250)
            .build();

        assert_eq!(config.default_time_slice, 1);
        assert_eq!(config.idle_time_slice, 1);
        assert_eq!(config.stack_alarm_ratio, 100);
    }
}
