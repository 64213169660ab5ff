//! Scheduler configuration.

use crate::chooser::Scheme;

/// Tunables for a [`crate::scheduler::Scheduler`].
///
/// There is no hot-reload: a value is constructed once at actor startup and
/// handed to the builder. Nothing here persists across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Per-engine cap on outstanding tasks. `0` disables the cap.
    pub hwm: u32,
    /// Placement strategy.
    pub scheme: Scheme,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hwm: 1,
            scheme: Scheme::LeastLoad,
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    hwm: Option<u32>,
    scheme: Option<Scheme>,
}

impl SchedulerConfigBuilder {
    pub fn hwm(mut self, hwm: u32) -> Self {
        self.hwm = Some(hwm);
        self
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn build(self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            hwm: self.hwm.unwrap_or(defaults.hwm),
            scheme: self.scheme.unwrap_or(defaults.scheme),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.hwm, 1);
        assert_eq!(cfg.scheme, Scheme::LeastLoad);
    }

    #[test]
    fn builder_overrides_only_supplied_fields() {
        let cfg = SchedulerConfig::builder().hwm(4).build();
        assert_eq!(cfg.hwm, 4);
        assert_eq!(cfg.scheme, Scheme::LeastLoad);
    }
}
