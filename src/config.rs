//! Builder-style configuration for the optimizer, interpreter and JIT:
//! a `new`/`default` constructor plus chainable `with_*` methods that
//! consume and return `Self`.

use crate::interp::EofPolicy;
use crate::opt::OptLevel;

/// Which [`crate::tape::TapeBackend`] a run should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TapeBackendChoice {
    /// Lazily-allocated pages; works everywhere.
    #[default]
    Paged,
    /// A single `mmap`'d 2^32-byte region; unix only, see
    /// [`crate::tape::Mapped::supported`].
    Mapped,
}

/// Controls [`crate::opt::optimize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptConfig {
    pub level: OptLevel,
    pub max_iterations: u32,
}

impl Default for OptConfig {
    fn default() -> Self {
        OptConfig { level: OptLevel::default(), max_iterations: crate::opt::DEFAULT_MAX_ITERATIONS }
    }
}

impl OptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: OptLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Controls [`crate::interp::Interpreter`] construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    pub eof_policy: EofPolicy,
    pub tape_backend: TapeBackendChoice,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig { eof_policy: EofPolicy::LeaveUnchanged, tape_backend: TapeBackendChoice::Paged }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eof_policy(mut self, eof_policy: EofPolicy) -> Self {
        self.eof_policy = eof_policy;
        self
    }

    pub fn with_tape_backend(mut self, tape_backend: TapeBackendChoice) -> Self {
        self.tape_backend = tape_backend;
        self
    }
}

/// Controls whether `run` tries the x86-64 JIT before falling back to the
/// interpreter, and whether a JIT failure is fatal or silently downgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    pub enabled: bool,
    pub fall_back_on_failure: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig { enabled: cfg!(all(target_arch = "x86_64", unix)), fall_back_on_failure: true }
    }
}

impl JitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_fall_back_on_failure(mut self, fall_back_on_failure: bool) -> Self {
        self.fall_back_on_failure = fall_back_on_failure;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_config_defaults_to_normal_level() {
        let cfg = OptConfig::default();
        assert_eq!(cfg.level, OptLevel::Normal);
    }

    #[test]
    fn builders_chain_without_losing_earlier_settings() {
        let cfg = InterpreterConfig::new()
            .with_eof_policy(EofPolicy::Substitute(0))
            .with_tape_backend(TapeBackendChoice::Mapped);
        assert_eq!(cfg.eof_policy, EofPolicy::Substitute(0));
        assert_eq!(cfg.tape_backend, TapeBackendChoice::Mapped);
    }

    #[test]
    fn jit_config_off_host_defaults_disabled() {
        let cfg = JitConfig::default();
        assert_eq!(cfg.enabled, cfg!(all(target_arch = "x86_64", unix)));
    }
}
