// Process-wide judging defaults

use crate::types::{LimitOverrides, ResourceLimits};

pub const DEFAULT_TIME_LIMIT_MS: u64 = 2000;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Fallback limits used when neither the test case, the problem nor the
/// language table sets a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JudgeDefaults {
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
    pub output_limit_bytes: usize,
}

impl Default for JudgeDefaults {
    fn default() -> Self {
        Self {
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl JudgeDefaults {
    /// Read `DEFAULT_TIME_LIMIT_MS`, `DEFAULT_MEMORY_LIMIT_MB` and
    /// `DEFAULT_OUTPUT_LIMIT_BYTES`, keeping built-in values for anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            time_limit_ms: env_or("DEFAULT_TIME_LIMIT_MS", base.time_limit_ms),
            memory_limit_mb: env_or("DEFAULT_MEMORY_LIMIT_MB", base.memory_limit_mb),
            output_limit_bytes: env_or("DEFAULT_OUTPUT_LIMIT_BYTES", base.output_limit_bytes),
        }
    }

    /// Resolve limits: test case, then problem, then language memory, then defaults
    pub fn resolve(
        &self,
        case: LimitOverrides,
        problem: LimitOverrides,
        language_memory_mb: Option<u64>,
    ) -> ResourceLimits {
        let merged = case.or(problem);
        ResourceLimits {
            time_limit_ms: merged.time_limit_ms.unwrap_or(self.time_limit_ms),
            memory_limit_mb: merged
                .memory_limit_mb
                .or(language_memory_mb)
                .unwrap_or(self.memory_limit_mb),
            output_limit_bytes: merged.output_limit_bytes.unwrap_or(self.output_limit_bytes),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
