//! Configuration types for runtime and transfer settings

/// Highest accepted rate limit, in megabits per second.
pub const MAX_RATE_LIMIT_MBPS: u32 = 2000;

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Outbound bandwidth ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Megabits per second (0 = no throttle)
    pub mbps: u32,
}

impl RateLimit {
    pub fn unlimited() -> Self {
        Self { mbps: 0 }
    }

    pub fn is_unlimited(&self) -> bool {
        self.mbps == 0
    }

    /// Rate in bytes per second, 1 Mbps being 10^6 bits.
    pub fn bytes_per_sec(&self) -> u64 {
        u64::from(self.mbps) * 1_000_000 / 8
    }

    /// Largest single acquisition the token bucket admits.
    pub fn burst_bytes(&self) -> u64 {
        self.bytes_per_sec() * 2
    }

    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.mbps > MAX_RATE_LIMIT_MBPS {
            return Err(format!(
                "rate limit should be at most {MAX_RATE_LIMIT_MBPS} Mbps, got {}",
                self.mbps
            ));
        }
        Ok(())
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { mbps: 10 }
    }
}
