//! Lane configuration and submission outcomes.

use serde::{Deserialize, Serialize};

/// What a lane does when its queue (or token bucket) refuses an admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for capacity or a token; fails only on caller cancellation.
    Block,
    /// Refuse immediately when full or token-starved.
    Drop,
    /// Try once to hand the task to the named lane, then drop.
    Redirect(String),
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::Block
    }
}

/// Token bucket parameters; the normative rate-limiting baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst).
    pub capacity: u32,
    /// Tokens replenished per second.
    pub refill_per_second: u32,
}

/// Configuration for a worker lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub name: String,
    /// Bounded queue depth. Zero admits nothing under `Drop`.
    pub capacity: usize,
    /// Fixed worker pool size.
    pub max_concurrency: usize,
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub priority_enabled: bool,
}

impl LaneConfig {
    pub fn new(name: impl Into<String>, capacity: usize, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            max_concurrency,
            backpressure: BackpressurePolicy::default(),
            rate_limit: None,
            priority_enabled: false,
        }
    }

    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    pub fn with_rate_limit(mut self, capacity: u32, refill_per_second: u32) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            capacity,
            refill_per_second,
        });
        self
    }

    pub fn with_priority(mut self) -> Self {
        self.priority_enabled = true;
        self
    }

    /// Structural validation; violations map to `InvalidLaneConfig`.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("lane name cannot be empty".into());
        }
        if self.max_concurrency == 0 {
            return Err(format!(
                "lane {}: max_concurrency must be at least 1",
                self.name
            ));
        }
        if let Some(rl) = &self.rate_limit {
            if rl.capacity == 0 || rl.refill_per_second == 0 {
                return Err(format!(
                    "lane {}: rate limit capacity and refill must be positive",
                    self.name
                ));
            }
        }
        if let BackpressurePolicy::Redirect(target) = &self.backpressure {
            if target.is_empty() {
                return Err(format!("lane {}: redirect target cannot be empty", self.name));
            }
            if *target == self.name {
                return Err(format!("lane {}: cannot redirect to itself", self.name));
            }
        }
        Ok(())
    }
}

/// Per-submission outcome. Exactly one is recorded per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted,
    Rejected,
    Redirected,
    Dropped,
}

impl SubmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Redirected => "redirected",
            Self::Dropped => "dropped",
        }
    }
}

/// Monotonic per-lane outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub accepted: u64,
    pub rejected: u64,
    pub redirected: u64,
    pub dropped: u64,
}

impl LaneStats {
    pub fn total(&self) -> u64 {
        self.accepted + self.rejected + self.redirected + self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = LaneConfig::new("default", 16, 4).with_rate_limit(10, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = LaneConfig::new("bad", 16, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_self_redirect_rejected() {
        let config = LaneConfig::new("loop", 16, 1)
            .with_backpressure(BackpressurePolicy::Redirect("loop".into()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_allowed() {
        // Useful with Drop to refuse every submission.
        let config = LaneConfig::new("null", 0, 1).with_backpressure(BackpressurePolicy::Drop);
        assert!(config.validate().is_ok());
    }
}
