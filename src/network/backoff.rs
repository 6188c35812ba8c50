use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lịch kết nối lại khi mất kết nối.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
    /// 0 = không kết nối lại.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// `None` khi đã hết lượt thử.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let factor = u64::from(self.policy.multiplier.max(1)).saturating_pow(self.attempt);
        let delay = self
            .policy
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms);
        self.attempt += 1;
        Some(Duration::from_millis(delay))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
