use std::time::Duration;

/// Delay growth between save attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles per retry, capped at `max_delay`.
    Exponential { max_delay: Duration },
}

/// Bounded retry budget for one persist sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based), or `None` when
    /// that was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }
        match self.backoff {
            Backoff::Fixed => Some(self.delay),
            Backoff::Exponential { max_delay } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                Some(self.delay.saturating_mul(factor).min(max_delay))
            }
        }
    }
}
