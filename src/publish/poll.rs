use std::time::Duration;
use tokio::time::Instant;

use crate::config::PollSettings;

/// Bounded exponential backoff for readiness polling.
///
/// Each call to [`Backoff::wait`] sleeps `min(initial * 2^n, max)` and reports
/// whether another poll is allowed. The budget is exhausted by whichever comes
/// first: the attempt count or the overall timeout.
#[derive(Debug)]
pub struct Backoff {
    settings: PollSettings,
    attempt: u32,
    /// `None` when the timeout is too large to represent.
    deadline: Option<Instant>,
}

impl Backoff {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            deadline: Instant::now().checked_add(settings.timeout),
            settings,
            attempt: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.settings
            .initial_backoff
            .saturating_mul(factor)
            .min(self.settings.max_backoff)
    }

    /// Sleep before the next poll. Returns `false` once the budget is spent.
    pub async fn wait(&mut self) -> bool {
        if self.attempt >= self.settings.max_attempts {
            return false;
        }
        let mut delay = self.delay_for(self.attempt);
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            delay = delay.min(deadline - now);
        }

        self.attempt += 1;
        tokio::time::sleep(delay).await;
        true
    }
}
