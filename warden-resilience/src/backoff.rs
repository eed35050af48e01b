//! Backoff strategies for respawning crashed processes

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A crash after this much quiet starts a new streak
pub const STREAK_RESET_AFTER: Duration = Duration::from_secs(60);

/// Backoff strategy between consecutive restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between restarts
    Fixed,

    /// Linear increase: delay = initial_delay * attempt
    Linear,

    /// Exponential increase: delay = initial_delay * base^(attempt-1)
    Exponential {
        /// Base for exponential calculation (e.g., 2.0 for doubling)
        base: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential { base: 2.0 }
    }
}

/// Backoff delay calculator
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    strategy: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffCalculator {
    /// Create a new backoff calculator
    pub fn new(
        strategy: BackoffStrategy,
        initial_delay: Duration,
        max_delay: Duration,
        jitter: bool,
    ) -> Self {
        Self {
            strategy,
            initial_delay,
            max_delay,
            jitter,
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.calculate_base_delay(attempt);
        let capped_delay = base_delay.min(self.max_delay);

        if self.jitter {
            self.add_jitter(capped_delay)
        } else {
            capped_delay
        }
    }

    fn calculate_base_delay(&self, attempt: u32) -> Duration {
        match &self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,

            BackoffStrategy::Linear => self
                .initial_delay
                .checked_mul(attempt.max(1))
                .unwrap_or(self.max_delay),

            BackoffStrategy::Exponential { base } => {
                if attempt == 0 {
                    return Duration::ZERO;
                }
                let multiplier = base.powi(attempt as i32 - 1);
                let nanos = self.initial_delay.as_nanos() as f64 * multiplier;
                if nanos >= self.max_delay.as_nanos() as f64 {
                    self.max_delay
                } else {
                    Duration::from_nanos(nanos as u64)
                }
            }
        }
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        // +/-20%
        let jitter_factor = rand::rng().random_range(0.8..1.2);
        Duration::from_nanos((delay.as_nanos() as f64 * jitter_factor) as u64)
    }
}

/// Tracks a streak of crashes and hands out growing restart delays.
///
/// A crash that arrives after `reset_after` of quiet starts a new streak.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    calculator: BackoffCalculator,
    reset_after: Duration,
    attempt: u32,
    last_crash: Option<Instant>,
}

impl RestartBackoff {
    pub fn new(calculator: BackoffCalculator, reset_after: Duration) -> Self {
        Self {
            calculator,
            reset_after,
            attempt: 0,
            last_crash: None,
        }
    }

    /// Respawn backoff with the standard streak window. `max` never drops below `initial`.
    pub fn for_respawn(
        strategy: BackoffStrategy,
        initial: Duration,
        max: Duration,
        jitter: bool,
    ) -> Self {
        Self::new(
            BackoffCalculator::new(strategy, initial, max.max(initial), jitter),
            STREAK_RESET_AFTER,
        )
    }

    /// Record a crash and return how long to wait before restarting
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_at(Instant::now())
    }

    pub fn next_delay_at(&mut self, now: Instant) -> Duration {
        if let Some(last) = self.last_crash {
            if now.saturating_duration_since(last) >= self.reset_after {
                log::debug!("Crash streak reset after {:?} of quiet", self.reset_after);
                self.attempt = 0;
            }
        }

        self.last_crash = Some(now);
        self.attempt = self.attempt.saturating_add(1);
        self.calculator.calculate_delay(self.attempt)
    }

    /// Number of crashes in the current streak
    pub fn streak(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_crash = None;
    }
}
