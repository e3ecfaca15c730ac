use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decides how long to pause between two resource downloads.
pub(crate) trait DelayStrategy: Send + Sync {
    fn next_delay(&mut self) -> Duration;
}

/// Always waits the same amount of time.
#[derive(Debug, Clone)]
pub(crate) struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub(crate) fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl DelayStrategy for FixedDelay {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }
}

/// Waits a duration drawn uniformly from `[min, max]`, at millisecond resolution.
#[derive(Debug, Clone)]
pub(crate) struct UniformDelay {
    min: Duration,
    max: Duration,
}

impl UniformDelay {
    /// Creates the strategy. An inverted range is swapped into order.
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }
}

impl DelayStrategy for UniformDelay {
    fn next_delay(&mut self) -> Duration {
        let low = self.min.as_millis() as u64;
        let high = self.max.as_millis() as u64;
        let millis = rand::thread_rng().gen_range(low..=high);
        Duration::from_millis(millis)
    }
}

/// Lets `capacity` downloads through back to back, then one per `refill` interval.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    capacity: f64,
    refill: Duration,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub(crate) fn new(capacity: u32, refill: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn top_up(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now - self.last_refill;
        let earned = if self.refill.is_zero() {
            self.capacity
        } else {
            elapsed.as_secs_f64() / self.refill.as_secs_f64()
        };
        self.tokens = (self.tokens + earned).min(self.capacity);
        self.last_refill = now;
    }
}

impl DelayStrategy for TokenBucket {
    fn next_delay(&mut self) -> Duration {
        let now = Instant::now();
        self.top_up(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Duration::ZERO;
        }

        // The caller sleeps for `wait`, which earns exactly the missing token.
        let pending = self.last_refill.saturating_duration_since(now);
        let wait = pending + self.refill.mul_f64(1.0 - self.tokens);
        self.tokens = 0.0;
        self.last_refill = now + wait;
        debug!("Token bucket empty, next download in {:?}", wait);
        wait
    }
}

/// Politeness delay as written in `config.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub(crate) enum PolitenessConfig {
    Fixed {
        delay_secs: u64,
    },
    Uniform {
        min_delay_secs: u64,
        max_delay_secs: u64,
    },
    TokenBucket {
        capacity: u32,
        refill_secs: u64,
    },
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        PolitenessConfig::Uniform {
            min_delay_secs: 15,
            max_delay_secs: 30,
        }
    }
}

impl PolitenessConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            PolitenessConfig::Uniform {
                min_delay_secs,
                max_delay_secs,
            } if min_delay_secs > max_delay_secs => Err(format!(
                "politeness.min_delay_secs ({}) is greater than politeness.max_delay_secs ({})",
                min_delay_secs, max_delay_secs
            )),
            PolitenessConfig::TokenBucket { capacity: 0, .. } => {
                Err("politeness.capacity must be at least 1".to_string())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn build_strategy(&self) -> Box<dyn DelayStrategy> {
        match *self {
            PolitenessConfig::Fixed { delay_secs } => {
                Box::new(FixedDelay::new(Duration::from_secs(delay_secs)))
            }
            PolitenessConfig::Uniform {
                min_delay_secs,
                max_delay_secs,
            } => Box::new(UniformDelay::new(
                Duration::from_secs(min_delay_secs),
                Duration::from_secs(max_delay_secs),
            )),
            PolitenessConfig::TokenBucket {
                capacity,
                refill_secs,
            } => Box::new(TokenBucket::new(capacity, Duration::from_secs(refill_secs))),
        }
    }
}

impl fmt::Display for PolitenessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolitenessConfig::Fixed { delay_secs } => write!(f, "fixed {}s", delay_secs),
            PolitenessConfig::Uniform {
                min_delay_secs,
                max_delay_secs,
            } => write!(f, "random {}-{}s", min_delay_secs, max_delay_secs),
            PolitenessConfig::TokenBucket {
                capacity,
                refill_secs,
            } => write!(f, "burst of {}, then one every {}s", capacity, refill_secs),
        }
    }
}
