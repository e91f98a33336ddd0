use std::time::Duration;

use rand::Rng;

/// Delay before the next sync cycle. Healthy cycles wait the full interval;
/// after consecutive failures the runner retries sooner, doubling from `base`
/// and never exceeding the interval.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    interval: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, interval: Duration, jitter: bool) -> Self {
        Self {
            base: base.min(interval),
            interval,
            jitter,
        }
    }

    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        self.next_delay_with_rng(consecutive_failures, &mut rand::thread_rng())
    }

    pub fn next_delay_with_rng<R: Rng + ?Sized>(&self, consecutive_failures: u32, rng: &mut R) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let ceiling = millis(self.interval);
        let doubled = millis(self.base)
            .saturating_mul(1u64 << (consecutive_failures - 1).min(20))
            .min(ceiling);
        if !self.jitter {
            return Duration::from_millis(doubled);
        }
        // Jittered delays stay within the upper half of the doubled delay.
        let floor = doubled / 2;
        Duration::from_millis(rng.gen_range(floor..=doubled))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
