use std::time::Duration;

use tokio::time::Instant;

use crate::model::Ms;

pub(crate) fn system_now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Wall-clock milliseconds derived from tokio's monotonic clock.
///
/// The anchor pairs a unix timestamp with a `tokio::time::Instant`, so the
/// reading advances with tokio time. Under a paused test runtime the clock
/// only moves when the test sleeps or calls `tokio::time::advance`.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_ms: Ms,
    anchor: Instant,
}

impl Clock {
    pub fn system() -> Self {
        Self::starting_at(system_now_ms())
    }

    pub fn starting_at(now_ms: Ms) -> Self {
        Self {
            anchor_ms: now_ms,
            anchor: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> Ms {
        let elapsed = Ms::try_from(self.anchor.elapsed().as_millis()).unwrap_or(Ms::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }

    /// Time left until `at`, zero if `at` is now or past.
    pub fn until(&self, at: Ms) -> Duration {
        let delta = at.saturating_sub(self.now_ms());
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(delta as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follows_tokio_time() {
        let clock = Clock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
    }

    #[tokio::test(start_paused = true)]
    async fn until_saturates_at_zero() {
        let clock = Clock::starting_at(5_000);
        assert_eq!(clock.until(5_500), Duration::from_millis(500));
        assert_eq!(clock.until(5_000), Duration::ZERO);
        assert_eq!(clock.until(1), Duration::ZERO);
        assert_eq!(clock.until(Ms::MIN), Duration::ZERO);
        assert_eq!(clock.until(Ms::MAX), Duration::from_millis((Ms::MAX - 5_000) as u64));
    }

    #[test]
    fn system_clock_is_near_wall_time() {
        let before = system_now_ms();
        let clock = Clock::system();
        assert!(clock.now_ms() >= before);
    }
}
