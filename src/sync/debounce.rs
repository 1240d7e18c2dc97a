//! Single-shot timers for batching triggers

use std::time::Duration;

use tokio::time::Instant;

/// A timer that fires once after a quiet period.
///
/// [`trigger`](Debouncer::trigger) restarts the wait (bounded by
/// `max_delay` from the first trigger of a burst), while
/// [`arm`](Debouncer::arm) only starts it if it isn't already running.
/// Either way at most one firing is pending at a time.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    max_delay: Option<Duration>,
    deadline: Option<Instant>,
    first: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: None,
            deadline: None,
            first: None,
        }
    }

    /// Never postpone more than `max_delay` past the first trigger
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay.max(self.delay));
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Start or restart the quiet period
    pub fn trigger(&mut self) {
        let now = Instant::now();
        let first = *self.first.get_or_insert(now);
        let mut deadline = now + self.delay;
        if let Some(max) = self.max_delay {
            deadline = deadline.min(first + max);
        }
        self.deadline = Some(deadline);
    }

    /// Start the timer unless it is already running. Returns whether it was
    /// started by this call.
    pub fn arm(&mut self) -> bool {
        if self.is_armed() {
            return false;
        }
        self.trigger();
        true
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.first = None;
    }

    /// Resolve when the timer fires, leaving it idle. Never resolves while
    /// idle. Dropping the future before it resolves leaves the timer as is.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.cancel();
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(60);

    #[tokio::test]
    async fn test_idle_never_fires() {
        let mut timer = Debouncer::new(DELAY);
        let res = tokio::time::timeout(DELAY * 3, timer.fired()).await;
        assert!(res.is_err());
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_fires_once_after_quiet_period() {
        let mut timer = Debouncer::new(DELAY);
        let start = Instant::now();
        timer.trigger();
        timer.fired().await;
        assert!(start.elapsed() >= DELAY);
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_trigger_resets_but_arm_does_not() {
        let mut timer = Debouncer::new(DELAY);
        assert!(timer.arm());
        let first_deadline = timer.deadline.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!timer.arm());
        assert_eq!(timer.deadline.unwrap(), first_deadline);

        timer.trigger();
        assert!(timer.deadline.unwrap() > first_deadline);
    }

    #[tokio::test]
    async fn test_max_delay_caps_postponement() {
        let mut timer = Debouncer::new(DELAY).with_max_delay(DELAY * 2);
        let start = Instant::now();
        timer.trigger();
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            timer.trigger();
        }
        assert!(timer.deadline.unwrap() <= start + DELAY * 2);
    }

    #[tokio::test]
    async fn test_cancelled_wait_keeps_timer_armed() {
        let mut timer = Debouncer::new(DELAY);
        timer.trigger();
        let res = tokio::time::timeout(Duration::from_millis(5), timer.fired()).await;
        assert!(res.is_err());
        assert!(timer.is_armed());
    }
}
