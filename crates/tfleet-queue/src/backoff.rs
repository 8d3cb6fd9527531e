//! Exponential poll backoff.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// Delay that doubles from `base` up to `max` after every cycle that found no
/// work, and resets to `base` after a cycle that did.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    idle_cycles: u32,
    interrupt: Option<watch::Receiver<bool>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            idle_cycles: 0,
            interrupt: None,
        }
    }

    /// Cut sleeps short once `interrupt` reads `true`.
    pub fn interruptible(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Delay the next idle cycle will sleep for: `min(base * 2^n, max)` after
    /// `n` consecutive idle cycles.
    pub fn current_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.idle_cycles);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }

    pub fn reset(&mut self) {
        self.idle_cycles = 0;
    }

    /// Run one cycle.
    ///
    /// `cycle` resolves to `Ok(true)` when it did work. Idle cycles and
    /// failures sleep for the current delay and widen it; the result is
    /// passed through either way.
    pub async fn wrap<F, E>(&mut self, cycle: F) -> Result<bool, E>
    where
        F: Future<Output = Result<bool, E>>,
    {
        let result = cycle.await;
        match result {
            Ok(true) => self.reset(),
            _ => self.idle().await,
        }
        result
    }

    async fn idle(&mut self) {
        let delay = self.current_delay();
        debug!(?delay, idle_cycles = self.idle_cycles, "Backing off");
        match self.interrupt.clone() {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_true(rx) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        // Stop doubling once capped
        if self.current_delay() < self.max {
            self.idle_cycles += 1;
        }
    }
}

async fn wait_true(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(backoff.current_delay(), Duration::from_millis(100));
        for (n, expected) in [(1, 200), (2, 400), (3, 800), (4, 1000), (10, 1000)] {
            backoff.idle_cycles = n;
            assert_eq!(backoff.current_delay(), Duration::from_millis(expected), "n = {}", n);
        }
    }

    #[tokio::test]
    async fn test_wrap_widens_on_idle_and_resets_on_work() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(8));

        for _ in 0..3 {
            let did_work = backoff.wrap(async { Ok::<_, ()>(false) }).await;
            assert_eq!(did_work, Ok(false));
        }
        assert_eq!(backoff.current_delay(), Duration::from_millis(8));

        backoff.wrap(async { Err::<bool, _>("broker down") }).await.unwrap_err();
        assert_eq!(backoff.current_delay(), Duration::from_millis(8));

        assert_eq!(backoff.wrap(async { Ok::<_, ()>(true) }).await, Ok(true));
        assert_eq!(backoff.current_delay(), Duration::from_millis(1));
        assert_eq!(backoff.idle_cycles(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_cuts_sleep_short() {
        let (tx, rx) = watch::channel(false);
        let mut backoff =
            Backoff::new(Duration::from_secs(60), Duration::from_secs(60)).interruptible(rx);
        tx.send(true).unwrap();

        let started = std::time::Instant::now();
        backoff.wrap(async { Ok::<_, ()>(false) }).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
