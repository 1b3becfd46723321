use std::time::Duration;
use tokio::time::Instant;

/// Sliding count of restarts inside a fixed window.
///
/// The window opens at the first restart after a reset and closes
/// `window` later; a restart outside it opens a new window.
#[derive(Debug, Clone)]
pub struct RestartBudget {
    max_restarts: u32,
    window: Duration,
    count: u32,
    window_start: Option<Instant>,
}

impl RestartBudget {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            count: 0,
            window_start: None,
        }
    }

    fn window_open(&self, now: Instant) -> bool {
        self.window_start
            .is_some_and(|start| now.saturating_duration_since(start) < self.window)
    }

    /// Claim one restart at `now`. Returns `false` when the window is spent.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.window_open(now) {
            self.window_start = Some(now);
            self.count = 0;
        }

        if self.count >= self.max_restarts {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.window_start = None;
    }

    /// Restarts counted at `now`; zero once the window has elapsed.
    pub fn count_at(&self, now: Instant) -> u32 {
        if self.window_open(now) {
            self.count
        } else {
            0
        }
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausts_within_window() {
        let start = Instant::now();
        let mut budget = RestartBudget::new(3, Duration::from_secs(10));

        assert!(budget.try_acquire(start));
        assert!(budget.try_acquire(start + Duration::from_secs(1)));
        assert!(budget.try_acquire(start + Duration::from_secs(2)));
        assert!(!budget.try_acquire(start + Duration::from_secs(3)));
        assert_eq!(budget.count_at(start + Duration::from_secs(3)), 3);
    }

    #[test]
    fn test_new_window_after_expiry() {
        let start = Instant::now();
        let mut budget = RestartBudget::new(3, Duration::from_secs(10));
        for i in 0..3 {
            assert!(budget.try_acquire(start + Duration::from_secs(i)));
        }
        assert!(budget.try_acquire(start + Duration::from_secs(10)));
        assert_eq!(budget.count_at(start + Duration::from_secs(10)), 1);
    }

    #[test]
    fn test_count_expires_with_window() {
        let start = Instant::now();
        let mut budget = RestartBudget::new(3, Duration::from_secs(10));
        for i in 0..3 {
            assert!(budget.try_acquire(start + Duration::from_secs(i)));
        }
        assert_eq!(budget.count_at(start + Duration::from_secs(9)), 3);
        assert_eq!(budget.count_at(start + Duration::from_secs(10)), 0);
        assert_eq!(budget.count_at(start + Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_reset_clears_count() {
        let start = Instant::now();
        let mut budget = RestartBudget::new(1, Duration::from_secs(10));
        assert!(budget.try_acquire(start));
        assert!(!budget.try_acquire(start));
        budget.reset();
        assert_eq!(budget.count_at(start), 0);
        assert!(budget.try_acquire(start));
    }

    #[test]
    fn test_zero_budget_never_restarts() {
        let mut budget = RestartBudget::new(0, Duration::from_secs(10));
        assert!(!budget.try_acquire(Instant::now()));
    }
}
