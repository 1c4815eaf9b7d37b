use std::time::{Duration, Instant};

/// Owned debounce timer. Every `schedule` pushes the deadline out by the full
/// delay; `poll` fires at most once per burst.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true exactly once when the pending deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(100);

    #[test]
    fn burst_fires_once_after_last_trigger() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(DELAY);
        for step in 0..5 {
            debounce.schedule(start + Duration::from_millis(step * 20));
        }
        assert!(!debounce.poll(start + Duration::from_millis(150)));
        assert!(debounce.poll(start + Duration::from_millis(180)));
        assert!(!debounce.poll(start + Duration::from_millis(500)));
    }

    #[test]
    fn cancel_drops_pending_fire() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(DELAY);
        debounce.schedule(start);
        assert!(debounce.is_pending());
        debounce.cancel();
        assert!(!debounce.poll(start + DELAY * 2));
        assert_eq!(debounce.deadline(), None);
    }
}
