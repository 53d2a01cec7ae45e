use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Submission,
    Reconnect,
    ViewSwitch,
}

/// Minimum-interval gate per action class. Early arrivals are dropped, not queued.
#[derive(Debug)]
pub struct InputGovernor {
    interval: Duration,
    last_accepted: Mutex<HashMap<ActionClass, Instant>>,
}

impl InputGovernor {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn allow(&self, class: ActionClass) -> bool {
        self.allow_at(class, Instant::now())
    }

    pub fn allow_at(&self, class: ActionClass, now: Instant) -> bool {
        let mut last_accepted = self
            .last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = last_accepted.get(&class) {
            if now.saturating_duration_since(*last) < self.interval {
                trace!(?class, "input dropped by rate limiter");
                return false;
            }
        }
        last_accepted.insert(class, now);
        true
    }
}
