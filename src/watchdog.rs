//! Auto-start watchdog
//!
//! Invoked once per polling tick. Restarts the connection only when it has
//! been down for longer than the grace period *and* the previous restart
//! attempt is older than the debounce interval, so an intentional stop or a
//! fast-failing start never turns into a restart storm.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AutoStarter {
    debounce: Duration,
    grace: Duration,
    last_alive: Instant,
    last_invoked: Instant,
}

impl AutoStarter {
    pub fn new(now: Instant, debounce: Duration, grace: Duration) -> Self {
        Self {
            debounce,
            grace,
            last_alive: now,
            last_invoked: now,
        }
    }

    /// Run one watchdog step; returns `true` if `start` was invoked
    pub fn on_tick<A, S>(&mut self, now: Instant, is_alive: A, start: S) -> bool
    where
        A: FnOnce() -> bool,
        S: FnOnce(),
    {
        if is_alive() {
            self.last_alive = now;
            return false;
        }
        // An interval too large to add to an Instant never elapses
        match self.last_invoked.checked_add(self.debounce) {
            Some(ready) if now >= ready => {}
            _ => return false,
        }
        let grace_over = self
            .last_alive
            .checked_add(self.grace)
            .is_some_and(|deadline| deadline < now);
        if grace_over {
            tracing::info!(
                down_for_secs = now.duration_since(self.last_alive).as_secs(),
                "Connection inactive, auto-starting"
            );
            start();
            self.last_invoked = now;
            return true;
        }
        false
    }

    pub fn last_alive(&self) -> Instant {
        self.last_alive
    }

    pub fn last_invoked(&self) -> Instant {
        self.last_invoked
    }
}

impl Default for AutoStarter {
    fn default() -> Self {
        Self::new(
            Instant::now(),
            Duration::from_secs(15),
            Duration::from_secs(15),
        )
    }
}
