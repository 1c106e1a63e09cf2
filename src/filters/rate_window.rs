// src/filters/rate_window.rs - Per-scope sliding time window of event timestamps

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::types::ScopeId;

/// Timestamps of qualifying events, kept per scope in arrival order.
///
/// Each queue only holds timestamps inside `(now - window, now]` once a query
/// for that scope returns; stale entries are evicted lazily, there is no
/// background timer.
#[derive(Debug, Default, Clone)]
pub struct RateWindow {
    events: HashMap<ScopeId, VecDeque<DateTime<Utc>>>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event at `now` and report whether the scope has reached
    /// `limit` events inside `window`.
    pub fn record_and_exceeds(
        &mut self,
        scope: &ScopeId,
        now: DateTime<Utc>,
        window: Duration,
        limit: usize,
    ) -> bool {
        let queue = self.events.entry(scope.clone()).or_default();
        queue.push_back(now);

        let cutoff = now - window;
        while let Some(&front) = queue.front() {
            if front <= cutoff {
                queue.pop_front();
            } else {
                break;
            }
        }

        queue.len() >= limit
    }

    /// Events currently held for a scope, including any not yet evicted
    pub fn count(&self, scope: &ScopeId) -> usize {
        self.events.get(scope).map_or(0, VecDeque::len)
    }

    pub fn scopes(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
