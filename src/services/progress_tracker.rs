use std::collections::HashMap;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub current_minutes: u32,
    pub last_minutes: u32,
    pub last_progress_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressUpdate {
    pub progressed: bool,
    pub switched_target: bool,
}

/// Watched-minutes bookkeeping for one watch session.
///
/// A stream can credit a different campaign than the one being pursued, so
/// progress on another drop takes over as the tracked target.
#[derive(Debug)]
pub struct ProgressTracker {
    target: String,
    states: HashMap<String, ProgressState>,
}

impl ProgressTracker {
    pub fn new(target: &str, initial_minutes: u32, now: Instant) -> Self {
        let mut states = HashMap::new();
        states.insert(target.to_string(), Self::seed(initial_minutes, now));
        Self {
            target: target.to_string(),
            states,
        }
    }

    fn seed(minutes: u32, now: Instant) -> ProgressState {
        ProgressState {
            current_minutes: minutes,
            last_minutes: minutes,
            last_progress_at: now,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self, drop_id: &str) -> Option<&ProgressState> {
        self.states.get(drop_id)
    }

    pub fn target_state(&self) -> Option<&ProgressState> {
        self.states.get(&self.target)
    }

    pub fn on_progress(&mut self, drop_id: &str, minutes: u32, now: Instant) -> ProgressUpdate {
        // First sight of another drop only seeds it
        let state = self
            .states
            .entry(drop_id.to_string())
            .or_insert_with(|| Self::seed(minutes, now));

        state.current_minutes = minutes;
        if state.current_minutes <= state.last_minutes {
            return ProgressUpdate::default();
        }

        state.last_minutes = state.current_minutes;
        state.last_progress_at = now;

        let switched_target = drop_id != self.target;
        if switched_target {
            self.target = drop_id.to_string();
        }
        ProgressUpdate {
            progressed: true,
            switched_target,
        }
    }

    /// Apply an authoritative reading for the tracked drop.
    pub fn reconcile(&mut self, minutes: u32, now: Instant) -> bool {
        let target = self.target.clone();
        self.on_progress(&target, minutes, now).progressed
    }

    pub fn stalled_for(&self, now: Instant) -> Duration {
        self.target_state()
            .map(|s| now.saturating_duration_since(s.last_progress_at))
            .unwrap_or(Duration::ZERO)
    }
}
