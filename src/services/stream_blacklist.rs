use log::debug;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
struct BlacklistEntry {
    failures: u32,
    expires_at: Option<Instant>,
}

/// Streams excluded from selection during one campaign's retry loop.
#[derive(Debug, Default)]
pub struct StreamBlacklist {
    entries: HashMap<String, BlacklistEntry>,
}

impl StreamBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eligible(&self, stream_id: &str, now: Instant) -> bool {
        match self.entries.get(stream_id).and_then(|e| e.expires_at) {
            Some(expires_at) => expires_at < now,
            None => true,
        }
    }

    /// Count a failure; the stream is blacklisted once `retry_threshold` is reached.
    pub fn record_failure(
        &mut self,
        stream_id: &str,
        now: Instant,
        retry_threshold: u32,
        blacklist_duration: Duration,
    ) {
        let entry = self.entries.entry(stream_id.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= retry_threshold {
            entry.expires_at = Some(now + blacklist_duration);
            debug!(
                "[Blacklist] {} blacklisted after {} failures",
                stream_id, entry.failures
            );
        }
    }

    /// Blacklist right away, regardless of the failure count.
    pub fn record_immediate_blacklist(
        &mut self,
        stream_id: &str,
        now: Instant,
        blacklist_duration: Duration,
    ) {
        let entry = self.entries.entry(stream_id.to_string()).or_default();
        entry.expires_at = Some(now + blacklist_duration);
        debug!("[Blacklist] {} blacklisted immediately", stream_id);
    }

    /// Drop entries whose expiry has passed. Called before each selection pass.
    pub fn sweep_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, e| e.expires_at.map_or(true, |expires_at| expires_at >= now));
    }

    pub fn expires_at(&self, stream_id: &str) -> Option<Instant> {
        self.entries.get(stream_id).and_then(|e| e.expires_at)
    }

    pub fn failure_count(&self, stream_id: &str) -> u32 {
        self.entries.get(stream_id).map_or(0, |e| e.failures)
    }
}
