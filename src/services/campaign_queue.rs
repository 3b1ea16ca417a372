//! Pending campaign queue.
//!
//! The queue is rebuilt from scratch on every catalog refresh and ordered by
//! [`compare_campaigns`]. An attempt ledger records when each campaign was last
//! picked so `next` can skip campaigns that are still cooling down.

use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use crate::models::drops::{CampaignStatus, DropCampaign};
use crate::models::settings::DropsSettings;

pub type Catalog = HashMap<String, DropCampaign>;

/// Whether a campaign may be enqueued at all.
pub fn is_queue_member(campaign: &DropCampaign, settings: &DropsSettings) -> bool {
    if !matches!(
        campaign.status,
        CampaignStatus::Active | CampaignStatus::Upcoming
    ) {
        return false;
    }
    if settings.is_excluded(&campaign.game_id, &campaign.game_name) {
        return false;
    }
    if !settings.watch_unlisted_games
        && settings
            .priority_position(&campaign.game_id, &campaign.game_name)
            .is_none()
    {
        return false;
    }
    if settings.only_linked_campaigns && !campaign.is_account_connected {
        return false;
    }
    true
}

/// Total order over enqueued campaign identifiers.
///
/// Listed games come first, by list position; within a tier the earlier end
/// time wins; identifiers break the remaining ties. Both identifiers must be
/// present in `catalog`.
pub fn compare_campaigns(a: &str, b: &str, catalog: &Catalog, settings: &DropsSettings) -> Ordering {
    let (Some(ca), Some(cb)) = (catalog.get(a), catalog.get(b)) else {
        return a.cmp(b);
    };

    // None sorts after every Some
    let rank = |c: &DropCampaign| {
        settings
            .priority_position(&c.game_id, &c.game_name)
            .unwrap_or(usize::MAX)
    };

    rank(ca)
        .cmp(&rank(cb))
        .then_with(|| ca.end_at.cmp(&cb.end_at))
        .then_with(|| a.cmp(b))
}

#[derive(Debug, Default)]
pub struct CampaignQueue {
    entries: Vec<String>,
    attempts: HashMap<String, Instant>,
}

impl CampaignQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue contents with the eligible members of `catalog`.
    pub fn rebuild(&mut self, catalog: &Catalog, settings: &DropsSettings) {
        let mut entries: Vec<String> = catalog
            .values()
            .filter(|c| is_queue_member(c, settings))
            .map(|c| c.id.clone())
            .collect();
        entries.sort_by(|a, b| compare_campaigns(a, b, catalog, settings));
        self.entries = entries;
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, campaign_id: &str) -> bool {
        self.entries.iter().any(|id| id == campaign_id)
    }

    pub fn record_attempt(&mut self, campaign_id: &str, now: Instant) {
        self.attempts.insert(campaign_id.to_string(), now);
    }

    pub fn last_attempt(&self, campaign_id: &str) -> Option<Instant> {
        self.attempts.get(campaign_id).copied()
    }

    /// First entry never attempted or last attempted at least `cooldown` ago.
    pub fn next(&self, cooldown: Duration, now: Instant) -> Option<String> {
        self.entries
            .iter()
            .find(|id| match self.attempts.get(id.as_str()) {
                Some(last) => now.saturating_duration_since(*last) >= cooldown,
                None => true,
            })
            .cloned()
    }

    /// Time until the longest-waiting entry leaves its cooldown.
    pub fn time_until_next_eligible(&self, cooldown: Duration, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|id| match self.attempts.get(id) {
                Some(last) => (*last + cooldown).saturating_duration_since(now),
                None => Duration::ZERO,
            })
            .min()
    }
}
