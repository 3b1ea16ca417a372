use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Active,
    Upcoming,
    Expired,
    #[serde(other)]
    Unknown,
}

impl CampaignStatus {
    pub fn from_gql(status: &str) -> Self {
        match status {
            "ACTIVE" => CampaignStatus::Active,
            "UPCOMING" => CampaignStatus::Upcoming,
            "EXPIRED" => CampaignStatus::Expired,
            _ => CampaignStatus::Unknown,
        }
    }
}

/// Snapshot of a campaign as delivered by the catalog watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropCampaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub game_id: String,
    pub game_name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub is_account_connected: bool,
}

impl DropCampaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropBenefit {
    pub id: String,
    pub name: String,
}

/// A watch-time gated reward inside a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBasedDrop {
    pub id: String,
    pub campaign_id: String,
    pub name: String,
    pub required_minutes_watched: u32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub benefits: Vec<DropBenefit>,
}

impl TimeBasedDrop {
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_at <= now && now < self.end_at
    }

    /// Reward name, falling back to the drop name when no benefit is attached.
    pub fn reward_name(&self) -> &str {
        self.benefits
            .first()
            .map(|b| b.name.as_str())
            .unwrap_or(self.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedChannel {
    pub id: String,
    pub login: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignDetails {
    pub drops: Vec<TimeBasedDrop>,
    /// `None` when any channel streaming the game counts.
    pub allowed_channels: Option<Vec<AllowedChannel>>,
}

/// Authoritative per-user state of a drop, as reported by the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryDrop {
    pub drop_id: String,
    pub campaign_id: String,
    pub name: String,
    pub current_minutes_watched: u32,
    pub required_minutes_watched: u32,
    pub is_claimed: bool,
    pub drop_instance_id: Option<String>,
}

impl InventoryDrop {
    pub fn is_complete(&self) -> bool {
        self.required_minutes_watched > 0
            && self.current_minutes_watched >= self.required_minutes_watched
    }

    pub fn is_claimable(&self) -> bool {
        !self.is_claimed && self.is_complete() && self.drop_instance_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCampaign {
    pub id: String,
    pub drops: Vec<InventoryDrop>,
}

/// A reward already granted to the account, used to infer claims for drops
/// that no longer show up as in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedEvent {
    pub benefit_id: String,
    pub last_awarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub in_progress: Vec<InventoryCampaign>,
    pub claimed_events: Vec<ClaimedEvent>,
}

impl Inventory {
    pub fn find_drop(&self, drop_id: &str, campaign_id: Option<&str>) -> Option<&InventoryDrop> {
        self.in_progress
            .iter()
            .filter(|c| campaign_id.map_or(true, |id| c.id == id))
            .flat_map(|c| c.drops.iter())
            .find(|d| d.drop_id == drop_id)
    }

    /// Claim inference for a drop.
    ///
    /// An in-progress record is authoritative. Otherwise the drop counts as
    /// claimed when one of its benefits was last awarded at or after the
    /// campaign start, which can misjudge repeatable rewards.
    pub fn is_drop_claimed(&self, drop: &TimeBasedDrop, campaign_start: DateTime<Utc>) -> bool {
        if let Some(record) = self.find_drop(&drop.id, Some(&drop.campaign_id)) {
            return record.is_claimed;
        }
        drop.benefits.iter().any(|benefit| {
            self.claimed_events
                .iter()
                .any(|e| e.benefit_id == benefit.id && e.last_awarded_at >= campaign_start)
        })
    }
}

/// The next objective of a campaign that still needs attention.
#[derive(Debug, Clone)]
pub struct UnclaimedDrop {
    pub campaign_id: String,
    pub drop: TimeBasedDrop,
    pub progress: Option<InventoryDrop>,
    pub allowed_channels: Option<Vec<AllowedChannel>>,
}

impl UnclaimedDrop {
    pub fn current_minutes(&self) -> u32 {
        self.progress
            .as_ref()
            .map(|p| p.current_minutes_watched)
            .unwrap_or(0)
    }

    /// Minutes are already satisfied and only the claim is missing.
    pub fn claimable_instance(&self) -> Option<&str> {
        self.progress
            .as_ref()
            .filter(|p| p.is_claimable())
            .and_then(|p| p.drop_instance_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedDrop {
    pub campaign_id: String,
    pub drop_id: String,
    pub drop_name: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentDropInfo {
    pub drop_id: String,
    pub drop_name: String,
    pub campaign_name: String,
    pub game_name: String,
    pub current_minutes: u32,
    pub required_minutes: u32,
    pub progress_percentage: f32,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningStatus {
    pub is_mining: bool,
    pub current_campaign: Option<String>,
    pub current_stream: Option<String>,
    pub current_drop: Option<CurrentDropInfo>,
    pub last_update: DateTime<Utc>,
}

impl Default for MiningStatus {
    fn default() -> Self {
        Self {
            is_mining: false,
            current_campaign: None,
            current_stream: None,
            current_drop: None,
            last_update: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn drop_with_benefit(benefit_id: &str) -> TimeBasedDrop {
        let now = Utc::now();
        TimeBasedDrop {
            id: "drop-1".to_string(),
            campaign_id: "camp-1".to_string(),
            name: "Drop".to_string(),
            required_minutes_watched: 60,
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(1),
            benefits: vec![DropBenefit {
                id: benefit_id.to_string(),
                name: "Skin".to_string(),
            }],
        }
    }

    #[test]
    fn test_in_progress_record_wins_over_claimed_events() {
        let now = Utc::now();
        let drop = drop_with_benefit("b-1");
        let inventory = Inventory {
            in_progress: vec![InventoryCampaign {
                id: "camp-1".to_string(),
                drops: vec![InventoryDrop {
                    drop_id: "drop-1".to_string(),
                    campaign_id: "camp-1".to_string(),
                    name: "Drop".to_string(),
                    current_minutes_watched: 10,
                    required_minutes_watched: 60,
                    is_claimed: false,
                    drop_instance_id: None,
                }],
            }],
            claimed_events: vec![ClaimedEvent {
                benefit_id: "b-1".to_string(),
                last_awarded_at: now,
            }],
        };

        assert!(!inventory.is_drop_claimed(&drop, now - Duration::days(2)));
    }

    #[test]
    fn test_claimed_event_before_campaign_start_is_ignored() {
        let now = Utc::now();
        let drop = drop_with_benefit("b-1");
        let inventory = Inventory {
            in_progress: vec![],
            claimed_events: vec![ClaimedEvent {
                benefit_id: "b-1".to_string(),
                last_awarded_at: now - Duration::days(30),
            }],
        };

        assert!(!inventory.is_drop_claimed(&drop, now - Duration::days(2)));
        assert!(inventory.is_drop_claimed(&drop, now - Duration::days(31)));
    }

    #[test]
    fn test_reward_name_falls_back_to_drop_name() {
        let mut drop = drop_with_benefit("b-1");
        assert_eq!(drop.reward_name(), "Skin");
        drop.benefits.clear();
        assert_eq!(drop.reward_name(), "Drop");
    }
}
