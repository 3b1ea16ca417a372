use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FallbackStreamSettings {
    pub enabled: bool,
    pub url: String, // Watched outside drop tracking when nothing is eligible
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DropsSettings {
    pub priority_games: Vec<String>, // Earlier entries win
    pub excluded_games: Vec<String>,
    pub watch_unlisted_games: bool,
    pub only_linked_campaigns: bool,
    pub attempt_cooldown_secs: u64,
    pub stall_threshold_secs: u64,
    pub stream_retry_threshold: u32,
    pub stream_blacklist_secs: u64,
    pub catalog_poll_interval_secs: u64,
    pub poll_interval_ms: u64,
    pub player_stable_checks: u32,
    pub player_stable_interval_ms: u64,
    pub player_load_timeout_secs: u64,
    pub hide_video: bool,
    pub fallback_stream: FallbackStreamSettings,
}

impl Default for DropsSettings {
    fn default() -> Self {
        Self {
            priority_games: vec![],
            excluded_games: vec![],
            watch_unlisted_games: true,
            only_linked_campaigns: false,
            attempt_cooldown_secs: 120,
            stall_threshold_secs: 300, // 5 minutes without progress
            stream_retry_threshold: 3,
            stream_blacklist_secs: 600,
            catalog_poll_interval_secs: 900,
            poll_interval_ms: 1000,
            player_stable_checks: 3,
            player_stable_interval_ms: 2000,
            player_load_timeout_secs: 60,
            hide_video: true,
            fallback_stream: FallbackStreamSettings::default(),
        }
    }
}

impl DropsSettings {
    /// Position of a game in the priority list, matched by name or id.
    pub fn priority_position(&self, game_id: &str, game_name: &str) -> Option<usize> {
        self.priority_games
            .iter()
            .position(|g| Self::game_matches(g, game_id, game_name))
    }

    pub fn is_excluded(&self, game_id: &str, game_name: &str) -> bool {
        self.excluded_games
            .iter()
            .any(|g| Self::game_matches(g, game_id, game_name))
    }

    fn game_matches(entry: &str, game_id: &str, game_name: &str) -> bool {
        entry == game_id || entry.eq_ignore_ascii_case(game_name)
    }

    pub fn attempt_cooldown(&self) -> Duration {
        Duration::from_secs(self.attempt_cooldown_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    pub fn stream_blacklist_duration(&self) -> Duration {
        Duration::from_secs(self.stream_blacklist_secs)
    }

    pub fn catalog_poll_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_poll_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn player_stable_interval(&self) -> Duration {
        Duration::from_millis(self.player_stable_interval_ms.max(1))
    }

    pub fn player_load_timeout(&self) -> Duration {
        Duration::from_secs(self.player_load_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub drops: DropsSettings,
}

impl Settings {
    /// Read `settings.json`. A missing file yields the defaults.
    pub fn load_from_file(path: &Path) -> Result<Settings> {
        if !path.exists() {
            return Ok(Settings::default());
        }

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&json)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(settings)
    }
}
