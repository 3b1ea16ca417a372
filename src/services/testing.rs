//! In-memory collaborators for scheduler and session tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::DriverError;
use crate::models::drops::*;
use crate::models::stream::{LiveStream, StreamInfo};
use crate::services::drops_client::DropsClient;
use crate::services::progress_renderer::{ProgressRenderer, RenderPayload};
use crate::services::session_driver::SessionDriver;
use crate::services::session_inbox::{EventSource, SessionInbox};

pub fn campaign(id: &str, game: &str, status: CampaignStatus) -> DropCampaign {
    let now = Utc::now();
    DropCampaign {
        id: id.to_string(),
        name: format!("{} campaign", id),
        status,
        game_id: format!("{}-id", game),
        game_name: game.to_string(),
        start_at: now - ChronoDuration::days(1),
        end_at: now + ChronoDuration::days(7),
        is_account_connected: true,
    }
}

pub fn time_drop(id: &str, campaign_id: &str, required: u32) -> TimeBasedDrop {
    let now = Utc::now();
    TimeBasedDrop {
        id: id.to_string(),
        campaign_id: campaign_id.to_string(),
        name: format!("{} drop", id),
        required_minutes_watched: required,
        start_at: now - ChronoDuration::days(1),
        end_at: now + ChronoDuration::days(7),
        benefits: vec![DropBenefit {
            id: format!("{}-benefit", id),
            name: format!("{} reward", id),
        }],
    }
}

pub fn inventory_drop(
    drop_id: &str,
    campaign_id: &str,
    current: u32,
    required: u32,
    instance: Option<&str>,
) -> InventoryDrop {
    InventoryDrop {
        drop_id: drop_id.to_string(),
        campaign_id: campaign_id.to_string(),
        name: format!("{} drop", drop_id),
        current_minutes_watched: current,
        required_minutes_watched: required,
        is_claimed: false,
        drop_instance_id: instance.map(|s| s.to_string()),
    }
}

pub fn stream(login: &str, viewers: u32) -> LiveStream {
    LiveStream {
        channel_id: format!("{}-id", login),
        channel_login: login.to_string(),
        viewers,
    }
}

#[derive(Default)]
pub struct FakeState {
    pub campaigns: Vec<DropCampaign>,
    pub details: HashMap<String, CampaignDetails>,
    pub inventory: Inventory,
    pub streams: HashMap<String, Vec<LiveStream>>,
    pub failing_details: HashSet<String>,
    pub failing_streams: HashSet<String>,
    pub claims: Vec<String>,
    pub stream_queries: Vec<String>,
    /// When set, stream queries are recorded and then held until notified.
    pub stream_gate: Option<Arc<Notify>>,
}

#[derive(Default)]
pub struct FakeDropsClient {
    pub state: Mutex<FakeState>,
}

impl FakeDropsClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_drop(&self, drop: TimeBasedDrop) {
        self.with(|s| {
            s.details
                .entry(drop.campaign_id.clone())
                .or_default()
                .drops
                .push(drop)
        });
    }

    pub fn set_progress(&self, record: InventoryDrop) {
        self.with(|s| {
            let campaign = match s
                .inventory
                .in_progress
                .iter_mut()
                .position(|c| c.id == record.campaign_id)
            {
                Some(index) => &mut s.inventory.in_progress[index],
                None => {
                    s.inventory.in_progress.push(InventoryCampaign {
                        id: record.campaign_id.clone(),
                        drops: vec![],
                    });
                    s.inventory.in_progress.last_mut().unwrap()
                }
            };
            campaign.drops.retain(|d| d.drop_id != record.drop_id);
            campaign.drops.push(record);
        });
    }

    pub fn set_streams(&self, game: &str, streams: Vec<LiveStream>) {
        self.with(|s| {
            s.streams.insert(game.to_string(), streams);
        });
    }

    pub fn claims(&self) -> Vec<String> {
        self.with(|s| s.claims.clone())
    }
}

#[async_trait]
impl DropsClient for FakeDropsClient {
    async fn fetch_campaigns(&self) -> Result<Vec<DropCampaign>> {
        Ok(self.with(|s| s.campaigns.clone()))
    }

    async fn get_campaign_details(&self, campaign_id: &str) -> Result<CampaignDetails> {
        self.with(|s| {
            if s.failing_details.contains(campaign_id) {
                return Err(anyhow::anyhow!("details unavailable for {}", campaign_id));
            }
            Ok(s.details.get(campaign_id).cloned().unwrap_or_default())
        })
    }

    async fn get_inventory(&self) -> Result<Inventory> {
        Ok(self.with(|s| s.inventory.clone()))
    }

    async fn claim_drop(&self, drop_instance_id: &str) -> Result<()> {
        self.with(|s| {
            s.claims.push(drop_instance_id.to_string());
            for campaign in s.inventory.in_progress.iter_mut() {
                for drop in campaign.drops.iter_mut() {
                    if drop.drop_instance_id.as_deref() == Some(drop_instance_id) {
                        drop.is_claimed = true;
                    }
                }
            }
        });
        Ok(())
    }

    async fn get_live_streams(&self, game_name: &str) -> Result<Vec<LiveStream>> {
        let gate = self.with(|s| {
            s.stream_queries.push(game_name.to_string());
            s.stream_gate.clone()
        });
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.with(|s| {
            if s.failing_streams.contains(game_name) {
                return Err(anyhow::anyhow!("stream directory unavailable"));
            }
            Ok(s.streams.get(game_name).cloned().unwrap_or_default())
        })
    }

    async fn get_stream_info(&self, channel_login: &str) -> Result<Option<StreamInfo>> {
        Ok(Some(StreamInfo {
            channel_id: format!("{}-id", channel_login),
            broadcast_id: "broadcast".to_string(),
            viewers: 100,
            started_at: None,
        }))
    }
}

#[derive(Default)]
pub struct FakeDriver {
    pub navigations: Mutex<Vec<String>>,
    pub load_timeouts: Mutex<HashSet<String>>,
    pub fail_quality: Mutex<bool>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    fn current(&self) -> Option<String> {
        self.navigations.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SessionDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn wait_for_player_stable(&self) -> Result<(), DriverError> {
        let current = self.current().unwrap_or_default();
        if self.load_timeouts.lock().unwrap().contains(&current) {
            return Err(DriverError::LoadTimeout(current));
        }
        Ok(())
    }

    async fn dismiss_mature_content_prompt(&self) -> Result<bool, DriverError> {
        Ok(false)
    }

    async fn force_lowest_quality(&self) -> Result<(), DriverError> {
        if *self.fail_quality.lock().unwrap() {
            return Err(DriverError::Other(anyhow::anyhow!("quality menu missing")));
        }
        Ok(())
    }

    async fn hide_video(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn get_viewer_count(&self) -> Result<Option<u32>, DriverError> {
        Ok(Some(100))
    }

    async fn get_uptime(&self) -> Result<Option<String>, DriverError> {
        Ok(Some("1:00:00".to_string()))
    }
}

/// Keeps the inbox of the current session so tests can inject events.
#[derive(Default)]
pub struct FakeEventSource {
    pub inbox: Mutex<Option<Arc<SessionInbox>>>,
    pub attached: Mutex<Vec<String>>,
}

impl FakeEventSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inbox(&self) -> Option<Arc<SessionInbox>> {
        self.inbox.lock().unwrap().clone()
    }
}

impl EventSource for FakeEventSource {
    fn attach(&self, channel_id: &str, inbox: Arc<SessionInbox>) {
        self.attached.lock().unwrap().push(channel_id.to_string());
        *self.inbox.lock().unwrap() = Some(inbox);
    }

    fn detach(&self) {
        *self.inbox.lock().unwrap() = None;
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub updates: Mutex<Vec<(u32, u32, String)>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ProgressRenderer for RecordingRenderer {
    fn start(&self, current: u32, total: u32, payload: &RenderPayload) {
        self.update(current, total, payload);
    }

    fn update(&self, current: u32, total: u32, payload: &RenderPayload) {
        self.updates
            .lock()
            .unwrap()
            .push((current, total, payload.objective.clone()));
    }

    fn stop(&self) {}
}
