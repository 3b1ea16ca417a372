use anyhow::Result;
use async_trait::async_trait;

use crate::models::drops::{CampaignDetails, DropCampaign, Inventory, InventoryDrop};
use crate::models::stream::{LiveStream, StreamInfo};

/// Remote data needed by the scheduler. Every call may fail; callers log and
/// skip rather than abort.
#[async_trait]
pub trait DropsClient: Send + Sync {
    async fn fetch_campaigns(&self) -> Result<Vec<DropCampaign>>;

    async fn get_campaign_details(&self, campaign_id: &str) -> Result<CampaignDetails>;

    async fn get_inventory(&self) -> Result<Inventory>;

    async fn get_inventory_drop(
        &self,
        drop_id: &str,
        campaign_id: Option<&str>,
    ) -> Result<Option<InventoryDrop>> {
        let inventory = self.get_inventory().await?;
        Ok(inventory.find_drop(drop_id, campaign_id).cloned())
    }

    /// Claims are idempotent: an already claimed or unknown instance is `Ok`.
    async fn claim_drop(&self, drop_instance_id: &str) -> Result<()>;

    async fn get_live_streams(&self, game_name: &str) -> Result<Vec<LiveStream>>;

    async fn get_stream_info(&self, channel_login: &str) -> Result<Option<StreamInfo>>;
}
