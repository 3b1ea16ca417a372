use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashSet;

use crate::models::drops::{AllowedChannel, ClaimedDrop, DropCampaign};
use crate::services::campaign_queue::Catalog;
use crate::services::drop_lookup::{find_unclaimed_drop, live_streams_for};
use crate::services::drops_client::DropsClient;

#[derive(Debug, Default)]
pub struct PreemptionScan {
    /// Higher priority campaign with live streams, if any.
    pub preempt_for: Option<String>,
    /// Drops claimed inline while scanning.
    pub claimed: Vec<ClaimedDrop>,
}

/// Look for a campaign ahead of `current` in `queue` that is worth
/// interrupting the running session for.
///
/// Candidates whose drop only needs a claim are claimed on the spot and the
/// scan moves on. The first candidate with a live stream ends the scan. The
/// caller decides whether the scan still applies before acting on it.
pub async fn evaluate_preemption(
    client: &dyn DropsClient,
    queue: &[String],
    catalog: &Catalog,
    current: &str,
) -> PreemptionScan {
    let mut scan = PreemptionScan::default();

    for campaign_id in queue.iter().take_while(|id| id.as_str() != current) {
        let Some(campaign) = catalog.get(campaign_id) else {
            continue;
        };

        let unclaimed = match find_unclaimed_drop(client, campaign, Utc::now(), &HashSet::new()).await
        {
            Ok(Some(unclaimed)) => unclaimed,
            Ok(None) => continue,
            Err(e) => {
                warn!(
                    "[Preemption] Drop lookup failed for {}: {}",
                    campaign.name, e
                );
                continue;
            }
        };

        if let Some(instance) = unclaimed.claimable_instance() {
            match client.claim_drop(instance).await {
                Ok(()) => {
                    info!(
                        "🎁 Claimed {} from {} while another campaign runs",
                        unclaimed.drop.reward_name(),
                        campaign.name
                    );
                    scan.claimed.push(ClaimedDrop {
                        campaign_id: campaign.id.clone(),
                        drop_id: unclaimed.drop.id.clone(),
                        drop_name: unclaimed.drop.reward_name().to_string(),
                        claimed_at: Utc::now(),
                    });
                }
                Err(e) => warn!(
                    "[Preemption] Inline claim failed for {}: {}",
                    unclaimed.drop.id, e
                ),
            }
            continue;
        }

        if has_live_streams(client, campaign, &unclaimed.allowed_channels).await {
            info!(
                "⚡ {} has live streams and outranks the current campaign",
                campaign.name
            );
            scan.preempt_for = Some(campaign.id.clone());
            break;
        }
    }

    scan
}

async fn has_live_streams(
    client: &dyn DropsClient,
    campaign: &DropCampaign,
    allowed_channels: &Option<Vec<AllowedChannel>>,
) -> bool {
    match live_streams_for(client, campaign, allowed_channels.as_deref()).await {
        Ok(streams) => !streams.is_empty(),
        Err(e) => {
            debug!(
                "[Preemption] Stream lookup failed for {}, not preempting: {}",
                campaign.name, e
            );
            false
        }
    }
}
