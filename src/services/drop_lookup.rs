use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::drops::{AllowedChannel, DropCampaign, UnclaimedDrop};
use crate::models::stream::LiveStream;
use crate::services::drops_client::DropsClient;

/// Next objective of `campaign` that is inside its window and not claimed.
///
/// Drops whose minutes are already satisfied come first so they are claimed
/// before anything is watched; otherwise the shortest drop wins. Drops listed
/// in `skip` were already handled by the caller during this attempt.
pub async fn find_unclaimed_drop(
    client: &dyn DropsClient,
    campaign: &DropCampaign,
    now: DateTime<Utc>,
    skip: &HashSet<String>,
) -> Result<Option<UnclaimedDrop>> {
    let details = client.get_campaign_details(&campaign.id).await?;
    let inventory = client.get_inventory().await?;

    let candidate = details
        .drops
        .into_iter()
        .filter(|d| d.is_within_window(now) && !skip.contains(&d.id))
        .filter(|d| !inventory.is_drop_claimed(d, campaign.start_at))
        .map(|drop| {
            let progress = inventory.find_drop(&drop.id, Some(&campaign.id)).cloned();
            UnclaimedDrop {
                campaign_id: campaign.id.clone(),
                drop,
                progress,
                allowed_channels: details.allowed_channels.clone(),
            }
        })
        .min_by_key(|u| {
            (
                u.claimable_instance().is_none(),
                u.drop.required_minutes_watched,
                u.drop.id.clone(),
            )
        });

    Ok(candidate)
}

/// Live streams that credit `campaign`, most viewers first.
pub async fn live_streams_for(
    client: &dyn DropsClient,
    campaign: &DropCampaign,
    allowed_channels: Option<&[AllowedChannel]>,
) -> Result<Vec<LiveStream>> {
    let mut streams = client.get_live_streams(&campaign.game_name).await?;

    if let Some(allowed) = allowed_channels {
        streams.retain(|s| {
            allowed
                .iter()
                .any(|a| a.id == s.channel_id || a.login.eq_ignore_ascii_case(&s.channel_login))
        });
    }

    let mut seen = HashSet::new();
    streams.retain(|s| seen.insert(s.channel_id.clone()));
    streams.sort_by(|a, b| {
        b.viewers
            .cmp(&a.viewers)
            .then_with(|| a.channel_login.cmp(&b.channel_login))
    });
    Ok(streams)
}
