use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::drops::*;
use crate::models::stream::{LiveStream, StreamInfo};
use crate::services::drops_client::DropsClient;

// Use Android app client ID for drops-related queries
pub const CLIENT_ID: &str = "kd1unb4b3q4t58fwlpcbzcbnm76a8fp";
const GQL_URL: &str = "https://gql.twitch.tv/gql";
const STREAMS_PER_GAME: u32 = 30;

const CAMPAIGN_DETAILS_QUERY: &str = r#"
query DropCampaignDetails($dropID: ID!, $channelLogin: ID!) {
    user(id: $channelLogin) {
        dropCampaign(id: $dropID) {
            id
            allow {
                isEnabled
                channels {
                    id
                    name
                }
            }
            timeBasedDrops {
                id
                name
                requiredMinutesWatched
                startAt
                endAt
                benefitEdges {
                    benefit {
                        id
                        name
                    }
                }
            }
        }
    }
}
"#;

const INVENTORY_QUERY: &str = r#"
query Inventory {
    currentUser {
        inventory {
            dropCampaignsInProgress {
                id
                timeBasedDrops {
                    id
                    name
                    requiredMinutesWatched
                    self {
                        currentMinutesWatched
                        isClaimed
                        dropInstanceID
                    }
                }
            }
            gameEventDrops {
                id
                lastAwardedAt
            }
        }
    }
}
"#;

const CLAIM_MUTATION: &str = r#"
mutation ClaimDrop($input: ClaimDropRewardsInput!) {
    claimDropRewards(input: $input) {
        status
    }
}
"#;

const GAME_STREAMS_QUERY: &str = r#"
query GameStreams($gameName: String!, $first: Int!) {
    game(name: $gameName) {
        streams(first: $first, options: {systemFilters: [DROPS_ENABLED]}) {
            edges {
                node {
                    id
                    broadcaster {
                        id
                        login
                    }
                    viewersCount
                }
            }
        }
    }
}
"#;

const STREAM_INFO_QUERY: &str = r#"
query StreamInfo($login: String!) {
    user(login: $login) {
        id
        stream {
            id
            viewersCount
            createdAt
        }
    }
}
"#;

/// Twitch GQL implementation of [`DropsClient`].
pub struct GqlDropsClient {
    client: Client,
    token: String,
    cached_user_id: Arc<RwLock<Option<String>>>, // Cache user ID to avoid repeated validation calls
}

impl GqlDropsClient {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            token,
            cached_user_id: Arc::new(RwLock::new(None)),
        }
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// User ID from token validation, cached after the first success.
    pub async fn user_id(&self) -> Result<String> {
        if let Some(id) = self.cached_user_id.read().await.as_ref() {
            return Ok(id.clone());
        }

        let response = self
            .client
            .get("https://id.twitch.tv/oauth2/validate")
            .header(AUTHORIZATION, format!("OAuth {}", self.token))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Token validation failed with status {}",
                response.status()
            ));
        }

        let data: Value = response.json().await?;
        let user_id = data["user_id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Failed to get user ID from token"))?
            .to_string();

        *self.cached_user_id.write().await = Some(user_id.clone());
        Ok(user_id)
    }

    async fn gql(&self, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(GQL_URL)
            .header("Client-Id", CLIENT_ID)
            .header(AUTHORIZATION, format!("OAuth {}", self.token))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GQL request failed ({}): {}", status, error_text));
        }

        let result: Value = response.json().await?;
        if let Some(message) = gql_error_message(&result) {
            return Err(anyhow::anyhow!("GraphQL errors: {}", message));
        }
        Ok(result)
    }
}

#[async_trait]
impl DropsClient for GqlDropsClient {
    async fn fetch_campaigns(&self) -> Result<Vec<DropCampaign>> {
        let result = self
            .gql(json!({
                "operationName": "ViewerDropsDashboard",
                "variables": {"fetchRewardCampaigns": true},
                "extensions": {
                    "persistedQuery": {
                        "version": 1,
                        "sha256Hash": "5a4da2ab3d5b47c9f9ce864e727b2cb346af1e3ea8b897fe8f704a97ff017619",
                    }
                }
            }))
            .await?;

        let campaigns = parse_campaigns(&result);
        debug!("[DropsClient] Fetched {} campaigns", campaigns.len());
        Ok(campaigns)
    }

    async fn get_campaign_details(&self, campaign_id: &str) -> Result<CampaignDetails> {
        let user_id = self.user_id().await?;
        let result = self
            .gql(json!({
                "query": CAMPAIGN_DETAILS_QUERY,
                "variables": {
                    "dropID": campaign_id,
                    "channelLogin": user_id
                }
            }))
            .await?;

        parse_campaign_details(&result, campaign_id)
            .with_context(|| format!("Campaign {} missing from details response", campaign_id))
    }

    async fn get_inventory(&self) -> Result<Inventory> {
        let result = self
            .gql(json!({
                "query": INVENTORY_QUERY,
                "variables": {}
            }))
            .await?;
        Ok(parse_inventory(&result))
    }

    async fn claim_drop(&self, drop_instance_id: &str) -> Result<()> {
        let result = self
            .gql(json!({
                "query": CLAIM_MUTATION,
                "variables": {
                    "input": {
                        "dropInstanceID": drop_instance_id
                    }
                }
            }))
            .await;

        match result {
            Ok(value) => {
                let status = value["data"]["claimDropRewards"]["status"]
                    .as_str()
                    .unwrap_or("");
                if claim_status_is_resolved(status) {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("Failed to claim drop: status {}", status))
                }
            }
            // Claims are idempotent from the scheduler's point of view
            Err(e) if is_already_resolved_error(&e.to_string()) => {
                warn!(
                    "[DropsClient] Drop instance {} already resolved: {}",
                    drop_instance_id, e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_live_streams(&self, game_name: &str) -> Result<Vec<LiveStream>> {
        let result = self
            .gql(json!({
                "query": GAME_STREAMS_QUERY,
                "variables": {
                    "gameName": game_name,
                    "first": STREAMS_PER_GAME
                }
            }))
            .await?;
        Ok(parse_streams(&result))
    }

    async fn get_stream_info(&self, channel_login: &str) -> Result<Option<StreamInfo>> {
        let result = self
            .gql(json!({
                "query": STREAM_INFO_QUERY,
                "variables": {
                    "login": channel_login
                }
            }))
            .await?;
        Ok(parse_stream_info(&result))
    }
}

fn gql_error_message(result: &Value) -> Option<String> {
    let errors = result["errors"].as_array()?;
    if errors.is_empty() {
        return None;
    }
    Some(
        errors
            .iter()
            .filter_map(|e| e["message"].as_str())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn claim_status_is_resolved(status: &str) -> bool {
    matches!(
        status,
        "ELIGIBLE_FOR_ALL"
            | "DROP_INSTANCE_ALREADY_CLAIMED"
            | "DROP_INSTANCE_NOT_FOUND"
            | "ALREADY_CLAIMED"
    )
}

fn is_already_resolved_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("already claimed") || lower.contains("not found")
}

fn parse_time(value: &Value, fallback: &str) -> DateTime<Utc> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .or_else(|| DateTime::parse_from_rfc3339(fallback).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn as_u32(value: &Value) -> u32 {
    value.as_u64().unwrap_or(0).min(u32::MAX as u64) as u32
}

fn parse_campaigns(result: &Value) -> Vec<DropCampaign> {
    let Some(campaigns) = result["data"]["currentUser"]["dropCampaigns"].as_array() else {
        return Vec::new();
    };

    campaigns
        .iter()
        .filter_map(|c| {
            let id = c["id"].as_str()?.to_string();
            Some(DropCampaign {
                id,
                name: c["name"].as_str().unwrap_or("").to_string(),
                status: CampaignStatus::from_gql(c["status"].as_str().unwrap_or("")),
                game_id: c["game"]["id"].as_str().unwrap_or("").to_string(),
                game_name: c["game"]["displayName"]
                    .as_str()
                    .or_else(|| c["game"]["name"].as_str())
                    .unwrap_or("")
                    .to_string(),
                start_at: parse_time(&c["startAt"], "2000-01-01T00:00:00Z"),
                end_at: parse_time(&c["endAt"], "2099-12-31T23:59:59Z"),
                is_account_connected: c["self"]["isAccountConnected"].as_bool().unwrap_or(false),
            })
        })
        .collect()
}

fn parse_campaign_details(result: &Value, campaign_id: &str) -> Option<CampaignDetails> {
    let campaign = result["data"]["user"]["dropCampaign"].as_object()?;

    let drops = campaign
        .get("timeBasedDrops")
        .and_then(|d| d.as_array())
        .map(|drops| {
            drops
                .iter()
                .filter_map(|d| {
                    Some(TimeBasedDrop {
                        id: d["id"].as_str()?.to_string(),
                        campaign_id: campaign_id.to_string(),
                        name: d["name"].as_str().unwrap_or("").to_string(),
                        required_minutes_watched: as_u32(&d["requiredMinutesWatched"]),
                        start_at: parse_time(&d["startAt"], "2000-01-01T00:00:00Z"),
                        end_at: parse_time(&d["endAt"], "2099-12-31T23:59:59Z"),
                        benefits: d["benefitEdges"]
                            .as_array()
                            .map(|edges| {
                                edges
                                    .iter()
                                    .filter_map(|e| {
                                        Some(DropBenefit {
                                            id: e["benefit"]["id"].as_str()?.to_string(),
                                            name: e["benefit"]["name"]
                                                .as_str()
                                                .unwrap_or("")
                                                .to_string(),
                                        })
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let allow = campaign.get("allow").cloned().unwrap_or(Value::Null);
    let allowed_channels = if allow["isEnabled"].as_bool().unwrap_or(false) {
        allow["channels"].as_array().filter(|c| !c.is_empty()).map(|channels| {
            channels
                .iter()
                .filter_map(|ch| {
                    Some(AllowedChannel {
                        id: ch["id"].as_str()?.to_string(),
                        login: ch["name"].as_str().unwrap_or("").to_ascii_lowercase(),
                    })
                })
                .collect()
        })
    } else {
        None
    };

    Some(CampaignDetails {
        drops,
        allowed_channels,
    })
}

fn parse_inventory(result: &Value) -> Inventory {
    let inventory = &result["data"]["currentUser"]["inventory"];

    let in_progress = inventory["dropCampaignsInProgress"]
        .as_array()
        .map(|campaigns| {
            campaigns
                .iter()
                .filter_map(|c| {
                    let campaign_id = c["id"].as_str()?.to_string();
                    let drops = c["timeBasedDrops"]
                        .as_array()
                        .map(|drops| {
                            drops
                                .iter()
                                .filter_map(|d| {
                                    Some(InventoryDrop {
                                        drop_id: d["id"].as_str()?.to_string(),
                                        campaign_id: campaign_id.clone(),
                                        name: d["name"].as_str().unwrap_or("").to_string(),
                                        current_minutes_watched: as_u32(
                                            &d["self"]["currentMinutesWatched"],
                                        ),
                                        required_minutes_watched: as_u32(
                                            &d["requiredMinutesWatched"],
                                        ),
                                        is_claimed: d["self"]["isClaimed"]
                                            .as_bool()
                                            .unwrap_or(false),
                                        drop_instance_id: d["self"]["dropInstanceID"]
                                            .as_str()
                                            .map(|s| s.to_string()),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    Some(InventoryCampaign {
                        id: campaign_id,
                        drops,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let claimed_events = inventory["gameEventDrops"]
        .as_array()
        .map(|events| {
            events
                .iter()
                .filter_map(|e| {
                    Some(ClaimedEvent {
                        benefit_id: e["id"].as_str()?.to_string(),
                        last_awarded_at: parse_time(&e["lastAwardedAt"], "2000-01-01T00:00:00Z"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Inventory {
        in_progress,
        claimed_events,
    }
}

fn parse_streams(result: &Value) -> Vec<LiveStream> {
    let mut streams = Vec::new();

    if let Some(edges) = result["data"]["game"]["streams"]["edges"].as_array() {
        for edge in edges {
            let node = &edge["node"];
            if let (Some(id), Some(login)) = (
                node["broadcaster"]["id"].as_str(),
                node["broadcaster"]["login"].as_str(),
            ) {
                streams.push(LiveStream {
                    channel_id: id.to_string(),
                    channel_login: login.to_string(),
                    viewers: as_u32(&node["viewersCount"]),
                });
            }
        }
    }

    streams
}

fn parse_stream_info(result: &Value) -> Option<StreamInfo> {
    let user = result["data"]["user"].as_object()?;
    let stream = user.get("stream")?.as_object()?;

    Some(StreamInfo {
        channel_id: user.get("id")?.as_str()?.to_string(),
        broadcast_id: stream.get("id")?.as_str()?.to_string(),
        viewers: stream.get("viewersCount").map(as_u32).unwrap_or(0),
        started_at: stream
            .get("createdAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_campaigns_reads_status_and_game() {
        let result = json!({
            "data": {"currentUser": {"dropCampaigns": [
                {
                    "id": "c1",
                    "name": "Winter Event",
                    "status": "ACTIVE",
                    "game": {"id": "g1", "displayName": "Rust"},
                    "startAt": "2026-01-01T00:00:00Z",
                    "endAt": "2026-02-01T00:00:00Z",
                    "self": {"isAccountConnected": true}
                },
                {
                    "id": "c2",
                    "name": "Later",
                    "status": "UPCOMING",
                    "game": {"id": "g2", "name": "Other"},
                    "startAt": "2026-03-01T00:00:00Z",
                    "endAt": "2026-04-01T00:00:00Z"
                }
            ]}}
        });

        let campaigns = parse_campaigns(&result);
        assert_eq!(campaigns.len(), 2);
        assert_eq!(campaigns[0].status, CampaignStatus::Active);
        assert_eq!(campaigns[0].game_name, "Rust");
        assert!(campaigns[0].is_account_connected);
        assert_eq!(campaigns[1].status, CampaignStatus::Upcoming);
        assert_eq!(campaigns[1].game_name, "Other");
        assert!(!campaigns[1].is_account_connected);
    }

    #[test]
    fn test_parse_campaign_details_with_channel_restriction() {
        let result = json!({
            "data": {"user": {"dropCampaign": {
                "id": "c1",
                "allow": {"isEnabled": true, "channels": [{"id": "42", "name": "SomeStreamer"}]},
                "timeBasedDrops": [{
                    "id": "d1",
                    "name": "Hour One",
                    "requiredMinutesWatched": 60,
                    "startAt": "2026-01-01T00:00:00Z",
                    "endAt": "2026-02-01T00:00:00Z",
                    "benefitEdges": [{"benefit": {"id": "b1", "name": "Hat"}}]
                }]
            }}}
        });

        let details = parse_campaign_details(&result, "c1").unwrap();
        assert_eq!(details.drops.len(), 1);
        assert_eq!(details.drops[0].required_minutes_watched, 60);
        assert_eq!(details.drops[0].reward_name(), "Hat");
        let allowed = details.allowed_channels.unwrap();
        assert_eq!(allowed[0].login, "somestreamer");
    }

    #[test]
    fn test_parse_campaign_details_disabled_allow_list_means_any_channel() {
        let result = json!({
            "data": {"user": {"dropCampaign": {
                "id": "c1",
                "allow": {"isEnabled": false, "channels": [{"id": "42", "name": "x"}]},
                "timeBasedDrops": []
            }}}
        });

        let details = parse_campaign_details(&result, "c1").unwrap();
        assert!(details.allowed_channels.is_none());
    }

    #[test]
    fn test_parse_inventory() {
        let result = json!({
            "data": {"currentUser": {"inventory": {
                "dropCampaignsInProgress": [{
                    "id": "c1",
                    "timeBasedDrops": [{
                        "id": "d1",
                        "name": "Hour One",
                        "requiredMinutesWatched": 30,
                        "self": {"currentMinutesWatched": 30, "isClaimed": false, "dropInstanceID": "inst-1"}
                    }]
                }],
                "gameEventDrops": [{"id": "b9", "lastAwardedAt": "2026-01-05T00:00:00Z"}]
            }}}
        });

        let inventory = parse_inventory(&result);
        let drop = inventory.find_drop("d1", Some("c1")).unwrap();
        assert!(drop.is_claimable());
        assert_eq!(drop.drop_instance_id.as_deref(), Some("inst-1"));
        assert!(inventory.find_drop("d1", Some("other")).is_none());
        assert_eq!(inventory.claimed_events[0].benefit_id, "b9");
    }

    #[test]
    fn test_parse_stream_info_offline_channel() {
        let result = json!({"data": {"user": {"id": "42", "stream": null}}});
        assert!(parse_stream_info(&result).is_none());
    }

    #[test]
    fn test_already_claimed_errors_are_resolved() {
        assert!(is_already_resolved_error("GraphQL errors: drop instance not found"));
        assert!(is_already_resolved_error("Already Claimed"));
        assert!(!is_already_resolved_error("service timeout"));
        assert!(claim_status_is_resolved("DROP_INSTANCE_ALREADY_CLAIMED"));
        assert!(!claim_status_is_resolved("UNKNOWN"));
    }
}
