use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use log::{debug, info, warn};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::error::DriverError;
use crate::models::settings::DropsSettings;
use crate::models::stream::StreamInfo;
use crate::services::drops_client::DropsClient;
use crate::services::drops_service::GqlDropsClient;
use crate::utils::stability::wait_until_stable;

pub const BLANK_PAGE: &str = "about:blank";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const VIEWER_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Drives whatever actually plays a stream.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn wait_for_player_stable(&self) -> Result<(), DriverError>;

    /// `Ok(false)` when no prompt was shown.
    async fn dismiss_mature_content_prompt(&self) -> Result<bool, DriverError>;

    async fn force_lowest_quality(&self) -> Result<(), DriverError>;

    async fn hide_video(&self) -> Result<(), DriverError>;

    async fn get_viewer_count(&self) -> Result<Option<u32>, DriverError>;

    async fn get_uptime(&self) -> Result<Option<String>, DriverError>;
}

/// Channel login from a stream URL such as `https://www.twitch.tv/<login>`.
pub fn channel_login_from_url(stream_url: &str) -> Option<String> {
    let parsed = url::Url::parse(stream_url).ok()?;
    parsed
        .path_segments()?
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.to_ascii_lowercase())
}

pub fn format_uptime(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[derive(Default)]
struct ActiveChannel {
    login: String,
    stream: Option<StreamInfo>,
    /// Last viewer count lookup; `None` inside means the channel was offline.
    viewers: Option<(Instant, Option<u32>)>,
}

impl ActiveChannel {
    fn cached_viewers(&self, now: Instant, max_age: Duration) -> Option<Option<u32>> {
        self.viewers
            .filter(|(checked_at, _)| now.saturating_duration_since(*checked_at) < max_age)
            .map(|(_, viewers)| viewers)
    }
}

/// Headless driver: instead of rendering video it posts the `minute-watched`
/// spade event once a minute for the navigated channel.
pub struct HeartbeatSessionDriver {
    client: Arc<GqlDropsClient>,
    settings: DropsSettings,
    current: Mutex<Option<ActiveChannel>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatSessionDriver {
    pub fn new(client: Arc<GqlDropsClient>, settings: DropsSettings) -> Self {
        Self {
            client,
            settings,
            current: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    fn stop_heartbeat(&self) {
        if let Ok(mut heartbeat) = self.heartbeat.lock() {
            if let Some(handle) = heartbeat.take() {
                handle.abort();
                debug!("[HeartbeatDriver] Stopped watch heartbeat");
            }
        }
    }

    fn current_login(&self) -> Result<String, DriverError> {
        self.current
            .lock()
            .ok()
            .and_then(|c| c.as_ref().map(|c| c.login.clone()))
            .ok_or_else(|| DriverError::Other(anyhow::anyhow!("No channel navigated")))
    }

    fn current_stream(&self) -> Option<StreamInfo> {
        self.current
            .lock()
            .ok()
            .and_then(|c| c.as_ref().and_then(|c| c.stream.clone()))
    }

    fn start_heartbeat(&self, login: String, stream: StreamInfo) {
        self.stop_heartbeat();
        let client = self.client.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            let mut spade_url: Option<String> = None;
            let mut consecutive_failures = 0u32;

            loop {
                interval.tick().await;

                if spade_url.is_none() {
                    match get_spade_url(client.http(), &login).await {
                        Ok(url) => {
                            debug!("[HeartbeatDriver] Got spade URL for {}", login);
                            spade_url = Some(url);
                        }
                        Err(e) => {
                            warn!("[HeartbeatDriver] Failed to get spade URL for {}: {}", login, e);
                            continue;
                        }
                    }
                }
                let Some(url) = spade_url.as_deref() else {
                    continue;
                };

                match send_watch_payload(&client, url, &login, &stream).await {
                    Ok(true) => {
                        consecutive_failures = 0;
                        debug!("[HeartbeatDriver] Watch payload sent to {}", login);
                    }
                    Ok(false) | Err(_) => {
                        consecutive_failures += 1;
                        warn!(
                            "[HeartbeatDriver] Watch payload failed for {} (failure {})",
                            login, consecutive_failures
                        );
                        // The spade endpoint rotates; fetch it again next tick
                        spade_url = None;
                    }
                }
            }
        });

        if let Ok(mut heartbeat) = self.heartbeat.lock() {
            *heartbeat = Some(handle);
        }
    }
}

impl Drop for HeartbeatSessionDriver {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[async_trait]
impl SessionDriver for HeartbeatSessionDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.stop_heartbeat();

        if url == BLANK_PAGE {
            if let Ok(mut current) = self.current.lock() {
                *current = None;
            }
            return Ok(());
        }

        let login = channel_login_from_url(url)
            .ok_or_else(|| DriverError::Other(anyhow::anyhow!("Not a channel URL: {}", url)))?;
        info!("[HeartbeatDriver] Navigating to {}", login);

        if let Ok(mut current) = self.current.lock() {
            *current = Some(ActiveChannel {
                login,
                ..Default::default()
            });
        }
        Ok(())
    }

    async fn wait_for_player_stable(&self) -> Result<(), DriverError> {
        let login = self.current_login()?;
        let client = self.client.clone();

        let stable = wait_until_stable(
            || {
                let client = client.clone();
                let login = login.clone();
                async move {
                    match client.get_stream_info(&login).await {
                        Ok(info) => info.map(|i| i.broadcast_id),
                        Err(e) => {
                            debug!("[HeartbeatDriver] Stream lookup failed for {}: {}", login, e);
                            None
                        }
                    }
                }
            },
            self.settings.player_stable_interval(),
            self.settings.player_stable_checks,
            self.settings.player_load_timeout(),
        )
        .await;

        if stable.is_none() {
            return Err(DriverError::LoadTimeout(login));
        }

        let stream = self
            .client
            .get_stream_info(&login)
            .await
            .map_err(DriverError::Other)?
            .ok_or_else(|| DriverError::LoadTimeout(login.clone()))?;

        if let Ok(mut current) = self.current.lock() {
            if let Some(active) = current.as_mut() {
                active.viewers = Some((Instant::now(), Some(stream.viewers)));
                active.stream = Some(stream.clone());
            }
        }
        self.start_heartbeat(login, stream);
        Ok(())
    }

    async fn dismiss_mature_content_prompt(&self) -> Result<bool, DriverError> {
        Ok(false)
    }

    async fn force_lowest_quality(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn hide_video(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn get_viewer_count(&self) -> Result<Option<u32>, DriverError> {
        let cached = self.current.lock().ok().and_then(|c| {
            c.as_ref()
                .and_then(|c| c.cached_viewers(Instant::now(), VIEWER_REFRESH_INTERVAL))
        });
        if let Some(viewers) = cached {
            return Ok(viewers);
        }

        let login = self.current_login()?;
        let viewers = self
            .client
            .get_stream_info(&login)
            .await
            .map_err(DriverError::Other)?
            .map(|i| i.viewers);

        if let Ok(mut current) = self.current.lock() {
            if let Some(active) = current.as_mut().filter(|c| c.login == login) {
                active.viewers = Some((Instant::now(), viewers));
            }
        }
        Ok(viewers)
    }

    async fn get_uptime(&self) -> Result<Option<String>, DriverError> {
        Ok(self
            .current_stream()
            .and_then(|s| s.started_at)
            .map(|started| format_uptime(Utc::now() - started)))
    }
}

/// Send the `minute-watched` event that credits watch time.
async fn send_watch_payload(
    client: &GqlDropsClient,
    spade_url: &str,
    login: &str,
    stream: &StreamInfo,
) -> Result<bool> {
    let user_id = client.user_id().await?;

    let payload_data = json!([{
        "event": "minute-watched",
        "properties": {
            "broadcast_id": stream.broadcast_id,
            "channel_id": stream.channel_id,
            "channel": login,
            "hidden": false,
            "live": true,
            "location": "channel",
            "logged_in": true,
            "muted": false,
            "player": "site",
            "user_id": user_id
        }
    }]);

    // Minify and base64 encode the payload
    let payload_str = serde_json::to_string(&payload_data)?;
    let encoded = general_purpose::STANDARD.encode(payload_str.as_bytes());

    let response = client
        .http()
        .post(spade_url)
        .form(&[("data", encoded)])
        .send()
        .await?;

    Ok(response.status().as_u16() == 204)
}

/// Extract the spade URL from the channel page, or from its settings script.
async fn get_spade_url(client: &reqwest::Client, channel_login: &str) -> Result<String> {
    let channel_url = format!("https://www.twitch.tv/{}", channel_login);

    let html = client
        .get(&channel_url)
        .header(
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        )
        .send()
        .await?
        .text()
        .await?;

    let spade_pattern =
        Regex::new(r#""spade_?url":\s*"(https://video-edge-[.\w\-/]+\.ts(?:\?[^"]*)?)"#)?;
    if let Some(url) = spade_pattern.captures(&html).and_then(|c| c.get(1)) {
        return Ok(url.as_str().to_string());
    }

    let settings_pattern =
        Regex::new(r#"src="(https://[\w.]+/config/settings\.[0-9a-f]{32}\.js)"#)?;
    if let Some(settings_url) = settings_pattern.captures(&html).and_then(|c| c.get(1)) {
        let settings_js = client.get(settings_url.as_str()).send().await?.text().await?;
        if let Some(url) = spade_pattern.captures(&settings_js).and_then(|c| c.get(1)) {
            return Ok(url.as_str().to_string());
        }
    }

    Err(anyhow::anyhow!(
        "Could not find spade URL for channel {}",
        channel_login
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_login_from_url() {
        assert_eq!(
            channel_login_from_url("https://www.twitch.tv/SomeStreamer").as_deref(),
            Some("somestreamer")
        );
        assert_eq!(
            channel_login_from_url("https://www.twitch.tv/somestreamer/").as_deref(),
            Some("somestreamer")
        );
        assert_eq!(channel_login_from_url("https://www.twitch.tv/"), None);
        assert_eq!(channel_login_from_url("not a url"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_count_is_reused_until_stale() {
        let fetched_at = Instant::now();
        let active = ActiveChannel {
            login: "alpha".to_string(),
            stream: None,
            viewers: Some((fetched_at, Some(250))),
        };

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(
            active.cached_viewers(Instant::now(), VIEWER_REFRESH_INTERVAL),
            Some(Some(250))
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(active.cached_viewers(Instant::now(), VIEWER_REFRESH_INTERVAL), None);
        assert_eq!(
            ActiveChannel::default().cached_viewers(fetched_at, VIEWER_REFRESH_INTERVAL),
            None
        );
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(chrono::Duration::seconds(3725)), "1:02:05");
        assert_eq!(format_uptime(chrono::Duration::seconds(-5)), "0:00:00");
    }
}
