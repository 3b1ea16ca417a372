use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;

use crate::error::MinerError;
use crate::models::drops::*;
use crate::models::settings::DropsSettings;
use crate::services::campaign_queue::{CampaignQueue, Catalog};
use crate::services::catalog_watchdog::CatalogListener;
use crate::services::drop_lookup::{find_unclaimed_drop, live_streams_for};
use crate::services::drops_client::DropsClient;
use crate::services::preemption::evaluate_preemption;
use crate::services::progress_renderer::ProgressRenderer;
use crate::services::session_driver::{SessionDriver, BLANK_PAGE};
use crate::services::session_inbox::EventSource;
use crate::services::stream_blacklist::StreamBlacklist;
use crate::services::watch_session::{
    AbortReason, SessionConfig, SessionOutcome, SessionTarget, WatchSession,
};

/// How one attempt at a campaign ended.
#[derive(Debug)]
pub enum CampaignOutcome {
    Completed,
    NoStreams,
    Preempted,
    /// Campaign left the catalog or is not running yet.
    Inactive,
    Stopped,
    Failed(MinerError),
}

/// Result of watching for a single drop.
enum DropAttempt {
    Claimed(ClaimedDrop),
    Resolved(String),
    StreamFailed,
    Finished(CampaignOutcome),
}

#[derive(Default)]
struct SchedulerState {
    catalog: Catalog,
    queue: CampaignQueue,
    current_campaign: Option<String>,
    claimed: Vec<ClaimedDrop>,
}

/// Feed a failed session back into the per-attempt blacklist.
pub fn record_session_failure(
    blacklist: &mut StreamBlacklist,
    stream_id: &str,
    reason: &AbortReason,
    now: Instant,
    settings: &DropsSettings,
) {
    match reason {
        AbortReason::StreamDown => blacklist.record_immediate_blacklist(
            stream_id,
            now,
            settings.stream_blacklist_duration(),
        ),
        AbortReason::NoProgress | AbortReason::LoadFailed | AbortReason::Failed(_) => blacklist
            .record_failure(
                stream_id,
                now,
                settings.stream_retry_threshold,
                settings.stream_blacklist_duration(),
            ),
        AbortReason::HighPriority => {}
    }
}

/// The single worker that decides what to watch next.
pub struct MiningService {
    client: Arc<dyn DropsClient>,
    driver: Arc<dyn SessionDriver>,
    renderer: Arc<dyn ProgressRenderer>,
    events: Arc<dyn EventSource>,
    settings: DropsSettings,
    state: Arc<Mutex<SchedulerState>>,
    preempt: Arc<AtomicBool>,
    wake_tx: watch::Sender<u64>,
    mining_status: Arc<RwLock<MiningStatus>>,
    is_running: Arc<RwLock<bool>>,
}

impl MiningService {
    pub fn new(
        client: Arc<dyn DropsClient>,
        driver: Arc<dyn SessionDriver>,
        renderer: Arc<dyn ProgressRenderer>,
        events: Arc<dyn EventSource>,
        settings: DropsSettings,
    ) -> Self {
        let (wake_tx, _) = watch::channel(0u64);
        Self {
            client,
            driver,
            renderer,
            events,
            settings,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            preempt: Arc::new(AtomicBool::new(false)),
            wake_tx,
            mining_status: Arc::new(RwLock::new(MiningStatus::default())),
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn get_mining_status(&self) -> MiningStatus {
        self.mining_status.read().await.clone()
    }

    pub async fn is_mining(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn claimed_drops(&self) -> Vec<ClaimedDrop> {
        self.state.lock().await.claimed.clone()
    }

    /// Ask the loop to exit. A running session notices at its next tick.
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.preempt.store(true, Ordering::SeqCst);
        self.wake();
        info!("[Scheduler] Stop requested");
    }

    fn wake(&self) {
        self.wake_tx.send_modify(|generation| *generation += 1);
    }

    /// Scheduling loop. Returns after [`MiningService::stop`].
    pub async fn run(self: Arc<Self>) {
        *self.is_running.write().await = true;
        let mut wake_rx = self.wake_tx.subscribe();

        info!("[Scheduler] Waiting for the first catalog refresh...");
        if wake_rx.wait_for(|generation| *generation > 0).await.is_err() {
            return;
        }

        while self.is_mining().await {
            wake_rx.borrow_and_update();

            let picked = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let next = state.queue.next(self.settings.attempt_cooldown(), now);
                if let Some(id) = next.as_ref() {
                    state.queue.record_attempt(id, now);
                    state.current_campaign = Some(id.clone());
                    self.preempt.store(false, Ordering::SeqCst);
                }
                next
            };

            match picked {
                Some(campaign_id) => {
                    let outcome = self.process_campaign(&campaign_id).await;
                    self.state.lock().await.current_campaign = None;
                    self.log_outcome(&campaign_id, outcome).await;
                }
                None => self.idle(&mut wake_rx).await,
            }
        }

        let mut status = self.mining_status.write().await;
        status.is_mining = false;
        status.current_campaign = None;
        status.last_update = Utc::now();
        info!("[Scheduler] Stopped");
    }

    async fn log_outcome(&self, campaign_id: &str, outcome: CampaignOutcome) {
        let name = self
            .state
            .lock()
            .await
            .catalog
            .get(campaign_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| campaign_id.to_string());

        match outcome {
            CampaignOutcome::Completed => info!("✅ No unclaimed drops left in {}", name),
            CampaignOutcome::NoStreams => {
                warn!("📭 {}", MinerError::NoStreamsAvailable(name))
            }
            CampaignOutcome::Preempted => {
                info!("⚡ {} yielded to a higher priority campaign", name)
            }
            CampaignOutcome::Inactive => debug!("[Scheduler] {} is not active, skipping", name),
            CampaignOutcome::Stopped => debug!("[Scheduler] {} interrupted by stop", name),
            CampaignOutcome::Failed(e) => warn!("❌ Attempt on {} failed: {}", name, e),
        }
    }

    /// Wait for a refresh or for the next campaign to leave its cooldown.
    async fn idle(&self, wake_rx: &mut watch::Receiver<u64>) {
        let wait = {
            let state = self.state.lock().await;
            state
                .queue
                .time_until_next_eligible(self.settings.attempt_cooldown(), Instant::now())
        };
        {
            let mut status = self.mining_status.write().await;
            status.is_mining = false;
            status.current_campaign = None;
            status.last_update = Utc::now();
        }

        let fallback = &self.settings.fallback_stream;
        let watching_fallback = fallback.enabled && !fallback.url.is_empty();
        if watching_fallback {
            info!("📺 Nothing eligible, watching fallback stream {}", fallback.url);
            match self.driver.navigate(&fallback.url).await {
                Ok(()) => {
                    if let Err(e) = self.driver.wait_for_player_stable().await {
                        warn!("[Scheduler] Fallback stream did not load: {}", e);
                    }
                }
                Err(e) => warn!("[Scheduler] Failed to open fallback stream: {}", e),
            }
        } else {
            debug!("[Scheduler] Idle, next campaign eligible in {:?}", wait);
        }

        match wait {
            Some(duration) => {
                let _ = tokio::time::timeout(duration, wake_rx.changed()).await;
            }
            None => {
                let _ = wake_rx.changed().await;
            }
        }

        if watching_fallback {
            if let Err(e) = self.driver.navigate(BLANK_PAGE).await {
                debug!("[Scheduler] Failed to leave fallback stream: {}", e);
            }
        }
    }

    async fn process_campaign(&self, campaign_id: &str) -> CampaignOutcome {
        let mut blacklist = StreamBlacklist::new();
        let mut handled: HashSet<String> = HashSet::new();

        loop {
            if !self.is_mining().await {
                return CampaignOutcome::Stopped;
            }

            let campaign = self.state.lock().await.catalog.get(campaign_id).cloned();
            let Some(campaign) = campaign.filter(|c| c.is_active()) else {
                return CampaignOutcome::Inactive;
            };

            {
                let mut status = self.mining_status.write().await;
                status.is_mining = true;
                status.current_campaign = Some(campaign.name.clone());
                status.last_update = Utc::now();
            }

            let unclaimed =
                match find_unclaimed_drop(self.client.as_ref(), &campaign, Utc::now(), &handled)
                    .await
                {
                    Ok(Some(unclaimed)) => unclaimed,
                    Ok(None) => return CampaignOutcome::Completed,
                    Err(e) => return CampaignOutcome::Failed(MinerError::Remote(e)),
                };

            if let Some(instance) = unclaimed.claimable_instance() {
                if let Err(e) = self.client.claim_drop(instance).await {
                    return CampaignOutcome::Failed(MinerError::Remote(e));
                }
                info!("🎉 Claimed {}", unclaimed.drop.reward_name());
                handled.insert(unclaimed.drop.id.clone());
                self.record_claim(ClaimedDrop {
                    campaign_id: campaign.id.clone(),
                    drop_id: unclaimed.drop.id.clone(),
                    drop_name: unclaimed.drop.reward_name().to_string(),
                    claimed_at: Utc::now(),
                })
                .await;
                continue;
            }

            match self.watch_drop(&campaign, &unclaimed, &mut blacklist).await {
                DropAttempt::Claimed(claimed) => {
                    handled.insert(claimed.drop_id.clone());
                    self.record_claim(claimed).await;
                }
                DropAttempt::Resolved(drop_id) => {
                    handled.insert(drop_id);
                }
                DropAttempt::StreamFailed => {}
                DropAttempt::Finished(outcome) => return outcome,
            }
        }
    }

    async fn watch_drop(
        &self,
        campaign: &DropCampaign,
        unclaimed: &UnclaimedDrop,
        blacklist: &mut StreamBlacklist,
    ) -> DropAttempt {
        if self.preempt.swap(false, Ordering::SeqCst) {
            return DropAttempt::Finished(self.interrupted_outcome().await);
        }

        let streams = match live_streams_for(
            self.client.as_ref(),
            campaign,
            unclaimed.allowed_channels.as_deref(),
        )
        .await
        {
            Ok(streams) => streams,
            Err(e) => return DropAttempt::Finished(CampaignOutcome::Failed(MinerError::Remote(e))),
        };

        let now = Instant::now();
        blacklist.sweep_expired(now);
        let Some(stream) = streams
            .into_iter()
            .find(|s| blacklist.is_eligible(&s.channel_login, now))
        else {
            return DropAttempt::Finished(CampaignOutcome::NoStreams);
        };

        info!(
            "🎮 {} ({}) on {} for {}",
            campaign.name,
            campaign.game_name,
            stream.channel_login,
            unclaimed.drop.reward_name()
        );

        let target = SessionTarget {
            campaign_id: campaign.id.clone(),
            campaign_name: campaign.name.clone(),
            game_name: campaign.game_name.clone(),
            drop: unclaimed.drop.clone(),
        };
        let mut session = WatchSession::new(
            self.client.clone(),
            self.driver.clone(),
            self.renderer.clone(),
            self.events.clone(),
            self.preempt.clone(),
            self.mining_status.clone(),
            SessionConfig::from(&self.settings),
        );

        match session.run(&stream, &target).await {
            SessionOutcome::Claimed(claimed) => DropAttempt::Claimed(claimed),
            SessionOutcome::Resolved { drop_id } => DropAttempt::Resolved(drop_id),
            SessionOutcome::Aborted(AbortReason::HighPriority) => {
                DropAttempt::Finished(self.interrupted_outcome().await)
            }
            SessionOutcome::Aborted(reason) => {
                record_session_failure(
                    blacklist,
                    &stream.channel_login,
                    &reason,
                    Instant::now(),
                    &self.settings,
                );
                if let Some(error) = reason.into_error(&stream.channel_login) {
                    warn!("⚠️ {}", error);
                }
                DropAttempt::StreamFailed
            }
        }
    }

    /// The preempt flag is shared with [`MiningService::stop`].
    async fn interrupted_outcome(&self) -> CampaignOutcome {
        if self.is_mining().await {
            CampaignOutcome::Preempted
        } else {
            CampaignOutcome::Stopped
        }
    }

    async fn record_claim(&self, claimed: ClaimedDrop) {
        self.state.lock().await.claimed.push(claimed);
    }
}

#[async_trait]
impl CatalogListener for MiningService {
    async fn on_refresh(&self, campaigns: Vec<DropCampaign>) {
        let (queue, catalog, current) = {
            let mut state = self.state.lock().await;
            state.catalog = campaigns.into_iter().map(|c| (c.id.clone(), c)).collect();
            let SchedulerState { catalog, queue, .. } = &mut *state;
            queue.rebuild(catalog, &self.settings);
            debug!(
                "[Scheduler] Queue rebuilt: {} of {} campaigns pending",
                queue.len(),
                catalog.len()
            );
            (
                state.queue.entries().to_vec(),
                state.catalog.clone(),
                state.current_campaign.clone(),
            )
        };

        if let Some(current) = current {
            let scan =
                evaluate_preemption(self.client.as_ref(), &queue, &catalog, &current).await;

            let mut state = self.state.lock().await;
            state.claimed.extend(scan.claimed);
            if let Some(candidate) = scan.preempt_for {
                // run() clears the flag under this lock when it picks a campaign
                if state.current_campaign.as_deref() == Some(current.as_str()) {
                    self.preempt.store(true, Ordering::SeqCst);
                } else {
                    debug!(
                        "[Scheduler] Ignoring preemption for {}, {} is no longer running",
                        candidate, current
                    );
                }
            }
        }

        self.wake();
    }

    async fn on_error(&self, error: anyhow::Error) {
        warn!("[Scheduler] Catalog unavailable, keeping previous queue: {}", error);
    }
}
