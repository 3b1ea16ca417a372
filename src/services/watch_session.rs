//! One attempt at earning a drop on one stream.
//!
//! A session moves `Loading -> Watching -> Claimed | Aborted`. It never
//! blocks on anything but its poll interval: preemption and stream-down are
//! observed at the next tick.

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::error::MinerError;
use crate::models::drops::{
    ClaimedDrop, CurrentDropInfo, InventoryDrop, MiningStatus, TimeBasedDrop,
};
use crate::models::settings::DropsSettings;
use crate::models::stream::LiveStream;
use crate::services::drops_client::DropsClient;
use crate::services::progress_renderer::{ProgressRenderer, RenderPayload};
use crate::services::progress_tracker::ProgressTracker;
use crate::services::session_driver::{SessionDriver, BLANK_PAGE};
use crate::services::session_inbox::{ClaimReady, EventSource, SessionInbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Watching,
    Claimed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    StreamDown,
    NoProgress,
    HighPriority,
    LoadFailed,
    Failed(String),
}

impl AbortReason {
    /// Error view of the reason. Preemption is a normal outcome and has none.
    pub fn into_error(self, stream: &str) -> Option<MinerError> {
        match self {
            AbortReason::StreamDown => Some(MinerError::StreamWentDown(stream.to_string())),
            AbortReason::NoProgress => Some(MinerError::NoProgressDetected(stream.to_string())),
            AbortReason::LoadFailed => Some(MinerError::StreamLoadFailed(stream.to_string())),
            AbortReason::Failed(reason) => Some(MinerError::SessionFailed {
                stream: stream.to_string(),
                reason,
            }),
            AbortReason::HighPriority => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Claimed(ClaimedDrop),
    /// The drop turned out to be claimed or gone; nothing left to do.
    Resolved { drop_id: String },
    Aborted(AbortReason),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub stall_threshold: Duration,
    pub hide_video: bool,
}

impl From<&DropsSettings> for SessionConfig {
    fn from(settings: &DropsSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            stall_threshold: settings.stall_threshold(),
            hide_video: settings.hide_video,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub campaign_id: String,
    pub campaign_name: String,
    pub game_name: String,
    pub drop: TimeBasedDrop,
}

/// What the session is currently tracking, re-derived when another drop
/// starts receiving progress.
#[derive(Debug, Clone)]
struct Objective {
    drop_id: String,
    campaign_id: Option<String>,
    name: String,
    required_minutes: u32,
}

impl Objective {
    fn from_target(target: &SessionTarget) -> Self {
        Self {
            drop_id: target.drop.id.clone(),
            campaign_id: Some(target.campaign_id.clone()),
            name: target.drop.reward_name().to_string(),
            required_minutes: target.drop.required_minutes_watched,
        }
    }

    fn from_record(record: &InventoryDrop, fallback_required: u32) -> Self {
        let required_minutes = if record.required_minutes_watched > 0 {
            record.required_minutes_watched
        } else {
            fallback_required
        };
        Self {
            drop_id: record.drop_id.clone(),
            campaign_id: Some(record.campaign_id.clone()),
            name: record.name.clone(),
            required_minutes,
        }
    }
}

pub struct WatchSession {
    client: Arc<dyn DropsClient>,
    driver: Arc<dyn SessionDriver>,
    renderer: Arc<dyn ProgressRenderer>,
    events: Arc<dyn EventSource>,
    preempt: Arc<AtomicBool>,
    mining_status: Arc<RwLock<MiningStatus>>,
    config: SessionConfig,
    state: SessionState,
}

impl WatchSession {
    pub fn new(
        client: Arc<dyn DropsClient>,
        driver: Arc<dyn SessionDriver>,
        renderer: Arc<dyn ProgressRenderer>,
        events: Arc<dyn EventSource>,
        preempt: Arc<AtomicBool>,
        mining_status: Arc<RwLock<MiningStatus>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            client,
            driver,
            renderer,
            events,
            preempt,
            mining_status,
            config,
            state: SessionState::Loading,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Watch `stream` until `target` (or whichever drop the stream ends up
    /// crediting) is claimed, or something ends the attempt.
    pub async fn run(&mut self, stream: &LiveStream, target: &SessionTarget) -> SessionOutcome {
        self.state = SessionState::Loading;

        let record = match self
            .client
            .get_inventory_drop(&target.drop.id, Some(&target.campaign_id))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "[WatchSession] Inventory read failed for {}: {}",
                    target.drop.id, e
                );
                None
            }
        };

        if let Some(record) = record.as_ref() {
            if record.is_claimed {
                self.state = SessionState::Claimed;
                return SessionOutcome::Resolved {
                    drop_id: record.drop_id.clone(),
                };
            }
            if record.is_complete() {
                info!(
                    "🎁 {} already has {}/{} minutes, claiming without watching",
                    target.drop.reward_name(),
                    record.current_minutes_watched,
                    record.required_minutes_watched
                );
                let objective = Objective::from_record(record, target.drop.required_minutes_watched);
                return match record.drop_instance_id.clone() {
                    Some(instance) => self.claim(&objective, &instance).await,
                    None => self.abort(AbortReason::Failed(format!(
                        "drop {} is complete but has no instance to claim",
                        record.drop_id
                    ))),
                };
            }
        }

        let inbox = SessionInbox::new();
        self.events.attach(&stream.channel_id, inbox.clone());
        let outcome = self.watch(stream, target, record, &inbox).await;
        self.events.detach();
        self.renderer.stop();

        if let Err(e) = self.driver.navigate(BLANK_PAGE).await {
            debug!("[WatchSession] Failed to leave {}: {}", stream.channel_login, e);
        }
        {
            let mut status = self.mining_status.write().await;
            status.current_stream = None;
            status.current_drop = None;
            status.last_update = Utc::now();
        }
        outcome
    }

    async fn load(&self, stream: &LiveStream) -> Result<(), AbortReason> {
        let url = stream.url();
        self.driver.navigate(&url).await.map_err(|e| match e {
            e if e.is_load_timeout() => AbortReason::LoadFailed,
            e => AbortReason::Failed(e.to_string()),
        })?;
        self.driver.wait_for_player_stable().await.map_err(|e| match e {
            e if e.is_load_timeout() => AbortReason::LoadFailed,
            e => AbortReason::Failed(e.to_string()),
        })?;

        match self.driver.dismiss_mature_content_prompt().await {
            Ok(true) => debug!("[WatchSession] Dismissed mature content prompt on {}", url),
            Ok(false) => {}
            Err(e) => warn!("[WatchSession] Mature content prompt check failed: {}", e),
        }

        self.driver
            .force_lowest_quality()
            .await
            .map_err(|e| AbortReason::Failed(format!("lowest quality: {}", e)))?;

        if self.config.hide_video {
            self.driver
                .hide_video()
                .await
                .map_err(|e| AbortReason::Failed(format!("hide video: {}", e)))?;
        }
        Ok(())
    }

    async fn watch(
        &mut self,
        stream: &LiveStream,
        target: &SessionTarget,
        record: Option<InventoryDrop>,
        inbox: &SessionInbox,
    ) -> SessionOutcome {
        if let Err(reason) = self.load(stream).await {
            return self.abort(reason);
        }

        self.state = SessionState::Watching;
        let mut objective = match record.as_ref() {
            Some(r) => Objective::from_record(r, target.drop.required_minutes_watched),
            None => Objective::from_target(target),
        };
        let initial = record.map(|r| r.current_minutes_watched).unwrap_or(0);
        let mut tracker = ProgressTracker::new(&objective.drop_id, initial, Instant::now());

        let payload = self.payload(stream, &objective, None, None);
        self.renderer
            .start(initial, objective.required_minutes, &payload);
        self.publish_status(stream, target, &objective, initial).await;

        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let now = Instant::now();
            let snapshot = inbox.drain();

            for event in &snapshot.progress {
                let update = tracker.on_progress(&event.drop_id, event.current_minutes, now);
                if update.switched_target {
                    objective = self.adopt(&event.drop_id, event.required_minutes).await;
                    info!(
                        "🔀 {} is now crediting {} instead",
                        stream.channel_login, objective.name
                    );
                }
            }

            if snapshot.stream_down {
                info!("📴 {} went offline", stream.channel_login);
                return self.abort(AbortReason::StreamDown);
            }

            if tracker.stalled_for(now) >= self.config.stall_threshold {
                match self.reconcile(&mut tracker, &objective, now).await {
                    Some(record) if record.is_claimable() => {
                        let instance = record.drop_instance_id.clone().unwrap_or_default();
                        return self.claim(&objective, &instance).await;
                    }
                    Some(_) => {}
                    None => {
                        warn!(
                            "⏳ No progress on {} for {:?}",
                            stream.channel_login, self.config.stall_threshold
                        );
                        return self.abort(AbortReason::NoProgress);
                    }
                }
            }

            if self.preempt.swap(false, Ordering::SeqCst) {
                return self.abort(AbortReason::HighPriority);
            }

            if let Some(ready) = snapshot.claim_ready {
                return self.claim_ready(&objective, ready).await;
            }

            let current = tracker
                .state(&objective.drop_id)
                .map(|s| s.current_minutes)
                .unwrap_or(0);
            let viewers = match snapshot.viewer_count {
                Some(v) => Some(v),
                None => self.driver.get_viewer_count().await.ok().flatten(),
            };
            let uptime = self.driver.get_uptime().await.ok().flatten();
            let payload = self.payload(stream, &objective, viewers, uptime);
            self.renderer
                .update(current, objective.required_minutes, &payload);
            self.publish_status(stream, target, &objective, current).await;
        }
    }

    /// Re-read the tracked drop after a stall. `Some` when progress resumed.
    async fn reconcile(
        &self,
        tracker: &mut ProgressTracker,
        objective: &Objective,
        now: Instant,
    ) -> Option<InventoryDrop> {
        let record = match self
            .client
            .get_inventory_drop(&objective.drop_id, objective.campaign_id.as_deref())
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    "[WatchSession] Reconcile read failed for {}: {}",
                    objective.drop_id, e
                );
                return None;
            }
        };

        if tracker.reconcile(record.current_minutes_watched, now) {
            debug!(
                "[WatchSession] Inventory shows {} at {} minutes, continuing",
                objective.drop_id, record.current_minutes_watched
            );
            Some(record)
        } else {
            None
        }
    }

    async fn adopt(&self, drop_id: &str, reported_required: u32) -> Objective {
        match self.client.get_inventory_drop(drop_id, None).await {
            Ok(Some(record)) => Objective::from_record(&record, reported_required),
            Ok(None) | Err(_) => Objective {
                drop_id: drop_id.to_string(),
                campaign_id: None,
                name: drop_id.to_string(),
                required_minutes: reported_required,
            },
        }
    }

    async fn claim_ready(&mut self, objective: &Objective, ready: ClaimReady) -> SessionOutcome {
        let record = match self.client.get_inventory_drop(&ready.drop_id, None).await {
            Ok(record) => record,
            Err(e) => {
                return self.abort(AbortReason::Failed(format!(
                    "inventory read for claim: {}",
                    e
                )))
            }
        };

        let Some(record) = record.filter(|r| !r.is_claimed) else {
            debug!(
                "[WatchSession] Drop {} already resolved, nothing to claim",
                ready.drop_id
            );
            self.state = SessionState::Claimed;
            return SessionOutcome::Resolved {
                drop_id: ready.drop_id,
            };
        };

        let objective = if record.drop_id == objective.drop_id {
            objective.clone()
        } else {
            Objective::from_record(&record, record.required_minutes_watched)
        };
        let instance = record.drop_instance_id.unwrap_or(ready.drop_instance_id);
        self.claim(&objective, &instance).await
    }

    async fn claim(&mut self, objective: &Objective, instance: &str) -> SessionOutcome {
        match self.client.claim_drop(instance).await {
            Ok(()) => {
                info!("🎉 Claimed {}", objective.name);
                self.state = SessionState::Claimed;
                SessionOutcome::Claimed(ClaimedDrop {
                    campaign_id: objective.campaign_id.clone().unwrap_or_default(),
                    drop_id: objective.drop_id.clone(),
                    drop_name: objective.name.clone(),
                    claimed_at: Utc::now(),
                })
            }
            Err(e) => self.abort(AbortReason::Failed(format!("claim failed: {}", e))),
        }
    }

    fn abort(&mut self, reason: AbortReason) -> SessionOutcome {
        self.state = SessionState::Aborted;
        SessionOutcome::Aborted(reason)
    }

    fn payload(
        &self,
        stream: &LiveStream,
        objective: &Objective,
        viewer_count: Option<u32>,
        uptime: Option<String>,
    ) -> RenderPayload {
        RenderPayload {
            stream_url: stream.url(),
            viewer_count,
            uptime,
            objective: objective.name.clone(),
        }
    }

    async fn publish_status(
        &self,
        stream: &LiveStream,
        target: &SessionTarget,
        objective: &Objective,
        current: u32,
    ) {
        let required = objective.required_minutes;
        let remaining = required.saturating_sub(current) as i64;
        let mut status = self.mining_status.write().await;
        status.current_stream = Some(stream.channel_login.clone());
        status.current_drop = Some(CurrentDropInfo {
            drop_id: objective.drop_id.clone(),
            drop_name: objective.name.clone(),
            campaign_name: target.campaign_name.clone(),
            game_name: target.game_name.clone(),
            current_minutes: current,
            required_minutes: required,
            progress_percentage: if required == 0 {
                0.0
            } else {
                (current as f32 / required as f32 * 100.0).min(100.0)
            },
            estimated_completion: Some(Utc::now() + chrono::Duration::minutes(remaining)),
        });
        status.last_update = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stream::SessionEvent;
    use crate::services::testing::*;

    struct Harness {
        client: Arc<FakeDropsClient>,
        driver: Arc<FakeDriver>,
        events: Arc<FakeEventSource>,
        renderer: Arc<RecordingRenderer>,
        preempt: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                client: FakeDropsClient::new(),
                driver: FakeDriver::new(),
                events: FakeEventSource::new(),
                renderer: RecordingRenderer::new(),
                preempt: Arc::new(AtomicBool::new(false)),
            }
        }

        fn session(&self) -> WatchSession {
            WatchSession::new(
                self.client.clone(),
                self.driver.clone(),
                self.renderer.clone(),
                self.events.clone(),
                self.preempt.clone(),
                Arc::new(RwLock::new(MiningStatus::default())),
                SessionConfig::from(&DropsSettings::default()),
            )
        }
    }

    fn target(required: u32) -> SessionTarget {
        SessionTarget {
            campaign_id: "c1".to_string(),
            campaign_name: "Campaign".to_string(),
            game_name: "Game".to_string(),
            drop: time_drop("d1", "c1", required),
        }
    }

    /// Wait until the session has attached its inbox.
    async fn attached_inbox(events: &FakeEventSource) -> Arc<SessionInbox> {
        loop {
            if let Some(inbox) = events.inbox() {
                return inbox;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_drop_is_claimed_without_watching() {
        let harness = Harness::new();
        harness
            .client
            .set_progress(inventory_drop("d1", "c1", 30, 30, Some("inst-1")));

        let mut session = harness.session();
        let outcome = session.run(&stream("alpha", 10), &target(30)).await;

        assert!(matches!(outcome, SessionOutcome::Claimed(ref c) if c.drop_id == "d1"));
        assert_eq!(session.state(), SessionState::Claimed);
        assert_eq!(harness.client.claims(), vec!["inst-1".to_string()]);
        assert!(harness.driver.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_aborts_at_threshold_not_before() {
        let harness = Harness::new();
        harness
            .client
            .set_progress(inventory_drop("d1", "c1", 5, 60, None));

        let mut session = harness.session();
        let started = Instant::now();
        let outcome = session.run(&stream("alpha", 10), &target(60)).await;
        let elapsed = started.elapsed();

        assert!(matches!(
            outcome,
            SessionOutcome::Aborted(AbortReason::NoProgress)
        ));
        assert!(elapsed >= Duration::from_secs(300), "aborted after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(302), "aborted after {:?}", elapsed);
        assert_eq!(
            harness.driver.navigations(),
            vec!["https://www.twitch.tv/alpha".to_string(), BLANK_PAGE.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_down_aborts_session() {
        let harness = Harness::new();
        let events = harness.events.clone();
        let mut session = harness.session();

        let handle = tokio::spawn(async move {
            session.run(&stream("alpha", 10), &target(60)).await
        });
        attached_inbox(&events).await.push(SessionEvent::StreamDown);

        let outcome = handle.await.unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Aborted(AbortReason::StreamDown)
        ));
        assert!(harness.events.inbox().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preemption_flag_is_cleared_and_aborts() {
        let harness = Harness::new();
        harness.preempt.store(true, Ordering::SeqCst);

        let mut session = harness.session();
        let outcome = session.run(&stream("alpha", 10), &target(60)).await;

        assert!(matches!(
            outcome,
            SessionOutcome::Aborted(AbortReason::HighPriority)
        ));
        assert!(!harness.preempt.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_ready_for_absent_record_is_resolved() {
        let harness = Harness::new();
        let events = harness.events.clone();
        let mut session = harness.session();

        let handle = tokio::spawn(async move {
            session.run(&stream("alpha", 10), &target(60)).await
        });
        attached_inbox(&events)
            .await
            .push(SessionEvent::DropClaimReady {
                drop_id: "d1".to_string(),
                drop_instance_id: "inst-1".to_string(),
            });

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Resolved { ref drop_id } if drop_id == "d1"));
        assert!(harness.client.claims().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_on_other_drop_is_adopted_and_claimed() {
        let harness = Harness::new();
        harness
            .client
            .set_progress(inventory_drop("other", "c2", 40, 60, Some("inst-other")));
        let events = harness.events.clone();
        let renderer = harness.renderer.clone();
        let mut session = harness.session();

        let handle = tokio::spawn(async move {
            session.run(&stream("alpha", 10), &target(60)).await
        });
        let inbox = attached_inbox(&events).await;
        for minutes in [40, 41] {
            inbox.push(SessionEvent::DropProgress {
                drop_id: "other".to_string(),
                current_minutes: minutes,
                required_minutes: 60,
            });
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        inbox.push(SessionEvent::DropClaimReady {
            drop_id: "other".to_string(),
            drop_instance_id: "inst-other".to_string(),
        });

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Claimed(ref c) if c.drop_id == "other"));
        assert_eq!(harness.client.claims(), vec!["inst-other".to_string()]);
        let updates = renderer.updates.lock().unwrap();
        assert!(updates.iter().any(|(current, total, name)| *current == 41
            && *total == 60
            && name == "other drop"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_timeout_is_load_failure() {
        let harness = Harness::new();
        harness
            .driver
            .load_timeouts
            .lock()
            .unwrap()
            .insert("https://www.twitch.tv/alpha".to_string());

        let mut session = harness.session();
        let outcome = session.run(&stream("alpha", 10), &target(60)).await;

        assert!(matches!(
            outcome,
            SessionOutcome::Aborted(AbortReason::LoadFailed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quality_failure_is_fatal_to_attempt() {
        let harness = Harness::new();
        *harness.driver.fail_quality.lock().unwrap() = true;

        let mut session = harness.session();
        let outcome = session.run(&stream("alpha", 10), &target(60)).await;

        assert!(matches!(
            outcome,
            SessionOutcome::Aborted(AbortReason::Failed(_))
        ));
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[test]
    fn test_high_priority_has_no_error() {
        assert!(AbortReason::HighPriority.into_error("alpha").is_none());
        assert!(matches!(
            AbortReason::StreamDown.into_error("alpha"),
            Some(MinerError::StreamWentDown(_))
        ));
    }
}
