use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::models::drops::DropCampaign;
use crate::services::drops_client::DropsClient;

/// Receiver of catalog refreshes. Implementations must hand long work off
/// rather than hold up the watchdog.
#[async_trait]
pub trait CatalogListener: Send + Sync {
    async fn on_refresh(&self, campaigns: Vec<DropCampaign>);
    async fn on_error(&self, error: anyhow::Error);
}

/// Polls the campaign catalog on a fixed interval. The first poll happens
/// immediately on start.
pub struct CatalogWatchdog {
    client: Arc<dyn DropsClient>,
    interval: Duration,
}

impl CatalogWatchdog {
    pub fn new(client: Arc<dyn DropsClient>, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub fn start(self, listener: Arc<dyn CatalogListener>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut poll = interval(self.interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                poll.tick().await;
                match self.client.fetch_campaigns().await {
                    Ok(campaigns) => {
                        debug!("[Watchdog] Catalog refreshed: {} campaigns", campaigns.len());
                        listener.on_refresh(campaigns).await;
                    }
                    Err(e) => {
                        warn!("[Watchdog] Catalog refresh failed: {}", e);
                        listener.on_error(e).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::drops::CampaignStatus;
    use crate::services::testing::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingListener {
        refreshes: Mutex<Vec<usize>>,
        errors: Mutex<u32>,
    }

    #[async_trait]
    impl CatalogListener for CountingListener {
        async fn on_refresh(&self, campaigns: Vec<DropCampaign>) {
            self.refreshes.lock().unwrap().push(campaigns.len());
        }

        async fn on_error(&self, _error: anyhow::Error) {
            *self.errors.lock().unwrap() += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_immediately_then_on_interval() {
        let client = FakeDropsClient::new();
        client.with(|s| s.campaigns.push(campaign("c1", "Game", CampaignStatus::Active)));
        let listener = Arc::new(CountingListener::default());

        let handle = CatalogWatchdog::new(client.clone(), Duration::from_secs(900))
            .start(listener.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*listener.refreshes.lock().unwrap(), vec![1]);

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(listener.refreshes.lock().unwrap().len(), 2);
        assert_eq!(*listener.errors.lock().unwrap(), 0);

        handle.abort();
    }
}
