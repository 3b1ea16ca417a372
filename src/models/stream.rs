use serde::{Deserialize, Serialize};

/// A live broadcast that can be watched for drop progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStream {
    pub channel_id: String,
    pub channel_login: String,
    pub viewers: u32,
}

impl LiveStream {
    pub fn url(&self) -> String {
        format!("https://www.twitch.tv/{}", self.channel_login)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub channel_id: String,
    pub broadcast_id: String,
    pub viewers: u32,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Asynchronous signals delivered to the active watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ViewCount(u32),
    DropProgress {
        drop_id: String,
        current_minutes: u32,
        required_minutes: u32,
    },
    DropClaimReady {
        drop_id: String,
        drop_instance_id: String,
    },
    StreamDown,
}
