use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::models::stream::SessionEvent;

const PROGRESS_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub drop_id: String,
    pub current_minutes: u32,
    pub required_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReady {
    pub drop_id: String,
    pub drop_instance_id: String,
}

/// Everything gathered since the previous poll tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InboxSnapshot {
    pub viewer_count: Option<u32>,
    pub progress: Vec<ProgressEvent>,
    pub claim_ready: Option<ClaimReady>,
    pub stream_down: bool,
}

#[derive(Debug, Default)]
struct InboxState {
    viewer_count: Option<u32>,
    progress: VecDeque<ProgressEvent>,
    claim_ready: Option<ClaimReady>,
    stream_down: bool,
}

/// Bounded mailbox between an event source and the active watch session.
/// `push` never blocks on anything but a short critical section.
#[derive(Debug, Default)]
pub struct SessionInbox {
    state: Mutex<InboxState>,
}

impl SessionInbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: SessionEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match event {
            SessionEvent::ViewCount(viewers) => state.viewer_count = Some(viewers),
            SessionEvent::DropProgress {
                drop_id,
                current_minutes,
                required_minutes,
            } => {
                if state.progress.len() >= PROGRESS_CAPACITY {
                    state.progress.pop_front();
                    debug!("[SessionInbox] Progress queue full, dropping oldest event");
                }
                state.progress.push_back(ProgressEvent {
                    drop_id,
                    current_minutes,
                    required_minutes,
                });
            }
            SessionEvent::DropClaimReady {
                drop_id,
                drop_instance_id,
            } => {
                state.claim_ready = Some(ClaimReady {
                    drop_id,
                    drop_instance_id,
                })
            }
            SessionEvent::StreamDown => state.stream_down = true,
        }
    }

    /// Take pending one-shot signals. The viewer count is sticky.
    pub fn drain(&self) -> InboxSnapshot {
        let Ok(mut state) = self.state.lock() else {
            return InboxSnapshot::default();
        };
        InboxSnapshot {
            viewer_count: state.viewer_count,
            progress: state.progress.drain(..).collect(),
            claim_ready: state.claim_ready.take(),
            stream_down: std::mem::take(&mut state.stream_down),
        }
    }
}

/// Source of [`SessionEvent`]s for the channel a session is watching.
pub trait EventSource: Send + Sync {
    fn attach(&self, channel_id: &str, inbox: Arc<SessionInbox>);
    fn detach(&self);
}
