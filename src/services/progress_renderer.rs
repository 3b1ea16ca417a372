use log::info;
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderPayload {
    pub stream_url: String,
    pub viewer_count: Option<u32>,
    pub uptime: Option<String>,
    pub objective: String,
}

/// Observational progress display. Nothing flows back into scheduling.
pub trait ProgressRenderer: Send + Sync {
    fn start(&self, current: u32, total: u32, payload: &RenderPayload);
    fn update(&self, current: u32, total: u32, payload: &RenderPayload);
    fn stop(&self);
}

/// Logs a line whenever the rendered progress changes.
#[derive(Default)]
pub struct ConsoleRenderer {
    last: Mutex<Option<(u32, u32, String)>>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn changed(&self, current: u32, total: u32, objective: &str) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return true;
        };
        let next = (current, total, objective.to_string());
        if last.as_ref() == Some(&next) {
            return false;
        }
        *last = Some(next);
        true
    }
}

fn percentage(current: u32, total: u32) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (current as f32 / total as f32 * 100.0).min(100.0)
}

impl ProgressRenderer for ConsoleRenderer {
    fn start(&self, current: u32, total: u32, payload: &RenderPayload) {
        self.changed(current, total, &payload.objective);
        info!(
            "⛏️ Watching {} for {} ({}/{} min, {:.0}%)",
            payload.stream_url,
            payload.objective,
            current,
            total,
            percentage(current, total)
        );
    }

    fn update(&self, current: u32, total: u32, payload: &RenderPayload) {
        if !self.changed(current, total, &payload.objective) {
            return;
        }
        info!(
            "📊 {}: {}/{} min ({:.0}%) on {} [viewers: {}, uptime: {}]",
            payload.objective,
            current,
            total,
            percentage(current, total),
            payload.stream_url,
            payload
                .viewer_count
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string()),
            payload.uptime.as_deref().unwrap_or("?")
        );
    }

    fn stop(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_updates_are_collapsed() {
        let renderer = ConsoleRenderer::new();
        assert!(renderer.changed(1, 60, "Hat"));
        assert!(!renderer.changed(1, 60, "Hat"));
        assert!(renderer.changed(2, 60, "Hat"));
        renderer.stop();
        assert!(renderer.changed(2, 60, "Hat"));
    }

    #[test]
    fn test_percentage_handles_zero_total() {
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(30, 60), 50.0);
        assert_eq!(percentage(90, 60), 100.0);
    }
}
