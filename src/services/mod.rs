pub mod campaign_queue;
pub mod catalog_watchdog;
pub mod diagnostic_logger;
pub mod drop_lookup;
pub mod drops_auth_service;
pub mod drops_client;
pub mod drops_service;
pub mod drops_websocket_service;
pub mod mining_service;
pub mod preemption;
pub mod progress_renderer;
pub mod progress_tracker;
pub mod session_driver;
pub mod session_inbox;
pub mod stream_blacklist;
pub mod watch_session;

#[cfg(test)]
pub(crate) mod testing;
