use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::models::stream::SessionEvent;
use crate::services::session_inbox::{EventSource, SessionInbox};

const PUBSUB_URL: &str = "wss://pubsub-edge.twitch.tv/v1";

enum Subscription {
    Listen(String),
    Unlisten(String),
}

#[derive(Default)]
struct Attachment {
    channel_id: Option<String>,
    inbox: Option<Arc<SessionInbox>>,
}

fn channel_topic(channel_id: &str) -> String {
    format!("video-playback-by-id.{}", channel_id)
}

/// Twitch PubSub client routing drop and playback events into the attached session.
pub struct DropsWebSocketService {
    attachment: Arc<RwLock<Attachment>>,
    commands: mpsc::UnboundedSender<Subscription>,
    command_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Subscription>>>,
}

impl DropsWebSocketService {
    pub fn new() -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        Self {
            attachment: Arc::new(RwLock::new(Attachment::default())),
            commands,
            command_rx: std::sync::Mutex::new(Some(command_rx)),
        }
    }

    /// Spawn the connection task. Reconnects forever with a 5 second pause.
    pub fn connect(&self, user_id: &str, access_token: &str) -> Result<()> {
        let Some(mut command_rx) = self.command_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            return Err(anyhow::anyhow!("PubSub connection already started"));
        };

        let attachment = self.attachment.clone();
        let user_id = user_id.to_string();
        let access_token = access_token.to_string();

        tokio::spawn(async move {
            loop {
                match Self::websocket_loop(&user_id, &access_token, &attachment, &mut command_rx)
                    .await
                {
                    Ok(_) => info!("[PubSub] WebSocket disconnected normally"),
                    Err(e) => error!("[PubSub] WebSocket error: {}", e),
                }

                info!("[PubSub] Reconnecting WebSocket in 5 seconds...");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });

        Ok(())
    }

    fn listen_message(topics: &[String], access_token: &str, listen: bool) -> Message {
        let message = json!({
            "type": if listen { "LISTEN" } else { "UNLISTEN" },
            "nonce": uuid::Uuid::new_v4().to_string(),
            "data": {
                "topics": topics,
                "auth_token": access_token
            }
        });
        Message::Text(message.to_string().into())
    }

    async fn websocket_loop(
        user_id: &str,
        access_token: &str,
        attachment: &Arc<RwLock<Attachment>>,
        command_rx: &mut mpsc::UnboundedReceiver<Subscription>,
    ) -> Result<()> {
        info!("[PubSub] Connecting to Twitch PubSub WebSocket...");
        let (ws_stream, _) = connect_async(PUBSUB_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        let topics = Self::initial_topics(user_id, attachment, command_rx);
        debug!("[PubSub] Subscribing to topics: {:?}", topics);
        write
            .send(Self::listen_message(&topics, access_token, true))
            .await?;

        let mut ping_interval = tokio::time::interval(Duration::from_secs(240)); // 4 minutes

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    write.send(Message::Text(json!({"type": "PING"}).to_string().into())).await?;
                    debug!("[PubSub] Sent PING");
                }

                command = command_rx.recv() => {
                    let Some(command) = command else {
                        return Ok(());
                    };
                    let (topic, listen) = match command {
                        Subscription::Listen(topic) => (topic, true),
                        Subscription::Unlisten(topic) => (topic, false),
                    };
                    write.send(Self::listen_message(&[topic], access_token, listen)).await?;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(data) = serde_json::from_str::<Value>(&text) {
                                if data["type"].as_str() == Some("RECONNECT") {
                                    info!("[PubSub] Server requested reconnect");
                                    return Ok(());
                                }
                                Self::handle_message(&data, attachment);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("[PubSub] WebSocket closed by server");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }

    /// Topics for a fresh connection. The attachment already reflects every
    /// queued command, so commands left over from a dropped connection are
    /// discarded instead of being replayed.
    fn initial_topics(
        user_id: &str,
        attachment: &Arc<RwLock<Attachment>>,
        command_rx: &mut mpsc::UnboundedReceiver<Subscription>,
    ) -> Vec<String> {
        let mut stale = 0;
        while command_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("[PubSub] Dropped {} queued subscription changes", stale);
        }

        let mut topics = vec![format!("user-drop-events.{}", user_id)];
        let attached_channel = attachment.read().ok().and_then(|a| a.channel_id.clone());
        if let Some(channel_id) = attached_channel {
            topics.push(channel_topic(&channel_id));
        }
        topics
    }

    fn handle_message(message: &Value, attachment: &Arc<RwLock<Attachment>>) {
        match message["type"].as_str().unwrap_or("") {
            "MESSAGE" => {
                let topic = message["data"]["topic"].as_str().unwrap_or("");
                let Some(payload) = message["data"]["message"]
                    .as_str()
                    .and_then(|m| serde_json::from_str::<Value>(m).ok())
                else {
                    return;
                };

                let Some(event) = parse_topic_message(topic, &payload) else {
                    return;
                };
                let Ok(attachment) = attachment.read() else {
                    return;
                };
                // Playback events only count for the channel being watched
                if topic.starts_with("video-playback-by-id.") {
                    let expected = attachment.channel_id.as_deref().map(channel_topic);
                    if expected.as_deref() != Some(topic) {
                        return;
                    }
                }
                if let Some(inbox) = attachment.inbox.as_ref() {
                    inbox.push(event);
                }
            }
            "RESPONSE" => {
                if let Some(error) = message["error"].as_str().filter(|e| !e.is_empty()) {
                    warn!("[PubSub] RESPONSE error: {}", error);
                }
            }
            "PONG" => debug!("[PubSub] Received PONG"),
            other => debug!("[PubSub] Unknown message type: {}", other),
        }
    }
}

impl Default for DropsWebSocketService {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for DropsWebSocketService {
    fn attach(&self, channel_id: &str, inbox: Arc<SessionInbox>) {
        let previous = match self.attachment.write() {
            Ok(mut attachment) => {
                let previous = attachment.channel_id.replace(channel_id.to_string());
                attachment.inbox = Some(inbox);
                previous
            }
            Err(_) => return,
        };
        if let Some(previous) = previous.filter(|p| p != channel_id) {
            let _ = self.commands.send(Subscription::Unlisten(channel_topic(&previous)));
        }
        let _ = self.commands.send(Subscription::Listen(channel_topic(channel_id)));
    }

    fn detach(&self) {
        let previous = match self.attachment.write() {
            Ok(mut attachment) => {
                attachment.inbox = None;
                attachment.channel_id.take()
            }
            Err(_) => return,
        };
        if let Some(previous) = previous {
            let _ = self.commands.send(Subscription::Unlisten(channel_topic(&previous)));
        }
    }
}

fn as_u32(value: &Value) -> u32 {
    value.as_u64().unwrap_or(0).min(u32::MAX as u64) as u32
}

/// Map a PubSub topic payload to a session event.
pub fn parse_topic_message(topic: &str, message: &Value) -> Option<SessionEvent> {
    let msg_type = message["type"].as_str()?;

    if topic.starts_with("user-drop-events.") {
        match msg_type {
            "drop-progress" => Some(SessionEvent::DropProgress {
                drop_id: message["data"]["drop_id"].as_str()?.to_string(),
                current_minutes: as_u32(&message["data"]["current_progress_min"]),
                required_minutes: as_u32(&message["data"]["required_progress_min"]),
            }),
            "drop-claim" => Some(SessionEvent::DropClaimReady {
                drop_id: message["data"]["drop_id"].as_str()?.to_string(),
                drop_instance_id: message["data"]["drop_instance_id"].as_str()?.to_string(),
            }),
            _ => None,
        }
    } else if topic.starts_with("video-playback-by-id.") {
        match msg_type {
            "viewcount" => Some(SessionEvent::ViewCount(as_u32(&message["viewers"]))),
            "stream-down" => Some(SessionEvent::StreamDown),
            _ => None,
        }
    } else {
        None
    }
}
