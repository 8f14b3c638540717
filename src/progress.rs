//! Progress reporting for long-running jobs
//!
//! Each job publishes [`ProgressEvent`]s under a session id. Any number of
//! subscribers (SSE connections, the CLI) can follow a session; publishing
//! to a session nobody follows only logs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    LoadingData,
    Embedding,
    EntitySkipped,
    Storing,
    Complete,
    Error,
}

impl ProgressKind {
    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressKind::Complete | ProgressKind::Error)
    }
}

/// One progress update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    /// Percentage complete, 0 to 100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: String,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            progress: None,
            data: serde_json::Value::Null,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_progress(mut self, done: usize, total: usize) -> Self {
        self.progress = Some(percent(done, total));
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// One session: its channel and, once finished, the terminal event
struct Channel {
    tx: broadcast::Sender<ProgressEvent>,
    finished: Mutex<Option<ProgressEvent>>,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
            finished: Mutex::new(None),
        }
    }

    fn subscribe(&self) -> Subscription {
        // Held across subscribe so a concurrent terminal event is either
        // recorded here or delivered to the new receiver
        let finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        match finished.as_ref() {
            Some(event) => Subscription {
                rx: None,
                replay: Some(event.clone()),
            },
            None => Subscription {
                rx: Some(self.tx.subscribe()),
                replay: None,
            },
        }
    }

    fn publish(&self, event: ProgressEvent) {
        let mut finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        if event.kind.is_terminal() {
            *finished = Some(event.clone());
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

/// Registry of progress channels keyed by session id
pub struct ProgressRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    capacity: usize,
}

impl ProgressRegistry {
    /// `capacity` events are buffered per session for slow subscribers
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Fresh random session id
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn channel(&self, session: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session)
            .cloned()
    }

    fn channel_or_insert(&self, session: &str) -> Arc<Channel> {
        if let Some(channel) = self.channel(session) {
            return channel;
        }
        let capacity = self.capacity;
        Arc::clone(
            self.channels
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry(session.to_string())
                .or_insert_with(|| Arc::new(Channel::new(capacity))),
        )
    }

    /// Create `session`; false if it already exists
    pub fn register(&self, session: &str) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if channels.contains_key(session) {
            return false;
        }
        channels.insert(session.to_string(), Arc::new(Channel::new(self.capacity)));
        true
    }

    /// Follow an existing session; `None` for ids never registered or already removed.
    ///
    /// A session that has finished replays its terminal event and ends.
    pub fn subscribe(&self, session: &str) -> Option<Subscription> {
        self.channel(session).map(|channel| channel.subscribe())
    }

    /// Follow a session, creating it if needed
    pub fn open(&self, session: &str) -> Subscription {
        self.channel_or_insert(session).subscribe()
    }

    /// Handle for publishing to `session`, creating it if needed
    pub fn emitter(&self, session: &str) -> ProgressEmitter {
        ProgressEmitter {
            session: session.to_string(),
            channel: Some(self.channel_or_insert(session)),
        }
    }

    /// Drop a session; open subscriptions end once its emitters are gone
    pub fn remove(&self, session: &str) -> bool {
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.channels.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether `session` has published its terminal event
    pub fn is_finished(&self, session: &str) -> bool {
        self.channel(session).is_some_and(|channel| {
            channel
                .finished
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
        })
    }

    /// Current subscribers of `session`
    pub fn subscriber_count(&self, session: &str) -> usize {
        self.channel(session)
            .map(|channel| channel.tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Receiving end of one session; yields nothing after the terminal event
pub struct Subscription {
    rx: Option<broadcast::Receiver<ProgressEvent>>,
    replay: Option<ProgressEvent>,
}

impl Subscription {
    fn deliver(&mut self, event: ProgressEvent) -> ProgressEvent {
        if event.kind.is_terminal() {
            self.rx = None;
        }
        event
    }

    /// Next event; `None` once the session finished or was dropped
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.rx.as_mut()?.recv().await {
                Ok(event) => return Some(self.deliver(event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Progress subscriber lagged; {} events dropped", skipped);
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.rx.as_mut()?.try_recv() {
                Ok(event) => return Some(self.deliver(event)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Publisher bound to one session
#[derive(Clone)]
pub struct ProgressEmitter {
    session: String,
    channel: Option<Arc<Channel>>,
}

impl ProgressEmitter {
    /// Emitter that only logs
    pub fn detached() -> Self {
        Self {
            session: String::new(),
            channel: None,
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn emit(&self, event: ProgressEvent) {
        tracing::debug!(
            session = %self.session,
            kind = ?event.kind,
            progress = ?event.progress,
            "{}",
            event.message
        );
        if let Some(channel) = &self.channel {
            channel.publish(event);
        }
    }
}
