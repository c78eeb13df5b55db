// Live donation status updates: per-order watchers plus a feed of every change

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::models::DonationStatus;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600); // 1 hour

/// Update message sent to watchers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationStatusUpdate {
    pub order_id: String,
    pub status: DonationStatus,
    pub message: Option<String>,
}

struct WatchSession {
    tx: broadcast::Sender<DonationStatusUpdate>,
    created_at: Instant,
    last_event_id: Option<String>,
}

impl WatchSession {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            tx,
            created_at: Instant::now(),
            last_event_id: None,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

pub struct DonationState {
    sessions: Arc<RwLock<HashMap<String, WatchSession>>>,
    feed: broadcast::Sender<DonationStatusUpdate>,
    session_ttl: Duration,
}

impl DonationState {
    pub fn new() -> Self {
        let (feed, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            feed,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Register a watcher for one order and return its receiver
    pub async fn register_waiter(&self, order_id: &str) -> broadcast::Receiver<DonationStatusUpdate> {
        let mut sessions = self.sessions.write().await;

        // Clean up expired sessions opportunistically
        self.cleanup_expired_sessions(&mut sessions);

        let session = sessions.entry(order_id.to_string()).or_insert_with(|| {
            debug!(order_id = %order_id, "Registering new donation watch session");
            WatchSession::new()
        });
        session.tx.subscribe()
    }

    /// Receive every update regardless of order
    pub fn subscribe(&self) -> broadcast::Receiver<DonationStatusUpdate> {
        self.feed.subscribe()
    }

    /// Publish an update to the order's watchers and the global feed.
    /// Returns the number of order watchers reached; a repeated `event_id`
    /// for the same order is dropped.
    pub async fn publish_status(
        &self,
        order_id: &str,
        status: DonationStatus,
        message: Option<String>,
        event_id: Option<&str>,
    ) -> usize {
        let mut sessions = self.sessions.write().await;

        if let Some(session) = sessions.get(order_id) {
            if let (Some(event_id), Some(last)) = (event_id, &session.last_event_id) {
                if event_id == last {
                    debug!(order_id = %order_id, event_id = %event_id, "Skipping duplicate event");
                    return 0;
                }
            }
        }

        let update = DonationStatusUpdate {
            order_id: order_id.to_string(),
            status,
            message,
        };
        // no feed subscribers is normal
        let _ = self.feed.send(update.clone());

        let Some(session) = sessions.get_mut(order_id) else {
            debug!(order_id = %order_id, "No watcher for donation status update");
            return 0;
        };
        if let Some(event_id) = event_id {
            session.last_event_id = Some(event_id.to_string());
        }

        match session.tx.send(update) {
            Ok(count) => {
                debug!(order_id = %order_id, receivers = count, "Published donation status update");
                count
            }
            Err(_) => 0,
        }
    }

    #[cfg(test)]
    pub async fn has_session(&self, order_id: &str) -> bool {
        self.sessions.read().await.contains_key(order_id)
    }

    fn cleanup_expired_sessions(&self, sessions: &mut HashMap<String, WatchSession>) {
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.is_expired(self.session_ttl))
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            sessions.remove(&id);
            debug!(order_id = %id, "Cleaned up expired donation watch session");
        }
    }
}

impl Default for DonationState {
    fn default() -> Self {
        Self::new()
    }
}
