//! Unread notifications with optimistic read marking.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use threatscope_core::Notification;
use threatscope_gateway::{AnalysisGateway, GatewayError};
use threatscope_ui::unread_badge;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ReadFailurePolicy;

/// One notification with its local read marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEntry {
    /// Server record.
    pub notification: Notification,
    /// `true` once marked read locally.
    pub read: bool,
}

/// Immutable notification state published by [`NotificationCenter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSnapshot {
    /// Most recent unread notifications, at most the configured limit.
    pub entries: Arc<[NotificationEntry]>,
    /// Unread count with local read markers applied.
    pub unread_count: u64,
    /// Message of the last failed refresh or mark-read.
    pub last_error: Option<String>,
}

impl Default for NotificationSnapshot {
    fn default() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
            unread_count: 0,
            last_error: None,
        }
    }
}

impl NotificationSnapshot {
    /// Badge text for the unread count.
    pub fn badge(&self) -> Option<String> {
        unread_badge(self.unread_count)
    }
}

#[derive(Debug, Default)]
struct Inbox {
    items: Vec<Notification>,
    read: BTreeSet<String>,
    pending: BTreeSet<String>,
    unread_count: u64,
    last_error: Option<String>,
}

impl Inbox {
    fn snapshot(&self) -> NotificationSnapshot {
        let entries: Vec<NotificationEntry> = self
            .items
            .iter()
            .map(|notification| NotificationEntry {
                read: self.read.contains(&notification.id),
                notification: notification.clone(),
            })
            .collect();

        NotificationSnapshot {
            entries: Arc::from(entries),
            unread_count: self.unread_count,
            last_error: self.last_error.clone(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|notification| notification.id == id)
    }
}

struct Shared {
    inbox: Mutex<Inbox>,
    state: watch::Sender<NotificationSnapshot>,
}

impl Shared {
    /// Applies `change` and publishes the result under the same lock.
    fn update<R>(&self, change: impl FnOnce(&mut Inbox) -> R) -> R {
        let mut inbox = self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let output = change(&mut inbox);
        self.state.send_replace(inbox.snapshot());
        output
    }

    fn inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Unread notifications and their read state.
///
/// Read marking is optimistic: the marker and count change synchronously and
/// the server call runs in the background.
pub struct NotificationCenter {
    gateway: Arc<dyn AnalysisGateway>,
    limit: usize,
    policy: ReadFailurePolicy,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("limit", &self.limit)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl NotificationCenter {
    /// Creates an empty center keeping at most `limit` notifications.
    pub fn new(gateway: Arc<dyn AnalysisGateway>, limit: usize, policy: ReadFailurePolicy) -> Self {
        let (state, _) = watch::channel(NotificationSnapshot::default());
        Self {
            gateway,
            limit,
            policy,
            shared: Arc::new(Shared {
                inbox: Mutex::new(Inbox::default()),
                state,
            }),
        }
    }

    /// Subscribes to snapshots.
    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.shared.state.subscribe()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> NotificationSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Fetches unread notifications and reconciles them with pending reads.
    ///
    /// Items whose mark-read call has not completed stay read and are not
    /// counted.
    ///
    /// # Errors
    /// Returns the gateway error; the current list is kept and the message is
    /// recorded in the snapshot.
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let unread = match self.gateway.unread_notifications().await {
            Ok(unread) => unread,
            Err(error) => {
                warn!(stage = "notifications", action = "refresh", error = %error, "refresh failed");
                let message = error.user_message();
                self.shared.update(|inbox| inbox.last_error = Some(message));
                return Err(error);
            }
        };

        let limit = self.limit;
        self.shared.update(|inbox| {
            let mut items = unread.notifications;
            items.truncate(limit);

            let pending_listed = items
                .iter()
                .filter(|notification| inbox.pending.contains(&notification.id))
                .count() as u64;

            inbox.read = inbox.pending.clone();
            inbox.items = items;
            inbox.unread_count = unread.unread_count.saturating_sub(pending_listed);
            inbox.last_error = None;
            debug!(stage = "notifications", action = "refresh", unread = inbox.unread_count, "notifications refreshed");
        });
        Ok(())
    }

    /// Marks `id` read.
    ///
    /// Returns `None` without contacting the server when `id` is unknown or
    /// already read. Otherwise returns the handle of the background server
    /// call.
    pub fn mark_read(&self, id: &str) -> Option<JoinHandle<()>> {
        let marked = self.shared.update(|inbox| {
            if !inbox.contains(id) || !inbox.read.insert(id.to_string()) {
                return false;
            }
            inbox.pending.insert(id.to_string());
            inbox.unread_count = inbox.unread_count.saturating_sub(1);
            true
        });
        if !marked {
            debug!(stage = "notifications", action = "mark_read", id, "already read or unknown");
            return None;
        }

        let gateway = Arc::clone(&self.gateway);
        let shared = Arc::clone(&self.shared);
        let policy = self.policy;
        let id = id.to_string();

        Some(tokio::spawn(async move {
            let outcome = gateway.mark_notification_read(&id).await;
            shared.update(|inbox| {
                inbox.pending.remove(&id);
                let Err(error) = outcome else {
                    return;
                };

                warn!(stage = "notifications", action = "mark_read", id = %id, error = %error, policy = ?policy, "mark read failed");
                inbox.last_error = Some(error.user_message());
                if policy == ReadFailurePolicy::Revert && inbox.contains(&id) && inbox.read.remove(&id) {
                    inbox.unread_count = inbox.unread_count.saturating_add(1);
                }
            });
        }))
    }

    /// Normalized navigation path of notification `id`.
    pub fn navigation_target(&self, id: &str) -> Option<String> {
        self.shared
            .inbox()
            .items
            .iter()
            .find(|notification| notification.id == id)
            .map(Notification::target_path)
    }
}
