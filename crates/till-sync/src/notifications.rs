//! # Operator Notifications
//!
//! Messages for the person at the till. Every notification stays in the
//! list until it is dismissed; new ones are also broadcast as they happen.
//!
//! | Kind                 | Raised when                                   |
//! |----------------------|-----------------------------------------------|
//! | `SaleConfirmed`      | the server recorded a sale at submit time     |
//! | `SalePendingSync`    | a sale was stored locally for later sync      |
//! | `SaleRejected`       | the server refused a sale; nothing queued     |
//! | `SyncExhausted`      | an offline sale ran out of automatic retries  |
//! | `PersistenceFailure` | the local store could not save a sale         |

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SaleConfirmed,
    SalePendingSync,
    SaleRejected,
    SyncExhausted,
    PersistenceFailure,
}

impl NotificationKind {
    /// Needs an operator decision rather than just acknowledgement.
    pub fn needs_attention(self) -> bool {
        matches!(
            self,
            NotificationKind::SaleRejected
                | NotificationKind::SyncExhausted
                | NotificationKind::PersistenceFailure
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub message: String,
    /// Client sale id the notification is about, if any.
    pub sale_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Dismissable notification list.
pub struct NotificationCenter {
    next_id: AtomicU64,
    list_tx: watch::Sender<Vec<Notification>>,
    events_tx: broadcast::Sender<Notification>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        let (list_tx, _) = watch::channel(Vec::new());
        let (events_tx, _) = broadcast::channel(64);
        NotificationCenter {
            next_id: AtomicU64::new(1),
            list_tx,
            events_tx,
        }
    }

    /// Adds a notification and broadcasts it.
    pub fn push(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        sale_id: Option<String>,
    ) -> Notification {
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind,
            message: message.into(),
            sale_id,
            created_at: Utc::now(),
        };

        self.list_tx
            .send_modify(|list| list.push(notification.clone()));
        let _ = self.events_tx.send(notification.clone());
        notification
    }

    /// Removes a notification. Returns `false` if it was not there.
    pub fn dismiss(&self, id: u64) -> bool {
        self.list_tx.send_if_modified(|list| {
            let before = list.len();
            list.retain(|n| n.id != id);
            list.len() != before
        })
    }

    /// Current notifications, oldest first.
    pub fn list(&self) -> Vec<Notification> {
        self.list_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Notification>> {
        self.list_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events_tx.subscribe()
    }
}
