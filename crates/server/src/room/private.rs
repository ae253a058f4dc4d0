use crate::error::{ServerError, ServerResult};
use crate::ids::{GroupId, UserId};
use crate::room::{
    Broadcast, MessageKind, MessageLog, MessageRecord, encode_text_notification, spawn_retention,
};
use crate::user::User;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// One-to-one room. Membership is the pair fixed at construction; the log
/// and retention behave exactly like a group room's.
pub struct PrivateRoom {
    id: GroupId,
    users: (UserId, UserId),
    usable: AtomicBool,
    log: Arc<RwLock<MessageLog>>,
    broadcast: Broadcast,
    retention: StdMutex<Option<JoinHandle<()>>>,
}

impl PrivateRoom {
    pub(crate) async fn create(id: GroupId, first: &Arc<User>, second: &Arc<User>) -> Arc<Self> {
        let room = Arc::new(Self {
            id,
            users: (first.id(), second.id()),
            usable: AtomicBool::new(true),
            log: Arc::new(RwLock::new(MessageLog::new())),
            broadcast: Broadcast::new(),
            retention: StdMutex::new(None),
        });
        room.broadcast.join(first).await;
        room.broadcast.join(second).await;
        if let Ok(mut retention) = room.retention.lock() {
            *retention = Some(spawn_retention(Arc::clone(&room.log)));
        }
        room
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn users(&self) -> (UserId, UserId) {
        self.users
    }

    pub fn has_member(&self, user: UserId) -> bool {
        self.users.0 == user || self.users.1 == user
    }

    fn ensure_usable(&self) -> ServerResult<()> {
        if self.usable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ServerError::GroupRoomUnusable)
        }
    }

    async fn store_and_emit(
        &self,
        sender: UserId,
        text: &str,
        kind: MessageKind,
        notification_type: &str,
    ) -> ServerResult<()> {
        self.ensure_usable()?;
        if !self.has_member(sender) {
            return Err(ServerError::UserNotFound);
        }
        self.log.write().await.append(
            Utc::now(),
            MessageRecord {
                sender,
                text: text.to_string(),
                kind,
                recipient: None,
            },
        );
        let bytes = encode_text_notification(&json!({
            "type": notification_type,
            "data": {
                "user_id": sender,
                "message": text,
            },
        }));
        self.broadcast.send_to_all(&bytes).await;
        Ok(())
    }

    /// Stores and delivers a message to both members.
    pub async fn send_message(&self, text: &str, sender: UserId) -> ServerResult<()> {
        self.store_and_emit(sender, text, MessageKind::Normal, "private_message")
            .await
    }

    /// System tip message delivered to both members.
    pub async fn send_tip_message(&self, text: &str, sender: UserId) -> ServerResult<()> {
        self.store_and_emit(sender, text, MessageKind::Tip, "private_tip_message")
            .await
    }

    /// Stable snapshot of history in `[from, to)`.
    pub async fn messages_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServerResult<Vec<(DateTime<Utc>, MessageRecord)>> {
        self.ensure_usable()?;
        Ok(self.log.read().await.range(from, to))
    }

    pub(crate) fn shut_down(&self) {
        self.usable.store(false, Ordering::Release);
        if let Ok(mut retention) = self.retention.lock() {
            if let Some(handle) = retention.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for PrivateRoom {
    fn drop(&mut self) {
        self.shut_down();
    }
}
