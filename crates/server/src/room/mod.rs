use crate::error::{ServerError, ServerResult};
use crate::ids::UserId;
use crate::user::User;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quill_proto::Frame;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;

pub mod group;
pub mod permission;
pub mod private;

/// Cadence of the retention sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Messages older than this are erased by the sweep.
pub const RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    Tip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub sender: UserId,
    pub text: String,
    pub kind: MessageKind,
    pub recipient: Option<UserId>,
}

/// Time-indexed message history shared by group and private rooms.
///
/// Keys are strictly monotonic: an append colliding with an existing
/// timestamp advances nanosecond by nanosecond until the key is unique.
/// Range queries are half-open `[from, to)`.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: BTreeMap<DateTime<Utc>, MessageRecord>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts at `at` or the first free instant after it; returns the key
    /// actually used.
    pub fn append(&mut self, at: DateTime<Utc>, record: MessageRecord) -> DateTime<Utc> {
        let mut key = at;
        while self.entries.contains_key(&key) {
            key += ChronoDuration::nanoseconds(1);
        }
        self.entries.insert(key, record);
        key
    }

    /// All entries with `from <= key < to`; empty when `from > to`.
    pub fn range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, MessageRecord)> {
        if from > to {
            return Vec::new();
        }
        self.entries
            .range(from..to)
            .map(|(key, record)| (*key, record.clone()))
            .collect()
    }

    /// Erases everything strictly older than `cutoff`; returns the count.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let keep = self.entries.split_off(&cutoff);
        let removed = self.entries.len();
        self.entries = keep;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawns the periodic retention sweep over a shared log. The task is
/// cancellable through its handle; cancellation is silent.
pub(crate) fn spawn_retention(log: Arc<RwLock<MessageLog>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        // First tick completes immediately; skip it so the initial sweep
        // happens one interval after room creation.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - ChronoDuration::days(RETENTION_DAYS);
            log.write().await.prune_older_than(cutoff);
        }
    })
}

/// Membership of live user handles a room fans messages out to.
///
/// Users are held weakly; the registry owns them. A member whose `Arc` is
/// gone is simply skipped during delivery.
#[derive(Debug, Default)]
pub struct Broadcast {
    members: RwLock<HashMap<UserId, Weak<User>>>,
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, user: &Arc<User>) {
        self.members
            .write()
            .await
            .entry(user.id())
            .or_insert_with(|| Arc::downgrade(user));
    }

    pub async fn leave(&self, user: UserId) {
        self.members.write().await.remove(&user);
    }

    pub async fn contains(&self, user: UserId) -> bool {
        self.members.read().await.contains_key(&user)
    }

    /// Delivers `bytes` to every live connection of every member.
    pub async fn send_to_all(&self, bytes: &[u8]) {
        let members = self.members.read().await;
        for user in members.values() {
            if let Some(user) = user.upgrade() {
                user.notify_all(bytes).await;
            }
        }
    }

    /// Delivers `bytes` to one member only.
    pub async fn send_to_one(&self, user: UserId, bytes: &[u8]) -> ServerResult<()> {
        let members = self.members.read().await;
        let target = members
            .get(&user)
            .and_then(Weak::upgrade)
            .ok_or(ServerError::UserNotFound)?;
        target.notify_all(bytes).await;
        Ok(())
    }
}

/// Wraps a JSON notification in a `Text` frame the way every room delivery
/// path does.
pub fn encode_text_notification(value: &serde_json::Value) -> Vec<u8> {
    Frame::text(0, value.to_string().into_bytes()).encode()
}
