use crate::error::{ServerError, ServerResult};
use crate::ids::{GroupId, UserId};
use crate::registry::Registry;
use crate::room::permission::{PermissionLevel, PermissionTable};
use crate::room::{
    Broadcast, MessageKind, MessageLog, MessageRecord, encode_text_notification, spawn_retention,
};
use crate::user::User;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub const MIN_MEMBER_LEVEL: u8 = 1;
pub const MAX_MEMBER_LEVEL: u8 = 100;

/// Per-member state: display name captured from the user profile and a
/// numeric level within `[MIN_MEMBER_LEVEL, MAX_MEMBER_LEVEL]`.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub nickname: String,
    level: u8,
}

impl MemberInfo {
    fn new(nickname: String) -> Self {
        Self {
            nickname,
            level: MIN_MEMBER_LEVEL,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn set_level(&mut self, level: u8) -> ServerResult<()> {
        if !(MIN_MEMBER_LEVEL..=MAX_MEMBER_LEVEL).contains(&level) {
            return Err(ServerError::GroupUserLevelInvalid);
        }
        self.level = level;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct MuteEntry {
    since: DateTime<Utc>,
    duration: ChronoDuration,
}

/// Many-to-many room: membership, permissions, mutes, a time-indexed message
/// log with a retention sweep, and administrative moderation.
pub struct GroupRoom {
    id: GroupId,
    administrator: RwLock<UserId>,
    usable: AtomicBool,
    members: RwLock<HashMap<UserId, MemberInfo>>,
    permissions: PermissionTable,
    muted: RwLock<HashMap<UserId, MuteEntry>>,
    log: Arc<RwLock<MessageLog>>,
    broadcast: Broadcast,
    retention: StdMutex<Option<JoinHandle<()>>>,
}

impl GroupRoom {
    /// Creates the room with `admin` as sole member at Administrator level
    /// and starts the retention sweep.
    pub(crate) async fn create(id: GroupId, admin: &Arc<User>) -> Arc<Self> {
        let room = Arc::new(Self {
            id,
            administrator: RwLock::new(admin.id()),
            usable: AtomicBool::new(true),
            members: RwLock::new(HashMap::new()),
            permissions: PermissionTable::new(),
            muted: RwLock::new(HashMap::new()),
            log: Arc::new(RwLock::new(MessageLog::new())),
            broadcast: Broadcast::new(),
            retention: StdMutex::new(None),
        });
        room.members
            .write()
            .await
            .insert(admin.id(), MemberInfo::new(admin.name().await));
        room.permissions
            .modify_user_level(admin.id(), PermissionLevel::Administrator)
            .await;
        room.broadcast.join(admin).await;
        if let Ok(mut retention) = room.retention.lock() {
            *retention = Some(spawn_retention(Arc::clone(&room.log)));
        }
        room
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub async fn administrator(&self) -> UserId {
        *self.administrator.read().await
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    fn ensure_usable(&self) -> ServerResult<()> {
        if self.usable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ServerError::GroupRoomUnusable)
        }
    }

    pub async fn has_member(&self, user: UserId) -> bool {
        self.members.read().await.contains_key(&user)
    }

    pub async fn member_ids(&self) -> Vec<UserId> {
        self.members.read().await.keys().copied().collect()
    }

    pub async fn nickname_of(&self, user: UserId) -> ServerResult<String> {
        self.members
            .read()
            .await
            .get(&user)
            .map(|member| member.nickname.clone())
            .ok_or(ServerError::UserNotFound)
    }

    pub async fn level_of(&self, user: UserId) -> ServerResult<u8> {
        self.members
            .read()
            .await
            .get(&user)
            .map(MemberInfo::level)
            .ok_or(ServerError::UserNotFound)
    }

    /// Adds `user` at Default level, capturing the display name from the
    /// profile, and joins the broadcast set.
    pub async fn add_member(&self, registry: &Registry, user: UserId) -> ServerResult<()> {
        self.ensure_usable()?;
        let handle = registry.get_user(user).await?;
        {
            let mut members = self.members.write().await;
            if !members.contains_key(&user) {
                members.insert(user, MemberInfo::new(handle.name().await));
            }
        }
        self.permissions
            .modify_user_level(user, PermissionLevel::Default)
            .await;
        self.broadcast.join(&handle).await;
        Ok(())
    }

    /// Removes a non-administrator member together with any mute entry and
    /// permission level. Removing the administrator is forbidden; callers
    /// dissolve the room instead.
    pub async fn remove_member(&self, user: UserId) -> ServerResult<()> {
        self.ensure_usable()?;
        if self.administrator().await == user {
            return Err(ServerError::NoPermission);
        }
        self.members.write().await.remove(&user);
        self.muted.write().await.remove(&user);
        let _ = self.permissions.remove_user(user).await;
        self.broadcast.leave(user).await;
        Ok(())
    }

    /// Lazy mute sweep: expired entries are deleted on the next attempt.
    async fn sender_is_muted(&self, user: UserId) -> bool {
        let expired = {
            let muted = self.muted.read().await;
            match muted.get(&user) {
                None => return false,
                Some(entry) => entry.since + entry.duration < Utc::now(),
            }
        };
        if expired {
            self.muted.write().await.remove(&user);
            return false;
        }
        true
    }

    async fn store_and_emit(
        &self,
        sender: UserId,
        text: &str,
        kind: MessageKind,
        recipient: Option<UserId>,
        notification_type: &str,
    ) -> ServerResult<()> {
        self.log.write().await.append(
            Utc::now(),
            MessageRecord {
                sender,
                text: text.to_string(),
                kind,
                recipient,
            },
        );
        let bytes = encode_text_notification(&json!({
            "type": notification_type,
            "data": {
                "user_id": sender,
                "group_id": self.id,
                "message": text,
            },
        }));
        match recipient {
            Some(user) => self.broadcast.send_to_one(user, &bytes).await?,
            None => self.broadcast.send_to_all(&bytes).await,
        }
        Ok(())
    }

    /// Stores and fans out a normal message. A muted sender's message is
    /// accepted and silently dropped.
    pub async fn send_message(&self, sender: UserId, text: &str) -> ServerResult<()> {
        self.ensure_usable()?;
        if !self.has_member(sender).await {
            return Err(ServerError::UserNotFound);
        }
        if self.sender_is_muted(sender).await {
            return Ok(());
        }
        self.store_and_emit(sender, text, MessageKind::Normal, None, "group_message")
            .await
    }

    /// System tip message visible to the whole room.
    pub async fn send_tip_message(&self, sender: UserId, text: &str) -> ServerResult<()> {
        self.ensure_usable()?;
        if !self.has_member(sender).await {
            return Err(ServerError::UserNotFound);
        }
        if self.sender_is_muted(sender).await {
            return Ok(());
        }
        self.store_and_emit(sender, text, MessageKind::Tip, None, "group_tip_message")
            .await
    }

    /// Tip message delivered to a single member only.
    pub async fn send_user_tip_message(
        &self,
        sender: UserId,
        text: &str,
        recipient: UserId,
    ) -> ServerResult<()> {
        self.ensure_usable()?;
        if !self.has_member(recipient).await {
            return Err(ServerError::UserNotFound);
        }
        if self.sender_is_muted(sender).await {
            return Ok(());
        }
        self.store_and_emit(
            sender,
            text,
            MessageKind::Tip,
            Some(recipient),
            "group_tip_message",
        )
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

    /// Both parties must be members and distinct.
    async fn moderation_guard(&self, executor: UserId, user: UserId) -> ServerResult<()> {
        self.ensure_usable()?;
        if executor == user {
            return Err(ServerError::NoPermission);
        }
        if !self.has_member(executor).await || !self.has_member(user).await {
            return Err(ServerError::UserNotFound);
        }
        Ok(())
    }

    /// Mute/unmute/kick require a strictly higher permission level.
    async fn require_seniority(&self, executor: UserId, user: UserId) -> ServerResult<()> {
        let executor_level = self.permissions.user_level(executor).await?;
        let user_level = self.permissions.user_level(user).await?;
        if user_level >= executor_level {
            return Err(ServerError::NoPermission);
        }
        Ok(())
    }

    async fn narrate(&self, executor: UserId, user: UserId, verb: &str) -> ServerResult<()> {
        let text = format!(
            "{} was {} by {}",
            self.nickname_of(user).await?,
            verb,
            self.nickname_of(executor).await?
        );
        self.send_tip_message(executor, &text).await
    }

    pub async fn mute(
        &self,
        executor: UserId,
        user: UserId,
        duration: ChronoDuration,
    ) -> ServerResult<()> {
        self.moderation_guard(executor, user).await?;
        self.require_seniority(executor, user).await?;
        self.muted.write().await.insert(
            user,
            MuteEntry {
                since: Utc::now(),
                duration,
            },
        );
        self.narrate(executor, user, "muted").await
    }

    pub async fn unmute(&self, executor: UserId, user: UserId) -> ServerResult<()> {
        self.moderation_guard(executor, user).await?;
        self.require_seniority(executor, user).await?;
        self.muted.write().await.remove(&user);
        self.narrate(executor, user, "unmuted").await
    }

    pub async fn kick(&self, executor: UserId, user: UserId) -> ServerResult<()> {
        self.moderation_guard(executor, user).await?;
        self.require_seniority(executor, user).await?;
        // Narrate first so the kicked member still sees the tip.
        self.narrate(executor, user, "kicked").await?;
        self.members.write().await.remove(&user);
        self.muted.write().await.remove(&user);
        let _ = self.permissions.remove_user(user).await;
        self.broadcast.leave(user).await;
        Ok(())
    }

    pub async fn promote_to_operator(&self, executor: UserId, user: UserId) -> ServerResult<()> {
        self.moderation_guard(executor, user).await?;
        if self.permissions.user_level(executor).await? != PermissionLevel::Administrator {
            return Err(ServerError::NoPermission);
        }
        if self.permissions.user_level(user).await? != PermissionLevel::Default {
            return Err(ServerError::NoPermission);
        }
        self.permissions
            .modify_user_level(user, PermissionLevel::Operator)
            .await;
        self.narrate(executor, user, "turned operator").await
    }

    pub async fn demote_operator(&self, executor: UserId, user: UserId) -> ServerResult<()> {
        self.moderation_guard(executor, user).await?;
        if self.permissions.user_level(executor).await? != PermissionLevel::Administrator {
            return Err(ServerError::NoPermission);
        }
        if self.permissions.user_level(user).await? != PermissionLevel::Operator {
            return Err(ServerError::NoPermission);
        }
        self.permissions
            .modify_user_level(user, PermissionLevel::Default)
            .await;
        self.narrate(executor, user, "turned default user").await
    }

    /// Administrator adjusts a member's numeric level.
    pub async fn set_member_level(
        &self,
        executor: UserId,
        user: UserId,
        level: u8,
    ) -> ServerResult<()> {
        self.moderation_guard(executor, user).await?;
        if self.permissions.user_level(executor).await? != PermissionLevel::Administrator {
            return Err(ServerError::NoPermission);
        }
        let mut members = self.members.write().await;
        let member = members.get_mut(&user).ok_or(ServerError::UserNotFound)?;
        member.set_level(level)
    }

    /// Hands the room to a new administrator, demoting the previous one to
    /// Default level. The new administrator must already be a member.
    pub async fn set_administrator(&self, user: UserId) -> ServerResult<()> {
        self.ensure_usable()?;
        if !self.has_member(user).await {
            return Err(ServerError::UserNotFound);
        }
        let previous = {
            let mut administrator = self.administrator.write().await;
            if *administrator == user {
                return Err(ServerError::NoPermission);
            }
            let previous = *administrator;
            *administrator = user;
            previous
        };
        self.permissions
            .modify_user_level(previous, PermissionLevel::Default)
            .await;
        self.permissions
            .modify_user_level(user, PermissionLevel::Administrator)
            .await;
        let text = format!("{} is now the administrator", self.nickname_of(user).await?);
        self.send_tip_message(user, &text).await
    }

    /// Marks the room unusable and cancels the retention sweep. Called by
    /// the registry when the room is dissolved.
    pub(crate) fn shut_down(&self) {
        self.usable.store(false, Ordering::Release);
        if let Ok(mut retention) = self.retention.lock() {
            if let Some(handle) = retention.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for GroupRoom {
    fn drop(&mut self) {
        self.shut_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeviceType;
    use crate::network::connection::Connection;
    use quill_proto::{Frame, FrameType};
    use tokio::sync::mpsc;

    async fn user_with_lane(
        registry: &Registry,
        name: &str,
    ) -> (Arc<User>, mpsc::Receiver<Vec<u8>>) {
        let user = registry.add_user().await;
        user.update_name(name).await;
        let (tx, rx) = mpsc::channel(64);
        let connection = Connection::from_parts("127.0.0.1:1".parse().unwrap(), tx);
        user.add_connection(connection, DeviceType::PersonalComputer)
            .await
            .unwrap();
        (user, rx)
    }

    fn decode_notification(bytes: Vec<u8>) -> serde_json::Value {
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.frame_type, FrameType::Text);
        serde_json::from_slice(&frame.payload).unwrap()
    }

    #[tokio::test]
    async fn admin_is_member_at_administrator_level() {
        let registry = Registry::new();
        let (admin, _rx) = user_with_lane(&registry, "alice").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        assert_eq!(room.administrator().await, admin.id());
        assert!(room.has_member(admin.id()).await);
        assert_eq!(
            room.permissions().user_level(admin.id()).await.unwrap(),
            PermissionLevel::Administrator
        );
    }

    #[tokio::test]
    async fn add_member_captures_nickname_and_default_level() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();
        assert_eq!(room.nickname_of(member.id()).await.unwrap(), "bob");
        assert_eq!(
            room.permissions().user_level(member.id()).await.unwrap(),
            PermissionLevel::Default
        );
        assert_eq!(room.level_of(member.id()).await.unwrap(), MIN_MEMBER_LEVEL);
    }

    #[tokio::test]
    async fn message_fans_out_to_all_members() {
        let registry = Registry::new();
        let (admin, mut admin_rx) = user_with_lane(&registry, "alice").await;
        let (member, mut member_rx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        room.send_message(admin.id(), "hi").await.unwrap();

        for rx in [&mut admin_rx, &mut member_rx] {
            let json = decode_notification(rx.recv().await.unwrap());
            assert_eq!(json["type"], "group_message");
            assert_eq!(json["data"]["group_id"], group_id.value());
            assert_eq!(json["data"]["user_id"], admin.id().value());
            assert_eq!(json["data"]["message"], "hi");
        }
        assert_eq!(
            room.messages_between(Utc::now() - ChronoDuration::minutes(1), Utc::now())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn user_tip_reaches_only_the_recipient() {
        let registry = Registry::new();
        let (admin, mut admin_rx) = user_with_lane(&registry, "alice").await;
        let (member, mut member_rx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        room.send_user_tip_message(admin.id(), "for your eyes only", member.id())
            .await
            .unwrap();
        let json = decode_notification(member_rx.recv().await.unwrap());
        assert_eq!(json["type"], "group_tip_message");
        assert_eq!(json["data"]["message"], "for your eyes only");
        assert!(admin_rx.try_recv().is_err());

        let history = room
            .messages_between(Utc::now() - ChronoDuration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(history[0].1.kind, MessageKind::Tip);
        assert_eq!(history[0].1.recipient, Some(member.id()));
    }

    #[tokio::test]
    async fn non_member_cannot_send() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (outsider, _orx) = user_with_lane(&registry, "mallory").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        assert!(matches!(
            room.send_message(outsider.id(), "hi").await,
            Err(ServerError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn muted_member_is_silently_dropped_until_expiry() {
        let registry = Registry::new();
        let (admin, mut admin_rx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        room.mute(admin.id(), member.id(), ChronoDuration::minutes(1))
            .await
            .unwrap();
        // Drain the mute tip.
        let tip = decode_notification(admin_rx.recv().await.unwrap());
        assert_eq!(tip["type"], "group_tip_message");
        assert_eq!(tip["data"]["message"], "bob was muted by alice");

        // Accepted, but nothing stored or emitted.
        let before = room
            .messages_between(Utc::now() - ChronoDuration::minutes(5), Utc::now())
            .await
            .unwrap()
            .len();
        room.send_message(member.id(), "silenced").await.unwrap();
        assert!(admin_rx.try_recv().is_err());
        let after = room
            .messages_between(Utc::now() - ChronoDuration::minutes(5), Utc::now())
            .await
            .unwrap()
            .len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn zero_duration_mute_expires_on_next_attempt() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        room.mute(admin.id(), member.id(), ChronoDuration::zero())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        room.send_message(member.id(), "back").await.unwrap();
        let history = room
            .messages_between(Utc::now() - ChronoDuration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert!(history.iter().any(|(_, record)| record.text == "back"));
    }

    #[tokio::test]
    async fn moderation_requires_strictly_higher_level() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        assert!(matches!(
            room.mute(member.id(), admin.id(), ChronoDuration::minutes(1))
                .await,
            Err(ServerError::NoPermission)
        ));
        assert!(matches!(
            room.mute(admin.id(), admin.id(), ChronoDuration::minutes(1))
                .await,
            Err(ServerError::NoPermission)
        ));
    }

    #[tokio::test]
    async fn kick_removes_member_and_mute_entry() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();
        room.mute(admin.id(), member.id(), ChronoDuration::minutes(5))
            .await
            .unwrap();

        room.kick(admin.id(), member.id()).await.unwrap();
        assert!(!room.has_member(member.id()).await);
        // Mute table only holds members.
        assert!(!room.sender_is_muted(member.id()).await);
    }

    #[tokio::test]
    async fn operator_promotion_rules() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        room.promote_to_operator(admin.id(), member.id())
            .await
            .unwrap();
        assert_eq!(
            room.permissions().user_level(member.id()).await.unwrap(),
            PermissionLevel::Operator
        );
        // Promoting an operator again is refused.
        assert!(matches!(
            room.promote_to_operator(admin.id(), member.id()).await,
            Err(ServerError::NoPermission)
        ));
        room.demote_operator(admin.id(), member.id()).await.unwrap();
        assert_eq!(
            room.permissions().user_level(member.id()).await.unwrap(),
            PermissionLevel::Default
        );
    }

    #[tokio::test]
    async fn member_level_bounds_are_enforced() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        room.set_member_level(admin.id(), member.id(), 50)
            .await
            .unwrap();
        assert_eq!(room.level_of(member.id()).await.unwrap(), 50);
        assert!(matches!(
            room.set_member_level(admin.id(), member.id(), 0).await,
            Err(ServerError::GroupUserLevelInvalid)
        ));
        assert!(matches!(
            room.set_member_level(admin.id(), member.id(), 101).await,
            Err(ServerError::GroupUserLevelInvalid)
        ));
        // Non-administrators may not touch levels.
        assert!(matches!(
            room.set_member_level(member.id(), admin.id(), 10).await,
            Err(ServerError::NoPermission)
        ));
    }

    #[tokio::test]
    async fn administrator_cannot_be_removed() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        assert!(matches!(
            room.remove_member(admin.id()).await,
            Err(ServerError::NoPermission)
        ));
    }

    #[tokio::test]
    async fn handover_keeps_admin_invariant() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let (member, _brx) = user_with_lane(&registry, "bob").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        room.add_member(&registry, member.id()).await.unwrap();

        room.set_administrator(member.id()).await.unwrap();
        assert_eq!(room.administrator().await, member.id());
        assert!(room.has_member(member.id()).await);
        assert_eq!(
            room.permissions().user_level(member.id()).await.unwrap(),
            PermissionLevel::Administrator
        );
        assert_eq!(
            room.permissions().user_level(admin.id()).await.unwrap(),
            PermissionLevel::Default
        );
    }

    #[tokio::test]
    async fn unusable_room_refuses_operations() {
        let registry = Registry::new();
        let (admin, _arx) = user_with_lane(&registry, "alice").await;
        let group_id = registry.add_group_room(admin.id()).await.unwrap();
        let room = registry.get_group_room(group_id).await.unwrap();
        registry.remove_group_room(group_id).await.unwrap();
        assert!(matches!(
            room.send_message(admin.id(), "late").await,
            Err(ServerError::GroupRoomUnusable)
        ));
    }
}
