use crate::error::{ServerError, ServerResult};
use crate::ids::{DeviceType, GroupId, UserId};
use crate::network::connection::{Connection, ConnectionId};
use crate::room::encode_text_notification;
use crate::security::password::{generate_salt, hash_password};
use crate::state::ServerState;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationSide {
    Sent,
    Received,
}

/// One entry in a user's friend-request inbox, keyed by the counterpart.
#[derive(Debug, Clone)]
pub struct FriendVerification {
    pub user_id: UserId,
    pub side: VerificationSide,
    pub message: String,
}

/// One entry in a user's group-join inbox.
#[derive(Debug, Clone)]
pub struct GroupVerification {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub side: VerificationSide,
    pub message: String,
}

#[derive(Debug, Default)]
struct Profile {
    name: String,
    age: i32,
    email: String,
    phone: String,
    about: String,
}

#[derive(Debug, Default)]
struct Credentials {
    digest: String,
    salt: String,
}

struct BoundConnection {
    connection: Connection,
    device: DeviceType,
}

/// One account: profile, credentials, relations, verification inboxes, and
/// the live connections every notification fans out to.
///
/// Each field group carries its own lock, mirroring how independently the
/// pieces are touched. Lifecycle operations receive the server context
/// explicitly.
pub struct User {
    id: UserId,
    registered_at: DateTime<Utc>,
    profile: RwLock<Profile>,
    credentials: RwLock<Credentials>,
    friends: RwLock<HashSet<UserId>>,
    groups: RwLock<HashSet<GroupId>>,
    friend_inbox: RwLock<HashMap<UserId, FriendVerification>>,
    group_inbox: RwLock<HashMap<GroupId, Vec<GroupVerification>>>,
    connections: RwLock<HashMap<ConnectionId, BoundConnection>>,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            registered_at: Utc::now(),
            profile: RwLock::new(Profile::default()),
            credentials: RwLock::new(Credentials::default()),
            friends: RwLock::new(HashSet::new()),
            groups: RwLock::new(HashSet::new()),
            friend_inbox: RwLock::new(HashMap::new()),
            group_inbox: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub async fn name(&self) -> String {
        self.profile.read().await.name.clone()
    }

    pub async fn email(&self) -> String {
        self.profile.read().await.email.clone()
    }

    pub async fn phone(&self) -> String {
        self.profile.read().await.phone.clone()
    }

    pub async fn age(&self) -> i32 {
        self.profile.read().await.age
    }

    pub async fn about(&self) -> String {
        self.profile.read().await.about.clone()
    }

    pub async fn update_name(&self, name: &str) {
        self.profile.write().await.name = name.to_string();
    }

    pub async fn update_age(&self, age: i32) {
        self.profile.write().await.age = age;
    }

    pub async fn update_email(&self, email: &str) {
        self.profile.write().await.email = email.to_string();
    }

    pub async fn update_phone(&self, phone: &str) {
        self.profile.write().await.phone = phone.to_string();
    }

    pub async fn update_about(&self, about: &str) {
        self.profile.write().await.about = about.to_string();
    }

    pub async fn check_password(&self, plaintext: &str) -> bool {
        let credentials = self.credentials.read().await;
        if credentials.digest.is_empty() {
            return false;
        }
        hash_password(plaintext, &credentials.salt) == credentials.digest
    }

    pub async fn set_initial_password(&self, new: &str) -> ServerResult<()> {
        let mut credentials = self.credentials.write().await;
        if !credentials.digest.is_empty() {
            return Err(ServerError::PasswordAlreadySet);
        }
        let salt = generate_salt();
        credentials.digest = hash_password(new, &salt);
        credentials.salt = salt;
        Ok(())
    }

    pub async fn change_password(&self, old: &str, new: &str) -> ServerResult<()> {
        let mut credentials = self.credentials.write().await;
        if credentials.digest.is_empty()
            || hash_password(old, &credentials.salt) != credentials.digest
        {
            return Err(ServerError::PasswordMismatch);
        }
        let salt = generate_salt();
        credentials.digest = hash_password(new, &salt);
        credentials.salt = salt;
        Ok(())
    }

    pub async fn has_friend(&self, user: UserId) -> bool {
        self.friends.read().await.contains(&user)
    }

    pub async fn has_group(&self, group: GroupId) -> bool {
        self.groups.read().await.contains(&group)
    }

    pub async fn friends(&self) -> HashSet<UserId> {
        self.friends.read().await.clone()
    }

    pub async fn groups(&self) -> HashSet<GroupId> {
        self.groups.read().await.clone()
    }

    pub(crate) async fn add_friend_entry(&self, user: UserId) {
        self.friends.write().await.insert(user);
    }

    pub(crate) async fn remove_friend_entry(&self, user: UserId) {
        self.friends.write().await.remove(&user);
    }

    pub(crate) async fn add_group_entry(&self, group: GroupId) {
        self.groups.write().await.insert(group);
    }

    pub(crate) async fn remove_group_entry(&self, group: GroupId) {
        self.groups.write().await.remove(&group);
    }

    pub async fn add_friend_verification(&self, counterpart: UserId, entry: FriendVerification) {
        self.friend_inbox.write().await.insert(counterpart, entry);
    }

    pub async fn remove_friend_verification(&self, counterpart: UserId) {
        self.friend_inbox.write().await.remove(&counterpart);
    }

    pub async fn friend_verifications(&self) -> HashMap<UserId, FriendVerification> {
        self.friend_inbox.read().await.clone()
    }

    pub async fn add_group_verification(&self, group: GroupId, entry: GroupVerification) {
        self.group_inbox
            .write()
            .await
            .entry(group)
            .or_default()
            .push(entry);
    }

    /// Removes the entry for `(group, user)`; the group key disappears with
    /// its last entry.
    pub async fn remove_group_verification(
        &self,
        group: GroupId,
        user: UserId,
    ) -> ServerResult<()> {
        let mut inbox = self.group_inbox.write().await;
        let entries = inbox
            .get_mut(&group)
            .ok_or(ServerError::VerificationNotFound)?;
        if let Some(index) = entries.iter().position(|entry| entry.user_id == user) {
            entries.remove(index);
        }
        if entries.is_empty() {
            inbox.remove(&group);
        }
        Ok(())
    }

    pub async fn group_verifications(&self) -> Vec<(GroupId, GroupVerification)> {
        let inbox = self.group_inbox.read().await;
        inbox
            .iter()
            .flat_map(|(group, entries)| entries.iter().map(|entry| (*group, entry.clone())))
            .collect()
    }

    pub async fn add_connection(
        &self,
        connection: Connection,
        device: DeviceType,
    ) -> ServerResult<()> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&connection.id()) {
            return Err(ServerError::ConnectionExists);
        }
        connections.insert(connection.id(), BoundConnection { connection, device });
        Ok(())
    }

    pub async fn has_connection(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn modify_connection(&self, id: ConnectionId, device: DeviceType) -> ServerResult<()> {
        let mut connections = self.connections.write().await;
        let bound = connections
            .get_mut(&id)
            .ok_or(ServerError::ConnectionNotFound)?;
        bound.device = device;
        Ok(())
    }

    pub async fn remove_connection(&self, id: ConnectionId) -> ServerResult<()> {
        self.connections
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(ServerError::ConnectionNotFound)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Queues `bytes` on every bound connection's lane. A failing lane is
    /// logged and skipped; delivery to the others continues.
    pub async fn notify_all(&self, bytes: &[u8]) {
        let connections = self.connections.read().await;
        for bound in connections.values() {
            if let Err(error) = bound.connection.try_send(bytes.to_vec()) {
                warn!(
                    user = %self.id,
                    connection = %bound.connection.id(),
                    peer = %bound.connection.peer(),
                    %error,
                    "notification dropped"
                );
            }
        }
    }

    /// As [`notify_all`](User::notify_all), filtered to one device type.
    pub async fn notify_by_device(&self, device: DeviceType, bytes: &[u8]) {
        let connections = self.connections.read().await;
        for bound in connections.values().filter(|bound| bound.device == device) {
            if let Err(error) = bound.connection.try_send(bytes.to_vec()) {
                warn!(
                    user = %self.id,
                    connection = %bound.connection.id(),
                    peer = %bound.connection.peer(),
                    %error,
                    "notification dropped"
                );
            }
        }
    }

    /// Files a friend request to `other` and notifies their devices.
    pub async fn request_friend(&self, state: &ServerState, other: UserId) -> ServerResult<()> {
        state
            .verifications
            .apply_friend(&state.registry, self.id, other)
            .await?;
        send_json_to_user(
            state,
            other,
            &json!({
                "userid": self.id,
                "type": "added_friend_verification",
                "message": "",
            }),
        )
        .await
    }

    /// Accepts a pending request from `other`: both friend sets gain the
    /// counterpart, the private room is created, and the record plus both
    /// inbox entries disappear.
    pub async fn accept_friend(&self, state: &ServerState, other: UserId) -> ServerResult<()> {
        if other == self.id {
            return Err(ServerError::InvalidVerification);
        }
        let other_user = state.registry.get_user(other).await?;
        state.verifications.accept_friend(other, self.id).await?;
        state.registry.add_private_room(other, self.id).await?;
        other_user.add_friend_entry(self.id).await;
        self.add_friend_entry(other).await;
        state
            .verifications
            .remove_friend_verification(&state.registry, other, self.id)
            .await;
        send_json_to_user(
            state,
            other,
            &json!({"userid": self.id, "type": "added_friend"}),
        )
        .await
    }

    /// Declines a pending request from `other`.
    pub async fn reject_friend(&self, state: &ServerState, other: UserId) -> ServerResult<()> {
        if other == self.id {
            return Err(ServerError::InvalidVerification);
        }
        state.registry.get_user(other).await?;
        if !state
            .verifications
            .has_friend_verification(other, self.id)
            .await
        {
            return Err(ServerError::VerificationNotFound);
        }
        state
            .verifications
            .reject_friend(&state.registry, other, self.id)
            .await?;
        send_json_to_user(
            state,
            other,
            &json!({"userid": self.id, "type": "rejected_to_add_friend"}),
        )
        .await
    }

    /// Dissolves an existing friendship symmetrically. The private room is
    /// left in place; tearing it down is a separate command.
    pub async fn remove_friend(&self, state: &ServerState, other: UserId) -> ServerResult<()> {
        if other == self.id {
            return Err(ServerError::InvalidVerification);
        }
        let other_user = state.registry.get_user(other).await?;
        if !self.has_friend(other).await {
            return Err(ServerError::PrivateRoomNotFound);
        }
        self.remove_friend_entry(other).await;
        other_user.remove_friend_entry(self.id).await;
        send_json_to_user(
            state,
            other,
            &json!({"userid": self.id, "type": "removed_friend"}),
        )
        .await
    }

    /// Creates a group with this user as administrator-member.
    pub async fn create_group(&self, state: &ServerState) -> ServerResult<GroupId> {
        let group = state.registry.add_group_room(self.id).await?;
        self.add_group_entry(group).await;
        Ok(group)
    }

    /// Files a join request; the group's administrator is notified.
    pub async fn request_join_group(&self, state: &ServerState, group: GroupId) -> ServerResult<()> {
        let room = state.registry.get_group_room(group).await?;
        if room.has_member(self.id).await {
            return Err(ServerError::InvalidVerification);
        }
        state
            .verifications
            .apply_group(&state.registry, self.id, group)
            .await?;
        let admin = room.administrator().await;
        send_json_to_user(
            state,
            admin,
            &json!({
                "groupid": group,
                "userid": self.id,
                "type": "added_group_verification",
                "message": "",
            }),
        )
        .await
    }

    /// Administrator accepts `applicant` into the group at Default level.
    pub async fn accept_join_group(
        &self,
        state: &ServerState,
        group: GroupId,
        applicant: UserId,
    ) -> ServerResult<()> {
        let room = state.registry.get_group_room(group).await?;
        if room.has_member(applicant).await {
            return Err(ServerError::InvalidVerification);
        }
        if room.administrator().await != self.id {
            return Err(ServerError::NoPermission);
        }
        state.verifications.accept_group(applicant, group).await?;
        room.add_member(&state.registry, applicant).await?;
        let applicant_user = state.registry.get_user(applicant).await?;
        applicant_user.add_group_entry(group).await;
        state
            .verifications
            .remove_group_verification(&state.registry, applicant, group)
            .await;
        send_json_to_user(
            state,
            applicant,
            &json!({"groupid": group, "type": "added_group"}),
        )
        .await
    }

    /// Administrator declines `applicant`'s join request.
    pub async fn reject_join_group(
        &self,
        state: &ServerState,
        group: GroupId,
        applicant: UserId,
    ) -> ServerResult<()> {
        let room = state.registry.get_group_room(group).await?;
        if room.has_member(applicant).await {
            return Err(ServerError::InvalidVerification);
        }
        if room.administrator().await != self.id {
            return Err(ServerError::NoPermission);
        }
        if !state
            .verifications
            .has_group_verification(applicant, group)
            .await
        {
            return Err(ServerError::VerificationNotFound);
        }
        state
            .verifications
            .reject_group(&state.registry, applicant, group)
            .await?;
        send_json_to_user(
            state,
            applicant,
            &json!({"groupid": group, "type": "rejected_to_add_group"}),
        )
        .await
    }

    /// Administrator dissolves the group; every member is told first.
    pub async fn remove_group(&self, state: &ServerState, group: GroupId) -> ServerResult<()> {
        let room = state.registry.get_group_room(group).await?;
        if room.administrator().await != self.id {
            return Err(ServerError::NoPermission);
        }
        let members = room.member_ids().await;
        let notification = json!({"type": "group_removed", "data": {"group_id": group}});
        for member in &members {
            let _ = send_json_to_user(state, *member, &notification).await;
            if let Ok(user) = state.registry.get_user(*member).await {
                user.remove_group_entry(group).await;
            }
        }
        state.registry.remove_group_room(group).await
    }

    /// Non-administrator member leaves; the administrator and remaining
    /// members are notified.
    pub async fn leave_group(&self, state: &ServerState, group: GroupId) -> ServerResult<()> {
        let room = state.registry.get_group_room(group).await?;
        if !room.has_member(self.id).await {
            return Err(ServerError::UserNotFound);
        }
        if room.administrator().await == self.id {
            return Err(ServerError::NoPermission);
        }
        room.remove_member(self.id).await?;
        self.remove_group_entry(group).await;
        let notification = json!({
            "type": "group_leave_member",
            "data": {"user_id": self.id, "group_id": group},
        });
        for member in room.member_ids().await {
            let _ = send_json_to_user(state, member, &notification).await;
        }
        Ok(())
    }
}

/// Wraps `value` in a `Text` frame and queues it on every live connection of
/// `target`.
pub(crate) async fn send_json_to_user(
    state: &ServerState,
    target: UserId,
    value: &serde_json::Value,
) -> ServerResult<()> {
    let user = state.registry.get_user(target).await?;
    user.notify_all(&encode_text_notification(value)).await;
    Ok(())
}
