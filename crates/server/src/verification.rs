use crate::error::{ServerError, ServerResult};
use crate::ids::{GroupId, UserId};
use crate::registry::Registry;
use crate::user::{FriendVerification, GroupVerification, VerificationSide};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Pending friend and group-join requests with their accept/reject state.
///
/// Friend records are keyed by the directed pair `(applicator, controller)`;
/// group records by `(applicator, group)`. The manager also maintains the
/// verification inboxes of the affected users so that both sides are purged
/// whenever a record is removed.
#[derive(Debug, Default)]
pub struct VerificationManager {
    friends: RwLock<HashMap<(UserId, UserId), bool>>,
    groups: RwLock<HashMap<(UserId, GroupId), bool>>,
}

impl VerificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a friend request from `sender` to `receiver`.
    pub async fn apply_friend(
        &self,
        registry: &Registry,
        sender: UserId,
        receiver: UserId,
    ) -> ServerResult<()> {
        if sender == receiver {
            return Err(ServerError::InvalidVerification);
        }
        let sender_user = registry.get_user(sender).await?;
        let receiver_user = registry.get_user(receiver).await?;
        if registry.has_private_pair(sender, receiver).await {
            return Err(ServerError::PrivateRoomExists);
        }
        {
            let mut friends = self.friends.write().await;
            if friends.contains_key(&(sender, receiver)) || friends.contains_key(&(receiver, sender))
            {
                return Err(ServerError::VerificationExists);
            }
            friends.insert((sender, receiver), false);
        }
        sender_user
            .add_friend_verification(
                receiver,
                FriendVerification {
                    user_id: receiver,
                    side: VerificationSide::Sent,
                    message: String::new(),
                },
            )
            .await;
        receiver_user
            .add_friend_verification(
                sender,
                FriendVerification {
                    user_id: sender,
                    side: VerificationSide::Received,
                    message: String::new(),
                },
            )
            .await;
        Ok(())
    }

    /// Directed pendency check: is there a request from `sender` awaiting
    /// `receiver`?
    pub async fn has_friend_verification(&self, sender: UserId, receiver: UserId) -> bool {
        if sender == receiver {
            return false;
        }
        self.friends.read().await.contains_key(&(sender, receiver))
    }

    /// Marks the pending request accepted. The caller creates the private
    /// room, updates the friend sets, and removes the record.
    pub async fn accept_friend(&self, sender: UserId, receiver: UserId) -> ServerResult<()> {
        if sender == receiver {
            return Err(ServerError::InvalidVerification);
        }
        let mut friends = self.friends.write().await;
        let flag = friends
            .get_mut(&(sender, receiver))
            .ok_or(ServerError::VerificationNotFound)?;
        *flag = true;
        Ok(())
    }

    /// Removes the record if present (no-op otherwise) and purges both
    /// inboxes.
    pub async fn reject_friend(
        &self,
        registry: &Registry,
        sender: UserId,
        receiver: UserId,
    ) -> ServerResult<()> {
        if sender == receiver {
            return Err(ServerError::InvalidVerification);
        }
        self.remove_friend_verification(registry, sender, receiver)
            .await;
        Ok(())
    }

    pub async fn is_friend_verified(&self, sender: UserId, receiver: UserId) -> ServerResult<bool> {
        if sender == receiver {
            return Err(ServerError::InvalidVerification);
        }
        self.friends
            .read()
            .await
            .get(&(sender, receiver))
            .copied()
            .ok_or(ServerError::VerificationNotFound)
    }

    /// Drops the record and both parties' inbox entries.
    pub(crate) async fn remove_friend_verification(
        &self,
        registry: &Registry,
        sender: UserId,
        receiver: UserId,
    ) {
        if self
            .friends
            .write()
            .await
            .remove(&(sender, receiver))
            .is_none()
        {
            return;
        }
        if let Ok(user) = registry.get_user(sender).await {
            user.remove_friend_verification(receiver).await;
        }
        if let Ok(user) = registry.get_user(receiver).await {
            user.remove_friend_verification(sender).await;
        }
    }

    /// Files a join request for `group`. Only the administrator's inbox
    /// receives the `Received` entry.
    pub async fn apply_group(
        &self,
        registry: &Registry,
        applicator: UserId,
        group: GroupId,
    ) -> ServerResult<()> {
        let room = registry.get_group_room(group).await?;
        let applicator_user = registry.get_user(applicator).await?;
        {
            let mut groups = self.groups.write().await;
            if groups.contains_key(&(applicator, group)) {
                return Err(ServerError::VerificationExists);
            }
            groups.insert((applicator, group), false);
        }
        applicator_user
            .add_group_verification(
                group,
                GroupVerification {
                    user_id: applicator,
                    group_id: group,
                    side: VerificationSide::Sent,
                    message: String::new(),
                },
            )
            .await;
        let admin = room.administrator().await;
        if let Ok(admin_user) = registry.get_user(admin).await {
            admin_user
                .add_group_verification(
                    group,
                    GroupVerification {
                        user_id: applicator,
                        group_id: group,
                        side: VerificationSide::Received,
                        message: String::new(),
                    },
                )
                .await;
        }
        Ok(())
    }

    pub async fn has_group_verification(&self, applicator: UserId, group: GroupId) -> bool {
        self.groups.read().await.contains_key(&(applicator, group))
    }

    /// Marks the pending join accepted; membership and group-set updates are
    /// the caller's responsibility.
    pub async fn accept_group(&self, applicator: UserId, group: GroupId) -> ServerResult<()> {
        let mut groups = self.groups.write().await;
        let flag = groups
            .get_mut(&(applicator, group))
            .ok_or(ServerError::VerificationNotFound)?;
        *flag = true;
        Ok(())
    }

    /// Removes the record if present (no-op otherwise) and purges inboxes.
    pub async fn reject_group(
        &self,
        registry: &Registry,
        applicator: UserId,
        group: GroupId,
    ) -> ServerResult<()> {
        self.remove_group_verification(registry, applicator, group)
            .await;
        Ok(())
    }

    pub async fn is_group_verified(&self, applicator: UserId, group: GroupId) -> ServerResult<bool> {
        self.groups
            .read()
            .await
            .get(&(applicator, group))
            .copied()
            .ok_or(ServerError::VerificationNotFound)
    }

    /// Drops the record plus the applicator's and administrator's inbox
    /// entries.
    pub(crate) async fn remove_group_verification(
        &self,
        registry: &Registry,
        applicator: UserId,
        group: GroupId,
    ) {
        if self
            .groups
            .write()
            .await
            .remove(&(applicator, group))
            .is_none()
        {
            return;
        }
        if let Ok(user) = registry.get_user(applicator).await {
            let _ = user.remove_group_verification(group, applicator).await;
        }
        if let Ok(room) = registry.get_group_room(group).await {
            let admin = room.administrator().await;
            if let Ok(admin_user) = registry.get_user(admin).await {
                let _ = admin_user.remove_group_verification(group, applicator).await;
            }
        }
    }
}
