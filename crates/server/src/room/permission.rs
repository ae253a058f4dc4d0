use crate::error::{ServerError, ServerResult};
use crate::ids::UserId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Ordered permission levels: `Default < Operator < Administrator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    Default,
    Operator,
    Administrator,
}

/// Per-room permission table: named permissions with their required level,
/// and the level each member holds.
///
/// Permission names are arbitrary strings chosen by the room creator.
/// Lock order when both maps are read together: `permissions`, then
/// `user_levels`.
#[derive(Debug, Default)]
pub struct PermissionTable {
    permissions: RwLock<HashMap<String, PermissionLevel>>,
    user_levels: RwLock<HashMap<UserId, PermissionLevel>>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates a named permission.
    pub async fn modify_permission(&self, name: &str, level: PermissionLevel) {
        self.permissions
            .write()
            .await
            .insert(name.to_string(), level);
    }

    pub async fn remove_permission(&self, name: &str) -> ServerResult<()> {
        self.permissions
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or(ServerError::NoPermission)
    }

    /// Required level of a named permission.
    pub async fn permission_level(&self, name: &str) -> ServerResult<PermissionLevel> {
        self.permissions
            .read()
            .await
            .get(name)
            .copied()
            .ok_or(ServerError::NoPermission)
    }

    pub async fn modify_user_level(&self, user: UserId, level: PermissionLevel) {
        self.user_levels.write().await.insert(user, level);
    }

    pub async fn remove_user(&self, user: UserId) -> ServerResult<()> {
        self.user_levels
            .write()
            .await
            .remove(&user)
            .map(|_| ())
            .ok_or(ServerError::UserNotFound)
    }

    pub async fn user_level(&self, user: UserId) -> ServerResult<PermissionLevel> {
        self.user_levels
            .read()
            .await
            .get(&user)
            .copied()
            .ok_or(ServerError::UserNotFound)
    }

    /// A user holds a permission iff their level is at least the permission's
    /// required level.
    pub async fn has_permission(&self, user: UserId, name: &str) -> ServerResult<bool> {
        let permissions = self.permissions.read().await;
        let user_levels = self.user_levels.read().await;
        let required = permissions.get(name).ok_or(ServerError::NoPermission)?;
        let held = user_levels.get(&user).ok_or(ServerError::UserNotFound)?;
        Ok(held >= required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(PermissionLevel::Default < PermissionLevel::Operator);
        assert!(PermissionLevel::Operator < PermissionLevel::Administrator);
    }

    #[tokio::test]
    async fn permission_check_compares_levels() {
        let table = PermissionTable::new();
        let admin = UserId::new(10_000);
        let member = UserId::new(10_001);
        table.modify_user_level(admin, PermissionLevel::Administrator).await;
        table.modify_user_level(member, PermissionLevel::Default).await;
        table.modify_permission("pin_message", PermissionLevel::Operator).await;

        assert_eq!(
            table.permission_level("pin_message").await.unwrap(),
            PermissionLevel::Operator
        );
        assert!(table.has_permission(admin, "pin_message").await.unwrap());
        assert!(!table.has_permission(member, "pin_message").await.unwrap());
    }

    #[tokio::test]
    async fn missing_name_and_user_surface_errors() {
        let table = PermissionTable::new();
        let user = UserId::new(10_000);
        table.modify_user_level(user, PermissionLevel::Default).await;
        assert!(matches!(
            table.has_permission(user, "absent").await,
            Err(ServerError::NoPermission)
        ));
        table.modify_permission("present", PermissionLevel::Default).await;
        assert!(matches!(
            table.has_permission(UserId::new(1), "present").await,
            Err(ServerError::UserNotFound)
        ));
        assert!(matches!(
            table.remove_permission("absent").await,
            Err(ServerError::NoPermission)
        ));
    }
}
