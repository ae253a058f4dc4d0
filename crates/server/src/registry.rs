use crate::error::{ServerError, ServerResult};
use crate::ids::{DeviceType, GroupId, UserId, UserPair};
use crate::network::connection::{Connection, ConnectionId};
use crate::room::group::GroupRoom;
use crate::room::private::PrivateRoom;
use crate::user::User;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

pub const FIRST_USER_ID: i64 = 10_000;
pub const FIRST_GROUP_ROOM_ID: i64 = 10_000;
pub const FIRST_PRIVATE_ROOM_ID: i64 = 10_000;

struct ConnectionBinding {
    connection: Connection,
    user: Option<UserId>,
}

/// Authoritative global maps: users, group rooms, private rooms with their
/// pair index, and the connection↔user binding.
///
/// Each map carries its own lock. Where two maps are mutated together the
/// declared acquisition order is `connections` before `users`, and
/// `private_rooms` before `pair_index`; every multi-map path below follows
/// those orders.
pub struct Registry {
    users: RwLock<HashMap<UserId, Arc<User>>>,
    groups: RwLock<HashMap<GroupId, Arc<GroupRoom>>>,
    private_rooms: RwLock<HashMap<GroupId, Arc<PrivateRoom>>>,
    pair_index: RwLock<HashMap<UserPair, GroupId>>,
    connections: RwLock<HashMap<ConnectionId, ConnectionBinding>>,
    next_user_id: AtomicI64,
    next_group_room_id: AtomicI64,
    next_private_room_id: AtomicI64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            private_rooms: RwLock::new(HashMap::new()),
            pair_index: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            next_user_id: AtomicI64::new(FIRST_USER_ID),
            next_group_room_id: AtomicI64::new(FIRST_GROUP_ROOM_ID),
            next_private_room_id: AtomicI64::new(FIRST_PRIVATE_ROOM_ID),
        }
    }

    pub async fn add_user(&self) -> Arc<User> {
        let id = UserId::new(self.next_user_id.fetch_add(1, Ordering::SeqCst));
        let user = Arc::new(User::new(id));
        self.users.write().await.insert(id, Arc::clone(&user));
        user
    }

    pub async fn has_user(&self, id: UserId) -> bool {
        self.users.read().await.contains_key(&id)
    }

    pub async fn get_user(&self, id: UserId) -> ServerResult<Arc<User>> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ServerError::UserNotFound)
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    /// Creates the private room for `(a, b)` and indexes it under the
    /// unordered pair. Not idempotent; callers check for an existing pair.
    pub async fn add_private_room(&self, a: UserId, b: UserId) -> ServerResult<GroupId> {
        let first = self.get_user(a).await?;
        let second = self.get_user(b).await?;
        let mut rooms = self.private_rooms.write().await;
        let mut index = self.pair_index.write().await;
        let id = GroupId::new(self.next_private_room_id.fetch_add(1, Ordering::SeqCst));
        let room = PrivateRoom::create(id, &first, &second).await;
        rooms.insert(id, room);
        index.insert(UserPair::new(a, b), id);
        Ok(id)
    }

    /// Looks up the private room id for the pair, either order.
    pub async fn private_room_id(&self, a: UserId, b: UserId) -> ServerResult<GroupId> {
        self.pair_index
            .read()
            .await
            .get(&UserPair::new(a, b))
            .copied()
            .ok_or(ServerError::PrivateRoomNotFound)
    }

    pub async fn has_private_pair(&self, a: UserId, b: UserId) -> bool {
        self.pair_index
            .read()
            .await
            .contains_key(&UserPair::new(a, b))
    }

    pub async fn get_private_room(&self, id: GroupId) -> ServerResult<Arc<PrivateRoom>> {
        self.private_rooms
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ServerError::PrivateRoomNotFound)
    }

    /// Creates a group room with `admin` as its sole member at
    /// Administrator level.
    pub async fn add_group_room(&self, admin: UserId) -> ServerResult<GroupId> {
        let admin_user = self.get_user(admin).await?;
        let mut groups = self.groups.write().await;
        let id = GroupId::new(self.next_group_room_id.fetch_add(1, Ordering::SeqCst));
        let room = GroupRoom::create(id, &admin_user).await;
        groups.insert(id, room);
        Ok(id)
    }

    pub async fn has_group_room(&self, id: GroupId) -> bool {
        self.groups.read().await.contains_key(&id)
    }

    pub async fn get_group_room(&self, id: GroupId) -> ServerResult<Arc<GroupRoom>> {
        self.groups
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ServerError::GroupRoomNotFound)
    }

    pub async fn remove_group_room(&self, id: GroupId) -> ServerResult<()> {
        let room = self
            .groups
            .write()
            .await
            .remove(&id)
            .ok_or(ServerError::GroupRoomNotFound)?;
        room.shut_down();
        Ok(())
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    /// Registers a freshly accepted connection with no bound user.
    pub async fn register_connection(&self, connection: Connection) -> ServerResult<()> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&connection.id()) {
            return Err(ServerError::ConnectionExists);
        }
        connections.insert(
            connection.id(),
            ConnectionBinding {
                connection,
                user: None,
            },
        );
        Ok(())
    }

    pub async fn has_connection(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// The user bound to the connection, `None` while unauthenticated.
    pub async fn user_of(&self, id: ConnectionId) -> ServerResult<Option<UserId>> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|binding| binding.user)
            .ok_or(ServerError::ConnectionNotFound)
    }

    /// Binds the connection to `user`, detaching it from any previously
    /// bound user first. Lock order: `connections`, then `users`.
    pub async fn bind_connection(
        &self,
        id: ConnectionId,
        user: UserId,
        device: DeviceType,
    ) -> ServerResult<()> {
        let mut connections = self.connections.write().await;
        let users = self.users.read().await;
        let target = users.get(&user).ok_or(ServerError::UserNotFound)?;
        let binding = connections.get_mut(&id).ok_or(ServerError::ConnectionNotFound)?;
        if let Some(previous) = binding.user {
            if let Some(old) = users.get(&previous) {
                let _ = old.remove_connection(id).await;
            }
        }
        target
            .add_connection(binding.connection.clone(), device)
            .await?;
        binding.user = Some(user);
        Ok(())
    }

    /// Removes the connection, detaching it from its bound user if any.
    /// Lock order: `connections`, then `users`.
    pub async fn remove_connection(&self, id: ConnectionId) -> ServerResult<()> {
        let mut connections = self.connections.write().await;
        let users = self.users.read().await;
        let binding = connections
            .remove(&id)
            .ok_or(ServerError::ConnectionNotFound)?;
        if let Some(bound) = binding.user {
            if let Some(user) = users.get(&bound) {
                let _ = user.remove_connection(id).await;
            }
        }
        Ok(())
    }
}
