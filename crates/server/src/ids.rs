use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Opaque user identifier. `0` is reserved as "none"; real ids are allocated
/// monotonically by the registry starting at [`crate::registry::FIRST_USER_ID`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub const NONE: UserId = UserId(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque room identifier, shared by group rooms and private rooms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct GroupId(i64);

impl GroupId {
    pub const NONE: GroupId = GroupId(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of device behind a bound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Unknown,
    PersonalComputer,
    Phone,
    Web,
}

impl DeviceType {
    /// Parses the wire spelling; anything unrecognized is `Unknown`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "PersonalComputer" => Self::PersonalComputer,
            "Phone" => Self::Phone,
            "Web" => Self::Web,
            _ => Self::Unknown,
        }
    }
}

/// Unordered pair of users, the key of the private-room index.
///
/// The pair is normalized on construction so `{a, b}` and `{b, a}` hash and
/// compare identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserPair(UserId, UserId);

impl UserPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn users(self) -> (UserId, UserId) {
        (self.0, self.1)
    }
}
