use quill_proto::CodecError;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Domain errors surfaced by the core.
///
/// Handlers translate these into `{state:"error"}` JSON responses at the
/// router boundary; transport failures terminate the affected connection
/// instead of producing a response.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("user not found")]
    UserNotFound,
    #[error("group room not found")]
    GroupRoomNotFound,
    #[error("private room not found")]
    PrivateRoomNotFound,
    #[error("private room already exists")]
    PrivateRoomExists,
    #[error("connection not found")]
    ConnectionNotFound,
    #[error("connection already registered")]
    ConnectionExists,
    #[error("connection is gone")]
    NullConnection,
    #[error("password already set")]
    PasswordAlreadySet,
    #[error("wrong password")]
    PasswordMismatch,
    #[error("verification already exists")]
    VerificationExists,
    #[error("verification not found")]
    VerificationNotFound,
    #[error("invalid verification")]
    InvalidVerification,
    #[error("no permission")]
    NoPermission,
    #[error("group room is unusable")]
    GroupRoomUnusable,
    #[error("group user level out of range")]
    GroupUserLevelInvalid,
    #[error("tls context missing")]
    NullTlsContext,
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}
