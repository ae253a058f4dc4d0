use crate::config::MysqlConfig;
use crate::error::ServerResult;
use crate::ids::{GroupId, UserId};
use std::sync::Arc;
use tracing::info;

/// Contract with the durable relational store.
///
/// Durability is out of scope for this runtime; the server talks to the
/// store through this trait and ships with the no-op adapter below. A real
/// backend would implement the same surface against MySQL.
pub trait Store: Send + Sync {
    /// Human-readable target, for the startup log line.
    fn describe(&self) -> String;

    fn persist_user(&self, user: UserId) -> ServerResult<()>;

    fn persist_message(&self, room: GroupId, sender: UserId, text: &str) -> ServerResult<()>;
}

/// Adapter that accepts everything and stores nothing.
pub struct NullStore;

impl Store for NullStore {
    fn describe(&self) -> String {
        "null".to_string()
    }

    fn persist_user(&self, _user: UserId) -> ServerResult<()> {
        Ok(())
    }

    fn persist_message(&self, _room: GroupId, _sender: UserId, _text: &str) -> ServerResult<()> {
        Ok(())
    }
}

/// Selects the store adapter for this run. The MySQL section is consumed for
/// the connection summary only; the stub never dials out.
pub fn connect(config: &MysqlConfig) -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(NullStore);
    info!(
        adapter = %store.describe(),
        mysql_host = %config.host,
        mysql_port = config.port,
        "storage adapter selected"
    );
    store
}
