//! Redis binding, single node or cluster.
//!
//! A lock is a plain string key. Acquiring is `SET key <holder> NX`, which
//! answers nil when the key exists; releasing is `DEL key`, which answers
//! the number of keys removed. No expiry is set.

use crate::driver::Driver;
use crate::error::LockError;
use log::*;
use redis::cluster::{ClusterClient, ClusterConnection};
use redis::{Connection, ConnectionLike, IntoConnectionInfo};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Driver over one Redis connection.
///
/// `C` is any blocking connection: [`redis::Connection`] for a single node,
/// [`ClusterConnection`] for a cluster. Calls from several threads take
/// turns on the connection.
pub struct RedisDriver<C = Connection> {
    id: String,
    con: Mutex<C>,
}

impl RedisDriver<Connection> {
    /// Connects to the node at `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub fn open(url: impl IntoConnectionInfo) -> anyhow::Result<RedisDriver<Connection>> {
        let client = redis::Client::open(url)?;
        let con = client.get_connection()?;
        Ok(RedisDriver::with_connection(con))
    }
}

impl RedisDriver<ClusterConnection> {
    /// Connects to a cluster through any of its `nodes`.
    pub fn open_cluster<T: IntoConnectionInfo>(
        nodes: Vec<T>,
    ) -> anyhow::Result<RedisDriver<ClusterConnection>> {
        let client = ClusterClient::new(nodes)?;
        let con = client.get_connection()?;
        Ok(RedisDriver::with_connection(con))
    }
}

impl<C: ConnectionLike> RedisDriver<C> {
    /// Wraps an already open connection, with a random holder id.
    pub fn with_connection(con: C) -> RedisDriver<C> {
        let id = Uuid::new_v4().to_string();
        info!("redis driver: id={id}");
        RedisDriver {
            id,
            con: Mutex::new(con),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // Each query is self-contained, so a connection left behind by a
    // panicking caller is still usable.
    fn con(&self) -> MutexGuard<'_, C> {
        self.con.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: ConnectionLike> Driver for RedisDriver<C> {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        let mut con = self.con();
        let reply = redis::cmd("SET")
            .arg(key)
            .arg(&self.id)
            .arg("NX")
            .query::<Option<String>>(&mut *con);

        match reply {
            Ok(Some(_)) => {
                debug!("[{}] SET {key} NX: ok", self.id);
                Ok(())
            }
            Ok(None) => Err(LockError::acquire(key)),
            Err(e) => Err(LockError::acquire_with(key, e)),
        }
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        let mut con = self.con();
        match redis::cmd("DEL").arg(key).query::<i64>(&mut *con) {
            Ok(1) => {
                debug!("[{}] DEL {key}: ok", self.id);
                Ok(())
            }
            Ok(0) => Err(LockError::release(key)),
            Ok(n) => Err(LockError::release_with(key, format!("DEL removed {n} keys"))),
            Err(e) => Err(LockError::release_with(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_bad_urls() {
        assert!(RedisDriver::open("not a url").is_err());
        assert!(RedisDriver::open("http://127.0.0.1/").is_err());
    }

    #[test]
    fn open_fails_without_a_server() {
        // Port 1 is reserved and nothing listens there.
        assert!(RedisDriver::open("redis://127.0.0.1:1/").is_err());
    }

    #[test]
    fn open_cluster_needs_nodes() {
        assert!(RedisDriver::open_cluster(Vec::<String>::new()).is_err());
    }
}
