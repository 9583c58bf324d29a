//! SQLite record store for the message cache and folder list.
//!
//! This module is split into:
//! - `mod.rs` - Cache struct and connection pool
//! - `schema.rs` - schema initialization
//! - `message.rs` - message row CRUD, paging, flag updates
//! - `folder.rs` - folder-list cache

mod folder;
mod message;
mod schema;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::constants::{POOL_SIZE, SQLITE_BUSY_TIMEOUT_SECS};
use crate::mail::types::{FlagState, MailError, Message, RemoteFolder};

pub struct Cache {
    pool: SqlitePool,
}

impl Cache {
    pub async fn open(path: &Path) -> Result<Self, MailError> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, MailError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool, shared with the contact directory.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    //
    // Message Operations (delegated to message module)
    //

    pub async fn upsert_message(
        &self,
        tenant: &str,
        folder: &str,
        message: &Message,
    ) -> Result<(), MailError> {
        message::upsert(&self.pool, tenant, folder, message).await
    }

    pub async fn message(
        &self,
        tenant: &str,
        folder: &str,
        uid: u32,
    ) -> Result<Option<Message>, MailError> {
        message::get(&self.pool, tenant, folder, uid).await
    }

    pub async fn delete_messages(
        &self,
        tenant: &str,
        folder: &str,
        uids: &[u32],
    ) -> Result<(), MailError> {
        message::delete_many(&self.pool, tenant, folder, uids).await
    }

    pub async fn flag_states(
        &self,
        tenant: &str,
        folder: &str,
    ) -> Result<Vec<FlagState>, MailError> {
        message::flag_states(&self.pool, tenant, folder).await
    }

    pub async fn set_seen(
        &self,
        tenant: &str,
        folder: &str,
        uid: u32,
        seen: bool,
    ) -> Result<(), MailError> {
        message::set_seen(&self.pool, tenant, folder, uid, seen).await
    }

    pub async fn set_flagged(
        &self,
        tenant: &str,
        folder: &str,
        uid: u32,
        flagged: bool,
    ) -> Result<(), MailError> {
        message::set_flagged(&self.pool, tenant, folder, uid, flagged).await
    }

    pub async fn count_messages(&self, tenant: &str, folder: &str) -> Result<usize, MailError> {
        message::count(&self.pool, tenant, folder).await
    }

    pub async fn message_page(
        &self,
        tenant: &str,
        folder: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, MailError> {
        message::page(&self.pool, tenant, folder, limit, offset).await
    }

    pub async fn unseen_counts(&self, tenant: &str) -> Result<Vec<(String, usize)>, MailError> {
        message::unseen_counts(&self.pool, tenant).await
    }

    //
    // Folder Operations (delegated to folder module)
    //

    pub async fn replace_folders(
        &self,
        tenant: &str,
        folders: &[RemoteFolder],
    ) -> Result<(), MailError> {
        folder::replace(&self.pool, tenant, folders).await
    }

    pub async fn folders(&self, tenant: &str) -> Result<Vec<RemoteFolder>, MailError> {
        folder::list(&self.pool, tenant).await
    }
}
