//! Folder-list cache operations.

use sqlx::{Row, SqlitePool};

use crate::mail::types::{MailError, RemoteFolder};

/// Replace the cached folder list for a tenant, preserving remote order.
pub async fn replace(
    pool: &SqlitePool,
    tenant: &str,
    folders: &[RemoteFolder],
) -> Result<(), MailError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM folders WHERE tenant_id = ?")
        .bind(tenant)
        .execute(&mut *tx)
        .await?;

    for (position, folder) in folders.iter().enumerate() {
        sqlx::query("INSERT INTO folders (tenant_id, id, name, position) VALUES (?, ?, ?, ?)")
            .bind(tenant)
            .bind(&folder.id)
            .bind(&folder.name)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool, tenant: &str) -> Result<Vec<RemoteFolder>, MailError> {
    let rows = sqlx::query("SELECT id, name FROM folders WHERE tenant_id = ? ORDER BY position")
        .bind(tenant)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| RemoteFolder {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect())
}
