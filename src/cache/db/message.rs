//! Message row CRUD: upsert, paging, flag updates.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::mail::types::{Attachments, FlagState, MailError, Message};

/// Convert a SQLite row to a Message, decoding the attachment payload.
fn row_to_message(row: SqliteRow) -> Result<Message, MailError> {
    let payload: String = row.get("attachments");
    let attachments: Attachments = serde_json::from_str(&payload)?;
    Ok(Message {
        uid: row.get::<i64, _>("uid") as u32,
        num: row.get::<i64, _>("num") as u32,
        from: row.get("from_addr"),
        to: row.get("to_addr"),
        from_email: row.get("from_email"),
        to_email: row.get("to_email"),
        subject: row.get("subject"),
        timestamp: row.get("timestamp"),
        seen: row.get("seen"),
        flagged: row.get("flagged"),
        body: row.get("body"),
        attachments,
        contact_id: row.get("contact_id"),
    })
}

/// Insert or overwrite the row for (tenant, folder, uid).
pub async fn upsert(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
    message: &Message,
) -> Result<(), MailError> {
    let payload = serde_json::to_string(&message.attachments)?;
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO messages
        (tenant_id, folder, uid, num, from_addr, to_addr, from_email, to_email,
         subject, timestamp, seen, flagged, body, attachments, contact_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant)
    .bind(folder)
    .bind(message.uid as i64)
    .bind(message.num as i64)
    .bind(&message.from)
    .bind(&message.to)
    .bind(&message.from_email)
    .bind(&message.to_email)
    .bind(&message.subject)
    .bind(message.timestamp)
    .bind(message.seen)
    .bind(message.flagged)
    .bind(&message.body)
    .bind(payload)
    .bind(message.contact_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
    uid: u32,
) -> Result<Option<Message>, MailError> {
    let row = sqlx::query(
        "SELECT * FROM messages WHERE tenant_id = ? AND folder = ? AND uid = ?",
    )
    .bind(tenant)
    .bind(folder)
    .bind(uid as i64)
    .fetch_optional(pool)
    .await?;
    row.map(row_to_message).transpose()
}

pub async fn delete(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
    uid: u32,
) -> Result<(), MailError> {
    sqlx::query("DELETE FROM messages WHERE tenant_id = ? AND folder = ? AND uid = ?")
        .bind(tenant)
        .bind(folder)
        .bind(uid as i64)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_many(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
    uids: &[u32],
) -> Result<(), MailError> {
    for &uid in uids {
        delete(pool, tenant, folder, uid).await?;
    }
    Ok(())
}

/// Presence and flag bits of every cached row, for plan computation.
pub async fn flag_states(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
) -> Result<Vec<FlagState>, MailError> {
    let rows = sqlx::query(
        "SELECT uid, seen, flagged FROM messages WHERE tenant_id = ? AND folder = ? ORDER BY uid",
    )
    .bind(tenant)
    .bind(folder)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| FlagState {
            uid: row.get::<i64, _>("uid") as u32,
            seen: row.get("seen"),
            flagged: row.get("flagged"),
        })
        .collect())
}

pub async fn set_seen(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
    uid: u32,
    seen: bool,
) -> Result<(), MailError> {
    sqlx::query("UPDATE messages SET seen = ? WHERE tenant_id = ? AND folder = ? AND uid = ?")
        .bind(seen)
        .bind(tenant)
        .bind(folder)
        .bind(uid as i64)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_flagged(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
    uid: u32,
    flagged: bool,
) -> Result<(), MailError> {
    sqlx::query("UPDATE messages SET flagged = ? WHERE tenant_id = ? AND folder = ? AND uid = ?")
        .bind(flagged)
        .bind(tenant)
        .bind(folder)
        .bind(uid as i64)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count(pool: &SqlitePool, tenant: &str, folder: &str) -> Result<usize, MailError> {
    let row = sqlx::query("SELECT COUNT(*) as n FROM messages WHERE tenant_id = ? AND folder = ?")
        .bind(tenant)
        .bind(folder)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n") as usize)
}

/// One listing window, newest first.
pub async fn page(
    pool: &SqlitePool,
    tenant: &str,
    folder: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Message>, MailError> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM messages
        WHERE tenant_id = ? AND folder = ?
        ORDER BY timestamp DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(tenant)
    .bind(folder)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_message).collect()
}

/// Unseen row counts grouped by folder, for the folder listing.
pub async fn unseen_counts(
    pool: &SqlitePool,
    tenant: &str,
) -> Result<Vec<(String, usize)>, MailError> {
    let rows = sqlx::query(
        r#"
        SELECT folder, COUNT(*) as n FROM messages
        WHERE tenant_id = ? AND seen = 0
        GROUP BY folder
        "#,
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("folder"), row.get::<i64, _>("n") as usize))
        .collect())
}
