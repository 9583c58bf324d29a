//! Database schema initialization.

use sqlx::SqlitePool;

use crate::mail::types::MailError;

/// Create all tables and indexes. Idempotent.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), MailError> {
    sqlx::query(
        r#"
        -- Message cache, one row per remote message
        CREATE TABLE IF NOT EXISTS messages (
            tenant_id TEXT NOT NULL,
            folder TEXT NOT NULL,
            uid INTEGER NOT NULL,
            num INTEGER NOT NULL DEFAULT 0,
            from_addr TEXT NOT NULL DEFAULT '',
            to_addr TEXT NOT NULL DEFAULT '',
            from_email TEXT NOT NULL DEFAULT '',
            to_email TEXT NOT NULL DEFAULT '',
            subject TEXT NOT NULL DEFAULT '',
            timestamp INTEGER NOT NULL DEFAULT 0,
            seen INTEGER NOT NULL DEFAULT 0,
            flagged INTEGER NOT NULL DEFAULT 0,
            body TEXT,
            attachments TEXT NOT NULL DEFAULT '{}',
            contact_id INTEGER,
            PRIMARY KEY (tenant_id, folder, uid)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_listing
            ON messages(tenant_id, folder, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_unseen
            ON messages(tenant_id, folder, seen);

        -- Folder-list cache, ordered as the remote returned it
        CREATE TABLE IF NOT EXISTS folders (
            tenant_id TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (tenant_id, id)
        );

        -- Contact directory
        CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT
        );

        CREATE TABLE IF NOT EXISTS contact_emails (
            contact_id INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
            email TEXT NOT NULL,
            PRIMARY KEY (contact_id, email)
        );

        CREATE INDEX IF NOT EXISTS idx_contact_emails_email ON contact_emails(email);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
