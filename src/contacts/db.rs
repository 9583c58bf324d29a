use sqlx::{Row, SqlitePool};

use crate::mail::types::MailError;

/// Contact directory sharing the cache database pool.
///
/// A contact owns any number of addresses; lookup is by lowercased
/// exact match against those addresses.
pub struct ContactsDb {
    pool: SqlitePool,
}

impl ContactsDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a contact with its known addresses, returning the new id.
    pub async fn add_contact(
        &self,
        name: Option<&str>,
        emails: &[&str],
    ) -> Result<i64, MailError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("INSERT INTO contacts (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        let id: i64 = row.get("id");

        for email in emails {
            let email = email.trim().to_lowercase();
            if email.is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT OR IGNORE INTO contact_emails (contact_id, email) VALUES (?, ?)",
            )
            .bind(id)
            .bind(email)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// First contact matching any of the given addresses, in argument order.
    pub async fn find_contact_by_email(
        &self,
        addresses: &[&str],
    ) -> Result<Option<i64>, MailError> {
        for address in addresses {
            let address = address.trim().to_lowercase();
            if address.is_empty() {
                continue;
            }
            let row = sqlx::query("SELECT contact_id FROM contact_emails WHERE email = ?")
                .bind(address)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(Some(row.get("contact_id")));
            }
        }
        Ok(None)
    }
}
