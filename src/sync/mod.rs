//! Snapshot reconciliation between a remote folder and the local cache.
//!
//! A run is plan-then-apply: the remote snapshot is diffed against the
//! cached rows into a [`ReconcilePlan`] before anything is mutated, so a
//! failure mid-run leaves the cache a valid (if stale) prefix of the plan.

mod plan;

pub use plan::ReconcilePlan;

use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::contacts::ContactsDb;
use crate::mail::decoder::decode_message;
use crate::mail::imap::RemoteMailbox;
use crate::mail::types::{MailError, Message};

/// What one folder reconciliation actually did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub folder: String,
    pub imported: usize,
    pub deleted: usize,
    pub seen_updates: usize,
    pub flag_updates: usize,
    /// Messages the remote returned but which could not be decoded.
    pub skipped: usize,
}

/// Reconcile one folder of one tenant against the remote.
pub async fn synchronize_folder<R: RemoteMailbox>(
    remote: &mut R,
    cache: &Cache,
    contacts: &ContactsDb,
    tenant: &str,
    folder: &str,
) -> Result<SyncReport, MailError> {
    remote.select_folder(folder).await?;
    let snapshot = remote.snapshot(folder).await?;
    let local = cache.flag_states(tenant, folder).await?;

    let plan = ReconcilePlan::compute(&local, &snapshot);
    if plan.is_empty() {
        debug!(tenant, folder, "already reconciled");
        return Ok(SyncReport {
            folder: folder.to_string(),
            ..Default::default()
        });
    }

    let mut report = SyncReport {
        folder: folder.to_string(),
        ..Default::default()
    };

    cache.delete_messages(tenant, folder, &plan.delete).await?;
    report.deleted = plan.delete.len();

    for &uid in &plan.import {
        match import_message(remote, cache, contacts, tenant, folder, uid).await {
            Ok(()) => report.imported += 1,
            // One undecodable message must not abort the folder.
            Err(MailError::MalformedMessage(reason)) => {
                warn!(tenant, folder, uid, %reason, "skipping malformed message");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    for &uid in &plan.mark_seen {
        cache.set_seen(tenant, folder, uid, true).await?;
    }
    for &uid in &plan.mark_unseen {
        cache.set_seen(tenant, folder, uid, false).await?;
    }
    report.seen_updates = plan.mark_seen.len() + plan.mark_unseen.len();

    for &uid in &plan.flag {
        cache.set_flagged(tenant, folder, uid, true).await?;
    }
    for &uid in &plan.unflag {
        cache.set_flagged(tenant, folder, uid, false).await?;
    }
    report.flag_updates = plan.flag.len() + plan.unflag.len();

    info!(
        tenant,
        folder,
        imported = report.imported,
        deleted = report.deleted,
        skipped = report.skipped,
        "folder reconciled"
    );

    Ok(report)
}

/// Fetch, decode, privacy-filter and store one message.
async fn import_message<R: RemoteMailbox>(
    remote: &mut R,
    cache: &Cache,
    contacts: &ContactsDb,
    tenant: &str,
    folder: &str,
    uid: u32,
) -> Result<(), MailError> {
    let fetched = remote.fetch_message(folder, uid).await?;
    let message = decode_message(&fetched)?;

    let contact = contacts
        .find_contact_by_email(&[&message.from_email, &message.to_email])
        .await?;
    let message = apply_privacy_rule(message, contact);

    cache.upsert_message(tenant, folder, &message).await
}

/// Withhold the body of messages from unknown correspondents; stamp the
/// contact id on the rest.
pub fn apply_privacy_rule(mut message: Message, contact: Option<i64>) -> Message {
    match contact {
        Some(id) => message.contact_id = Some(id),
        None => message.body = None,
    }
    message
}
