//! Per-tenant facade tying the remote connections, the cache and the
//! contact directory together. One `Mailer` per tenant; the cache is
//! shared across all of them.

use std::sync::Arc;

use tracing::warn;

use crate::cache::Cache;
use crate::config::TenantConfig;
use crate::contacts::ContactsDb;
use crate::mail::decoder::decode_message;
use crate::mail::imap::{ImapConnection, RemoteMailbox};
use crate::mail::smtp::SmtpConnection;
use crate::mail::types::{Attachment, Folder, MailError, Message, MessagePage};
use crate::sync::{SyncReport, synchronize_folder};

pub struct Mailer {
    tenant: String,
    imap: ImapConnection,
    smtp: SmtpConnection,
    cache: Arc<Cache>,
    contacts: ContactsDb,
}

impl Mailer {
    pub fn new(config: &TenantConfig, cache: Arc<Cache>) -> Result<Self, MailError> {
        let contacts = ContactsDb::new(cache.pool().clone());
        Ok(Self {
            tenant: config.id.clone(),
            imap: ImapConnection::new(config.imap.clone()),
            smtp: SmtpConnection::new(&config.smtp)?,
            cache,
            contacts,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Probe both transports. Diagnostics are collected, not raised.
    pub async fn check_connection(&mut self) -> bool {
        let imap_ok = self.imap.check_connection().await;
        let smtp_ok = self.smtp.check_connection().await;
        imap_ok && smtp_ok
    }

    pub fn connection_errors(&self) -> Vec<String> {
        self.imap
            .errors()
            .iter()
            .chain(self.smtp.errors())
            .cloned()
            .collect()
    }

    //
    // Synchronization
    //

    /// Reconcile one folder, or every remote folder when none is given.
    /// The full run also refreshes the cached folder list.
    pub async fn synchronize(
        &mut self,
        folder: Option<&str>,
    ) -> Result<Vec<SyncReport>, MailError> {
        let folders = match folder {
            Some(name) => vec![name.to_string()],
            None => {
                let remote = self.imap.list_folders().await?;
                self.cache.replace_folders(&self.tenant, &remote).await?;
                remote.into_iter().map(|f| f.id).collect()
            }
        };

        let mut reports = Vec::with_capacity(folders.len());
        for name in folders {
            let report = synchronize_folder(
                &mut self.imap,
                &self.cache,
                &self.contacts,
                &self.tenant,
                &name,
            )
            .await?;
            reports.push(report);
        }
        Ok(reports)
    }

    //
    // Listings
    //

    /// Folder listing with message and unseen counts. Counts come from
    /// the cache; a cold cache falls back to the remote for both list
    /// and counts.
    pub async fn list_folders(&mut self) -> Result<Vec<Folder>, MailError> {
        let cached = self.cache.folders(&self.tenant).await?;
        if !cached.is_empty() {
            let counts = self.cache.unseen_counts(&self.tenant).await?;
            let mut folders = Vec::with_capacity(cached.len());
            for f in cached {
                let total = self.cache.count_messages(&self.tenant, &f.id).await?;
                let unseen = counts
                    .iter()
                    .find(|(name, _)| *name == f.id)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                folders.push(Folder {
                    id: f.id,
                    name: f.name,
                    total,
                    unseen,
                });
            }
            return Ok(folders);
        }

        let remote = self.imap.list_folders().await?;
        self.cache.replace_folders(&self.tenant, &remote).await?;

        let mut folders = Vec::with_capacity(remote.len());
        for f in remote {
            let total = match self.imap.count_messages(&f.id).await {
                Ok(n) => n as usize,
                Err(err) => {
                    warn!(folder = %f.id, %err, "message count unavailable");
                    0
                }
            };
            let unseen = match self.imap.count_unseen(&f.id).await {
                Ok(n) => n,
                Err(err) => {
                    warn!(folder = %f.id, %err, "unseen count unavailable");
                    0
                }
            };
            folders.push(Folder {
                id: f.id,
                name: f.name,
                total,
                unseen,
            });
        }
        Ok(folders)
    }

    /// One page of the cached listing, newest first. A page beyond the end
    /// of a non-empty listing resets to the first page rather than serving
    /// an empty window.
    pub async fn list_messages(
        &self,
        folder: &str,
        page: u32,
        per_page: u32,
    ) -> Result<MessagePage, MailError> {
        let per_page = per_page.max(1);
        let mut page = page.max(1);

        let total = self.cache.count_messages(&self.tenant, folder).await?;
        if (page as usize) * (per_page as usize) > total
            && ((page - 1) as usize) * (per_page as usize) >= total
        {
            page = 1;
        }

        let offset = ((page - 1) * per_page) as i64;
        let items = self
            .cache
            .message_page(&self.tenant, folder, per_page as i64, offset)
            .await?;

        Ok(MessagePage {
            items,
            page,
            total,
            per_page,
        })
    }

    //
    // Single-message access
    //

    /// One message in full. The cached record is served only for known
    /// correspondents; anything else is fetched live and never persisted,
    /// so withheld bodies stay out of the cache.
    pub async fn message_by_id(&mut self, folder: &str, uid: u32) -> Result<Message, MailError> {
        if let Some(cached) = self.cache.message(&self.tenant, folder, uid).await?
            && cached.contact_id.is_some()
        {
            return Ok(cached);
        }

        let fetched = self.imap.fetch_message(folder, uid).await?;
        decode_message(&fetched)
    }

    /// One attachment's descriptor and decoded bytes.
    pub async fn attachment_by_id(
        &mut self,
        folder: &str,
        uid: u32,
        attachment_id: &str,
    ) -> Result<(Attachment, Vec<u8>), MailError> {
        let message = self.message_by_id(folder, uid).await?;
        let attachment = message
            .attachments
            .find(attachment_id)
            .cloned()
            .ok_or_else(|| MailError::AttachmentNotFound(attachment_id.to_string()))?;

        let data = self
            .imap
            .fetch_part_body(folder, uid, &attachment.section, attachment.encoding)
            .await?;
        Ok((attachment, data))
    }

    //
    // Flag updates & deletion
    //

    pub async fn mark_read(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        mark_read(&mut self.imap, &self.cache, &self.tenant, folder, uid).await
    }

    pub async fn flag_message(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        set_flag(&mut self.imap, &self.cache, &self.tenant, folder, uid, true).await
    }

    pub async fn unflag_message(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        set_flag(&mut self.imap, &self.cache, &self.tenant, folder, uid, false).await
    }

    pub async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<(), MailError> {
        delete_messages(&mut self.imap, &self.cache, &self.tenant, folder, uids).await
    }

    //
    // Sending
    //

    /// Send a message and file a copy in the remote sent folder. Returns
    /// the sent folder's id, or `None` when the copy could not be filed;
    /// filing failures do not undo a successful send.
    pub async fn send_message(
        &mut self,
        to: &str,
        subject: &str,
        html_body: &str,
        cc: Option<&str>,
        bcc: Option<&str>,
    ) -> Result<Option<String>, MailError> {
        let email = self.smtp.send(to, subject, html_body, cc, bcc).await?;

        let raw = email.formatted();
        match self.imap.save_message_in_sent(&raw).await {
            Ok(folder) => Ok(folder),
            Err(err) => {
                warn!(tenant = %self.tenant, %err, "sent message could not be filed");
                Ok(None)
            }
        }
    }
}

//
// User Actions
//
// Each action performs the remote mutation first, then patches the cache:
// a remote failure leaves the cache untouched and the next reconciliation
// converges either way.
//

async fn mark_read<R: RemoteMailbox>(
    remote: &mut R,
    cache: &Cache,
    tenant: &str,
    folder: &str,
    uid: u32,
) -> Result<(), MailError> {
    remote.set_seen(folder, uid).await?;
    cache.set_seen(tenant, folder, uid, true).await
}

async fn set_flag<R: RemoteMailbox>(
    remote: &mut R,
    cache: &Cache,
    tenant: &str,
    folder: &str,
    uid: u32,
    flagged: bool,
) -> Result<(), MailError> {
    if flagged {
        remote.set_flagged(folder, uid).await?;
    } else {
        remote.unset_flagged(folder, uid).await?;
    }
    cache.set_flagged(tenant, folder, uid, flagged).await
}

async fn delete_messages<R: RemoteMailbox>(
    remote: &mut R,
    cache: &Cache,
    tenant: &str,
    folder: &str,
    uids: &[u32],
) -> Result<(), MailError> {
    remote.delete_messages(folder, uids).await?;
    cache.delete_messages(tenant, folder, uids).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImapConfig, SmtpConfig};
    use crate::mail::types::{FetchedMessage, RemoteFolder, RemoteSnapshot};

    fn tenant_config() -> TenantConfig {
        TenantConfig {
            id: "acme".to_string(),
            imap: ImapConfig {
                server: "imap.example.com".to_string(),
                port: 993,
                login: "me@example.com".to_string(),
                password: "secret".to_string(),
                tls: true,
            },
            smtp: SmtpConfig {
                server: "smtp.example.com".to_string(),
                port: 587,
                login: "me@example.com".to_string(),
                password: "secret".to_string(),
                tls: true,
            },
        }
    }

    fn message(uid: u32) -> Message {
        Message {
            uid,
            num: uid,
            from: "Alice <alice@example.com>".to_string(),
            to: "me@example.com".to_string(),
            from_email: "alice@example.com".to_string(),
            to_email: "me@example.com".to_string(),
            subject: format!("Message {uid}"),
            timestamp: uid as i64,
            seen: false,
            flagged: false,
            body: Some("body".to_string()),
            attachments: Default::default(),
            contact_id: Some(1),
        }
    }

    async fn mailer() -> Mailer {
        let cache = Arc::new(Cache::open_in_memory().await.unwrap());
        Mailer::new(&tenant_config(), cache).unwrap()
    }

    #[tokio::test]
    async fn test_list_messages_pages_newest_first() {
        let mailer = mailer().await;
        for uid in 1..=25 {
            mailer
                .cache
                .upsert_message("acme", "INBOX", &message(uid))
                .await
                .unwrap();
        }

        let first = mailer.list_messages("INBOX", 1, 10).await.unwrap();
        assert_eq!(first.total, 25);
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.items[0].uid, 25);

        let last = mailer.list_messages("INBOX", 3, 10).await.unwrap();
        assert_eq!(last.items.len(), 5);
        assert_eq!(last.items.last().unwrap().uid, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_page_resets_to_first() {
        let mailer = mailer().await;
        for uid in 1..=25 {
            mailer
                .cache
                .upsert_message("acme", "INBOX", &message(uid))
                .await
                .unwrap();
        }

        // Page 3 still overlaps the listing (rows 21..25); page 4 does not.
        let partial = mailer.list_messages("INBOX", 3, 10).await.unwrap();
        assert_eq!(partial.page, 3);

        let reset = mailer.list_messages("INBOX", 4, 10).await.unwrap();
        assert_eq!(reset.page, 1);
        assert_eq!(reset.items.len(), 10);
    }

    #[tokio::test]
    async fn test_zero_page_arguments_are_clamped() {
        let mailer = mailer().await;
        mailer
            .cache
            .upsert_message("acme", "INBOX", &message(1))
            .await
            .unwrap();

        let page = mailer.list_messages("INBOX", 0, 0).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, 1);
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_folder_serves_empty_first_page() {
        let mailer = mailer().await;
        let page = mailer.list_messages("INBOX", 7, 10).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_list_folders_serves_cached_counts() {
        let mut mailer = mailer().await;
        mailer
            .cache
            .replace_folders(
                "acme",
                &[
                    RemoteFolder {
                        id: "INBOX".to_string(),
                        name: "INBOX".to_string(),
                    },
                    RemoteFolder {
                        id: "Archive".to_string(),
                        name: "Archive".to_string(),
                    },
                ],
            )
            .await
            .unwrap();
        for uid in [1, 2, 3] {
            mailer
                .cache
                .upsert_message("acme", "INBOX", &message(uid))
                .await
                .unwrap();
        }
        mailer.cache.set_seen("acme", "INBOX", 1, true).await.unwrap();

        // Warm cache: the listing never touches the remote.
        let folders = mailer.list_folders().await.unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].total, 3);
        assert_eq!(folders[0].unseen, 2);
        assert_eq!(folders[1].total, 0);
        assert_eq!(folders[1].unseen, 0);
    }

    /// Records remote mutations, optionally failing them, so the
    /// remote-first ordering of the user actions is observable.
    struct ActionRemote {
        calls: Vec<String>,
        fail: bool,
    }

    impl ActionRemote {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Vec::new(),
                fail: true,
            }
        }

        fn record(&mut self, call: String) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Connection {
                    details: vec!["remote unreachable".to_string()],
                });
            }
            self.calls.push(call);
            Ok(())
        }
    }

    impl RemoteMailbox for ActionRemote {
        async fn select_folder(&mut self, _folder: &str) -> Result<(), MailError> {
            Ok(())
        }

        async fn snapshot(&mut self, _folder: &str) -> Result<RemoteSnapshot, MailError> {
            Ok(RemoteSnapshot::default())
        }

        async fn fetch_message(
            &mut self,
            _folder: &str,
            uid: u32,
        ) -> Result<FetchedMessage, MailError> {
            Err(MailError::MalformedMessage(format!("uid {uid} not served")))
        }

        async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, MailError> {
            Ok(vec![])
        }

        async fn set_seen(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
            self.record(format!("seen {folder} {uid}"))
        }

        async fn set_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
            self.record(format!("flag {folder} {uid}"))
        }

        async fn unset_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
            self.record(format!("unflag {folder} {uid}"))
        }

        async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<(), MailError> {
            self.record(format!("delete {folder} {uids:?}"))
        }
    }

    #[tokio::test]
    async fn test_mark_read_hits_remote_then_patches_cache() {
        let cache = Cache::open_in_memory().await.unwrap();
        cache.upsert_message("acme", "INBOX", &message(3)).await.unwrap();

        let mut remote = ActionRemote::new();
        mark_read(&mut remote, &cache, "acme", "INBOX", 3)
            .await
            .unwrap();

        assert_eq!(remote.calls, vec!["seen INBOX 3"]);
        let stored = cache.message("acme", "INBOX", 3).await.unwrap().unwrap();
        assert!(stored.seen);
    }

    #[tokio::test]
    async fn test_flag_and_unflag_follow_remote() {
        let cache = Cache::open_in_memory().await.unwrap();
        cache.upsert_message("acme", "INBOX", &message(5)).await.unwrap();

        let mut remote = ActionRemote::new();
        set_flag(&mut remote, &cache, "acme", "INBOX", 5, true)
            .await
            .unwrap();
        assert!(cache.message("acme", "INBOX", 5).await.unwrap().unwrap().flagged);

        set_flag(&mut remote, &cache, "acme", "INBOX", 5, false)
            .await
            .unwrap();
        assert!(!cache.message("acme", "INBOX", 5).await.unwrap().unwrap().flagged);

        assert_eq!(remote.calls, vec!["flag INBOX 5", "unflag INBOX 5"]);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_cache_untouched() {
        let cache = Cache::open_in_memory().await.unwrap();
        cache.upsert_message("acme", "INBOX", &message(7)).await.unwrap();

        let mut remote = ActionRemote::failing();
        assert!(mark_read(&mut remote, &cache, "acme", "INBOX", 7).await.is_err());
        assert!(
            delete_messages(&mut remote, &cache, "acme", "INBOX", &[7])
                .await
                .is_err()
        );

        let stored = cache.message("acme", "INBOX", 7).await.unwrap().unwrap();
        assert!(!stored.seen);
    }

    #[tokio::test]
    async fn test_delete_removes_remote_then_cache_rows() {
        let cache = Cache::open_in_memory().await.unwrap();
        for uid in [1, 2, 3] {
            cache.upsert_message("acme", "INBOX", &message(uid)).await.unwrap();
        }

        let mut remote = ActionRemote::new();
        delete_messages(&mut remote, &cache, "acme", "INBOX", &[1, 3])
            .await
            .unwrap();

        assert_eq!(remote.calls, vec!["delete INBOX [1, 3]"]);
        assert_eq!(cache.count_messages("acme", "INBOX").await.unwrap(), 1);
        assert!(cache.message("acme", "INBOX", 2).await.unwrap().is_some());
    }
}
