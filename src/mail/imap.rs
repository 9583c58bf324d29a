//! IMAP connection handle: lazily established TLS session, folder
//! selection tracking, snapshot production, and message/part fetches.
//!
//! One handle per tenant. The session is not reentrant; every operation
//! takes `&mut self` and runs to completion before the next.

use std::sync::Arc;

use async_imap::types::{Fetch, Flag};
use base64::Engine;
use futures::StreamExt;
use imap_proto::types::{
    BodyContentCommon, BodyContentSinglePart, BodyStructure, ContentEncoding, SectionPath,
};
use mail_parser::{MessageParser, PartType as ParserPartType};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::config::ImapConfig;
use crate::constants::SENT_FOLDER_HINT;

use super::types::{
    Envelope, FetchedMessage, MailError, MessageBody, MessageFlags, PartLeaf, PartNode, PartType,
    RemoteFolder, RemoteSnapshot, TransferEncoding,
};

pub(crate) type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

/// Remote mail store operations consumed by the synchronization driver
/// and the user-action surface, so both can be exercised against an
/// in-memory fake.
pub trait RemoteMailbox {
    async fn select_folder(&mut self, folder: &str) -> Result<(), MailError>;
    async fn snapshot(&mut self, folder: &str) -> Result<RemoteSnapshot, MailError>;
    async fn fetch_message(&mut self, folder: &str, uid: u32) -> Result<FetchedMessage, MailError>;
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, MailError>;
    async fn set_seen(&mut self, folder: &str, uid: u32) -> Result<(), MailError>;
    async fn set_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError>;
    async fn unset_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError>;
    async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<(), MailError>;
}

pub struct ImapConnection {
    config: ImapConfig,
    session: Option<ImapSession>,
    selected: Option<String>,
    errors: Vec<String>,
}

impl ImapConnection {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: None,
            selected: None,
            errors: Vec::new(),
        }
    }

    //
    // Connection Management
    //

    async fn connect(&self) -> Result<ImapSession, MailError> {
        if !self.config.tls {
            tracing::warn!("IMAP TLS disabled in config - connecting with TLS anyway");
        }

        let tcp = TcpStream::connect((self.config.server.as_str(), self.config.port))
            .await
            .map_err(|e| {
                connection_error(format!(
                    "tcp connect to {}:{} failed: {e}",
                    self.config.server, self.config.port
                ))
            })?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = ServerName::try_from(self.config.server.clone())
            .map_err(|e| connection_error(format!("invalid server name: {e}")))?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| connection_error(format!("TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls.compat());
        let session = client
            .login(&self.config.login, &self.config.password)
            .await
            .map_err(|(e, _)| connection_error(format!("login failed: {e}")))?;

        tracing::debug!(server = %self.config.server, "IMAP session established");
        Ok(session)
    }

    async fn session(&mut self) -> Result<&mut ImapSession, MailError> {
        if self.session.is_none() {
            self.session = Some(self.connect().await?);
        }
        self.session
            .as_mut()
            .ok_or_else(|| connection_error("session unavailable".to_string()))
    }

    /// Try to establish (or reuse) a session. A failure appends a
    /// human-readable diagnostic instead of raising.
    pub async fn check_connection(&mut self) -> bool {
        if self.session.is_some() {
            return true;
        }
        match self.connect().await {
            Ok(session) => {
                self.session = Some(session);
                true
            }
            Err(err) => {
                self.errors.push(err.to_string());
                false
            }
        }
    }

    /// Diagnostics accumulated by failed connection checks.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    //
    // Folder Operations
    //

    /// Select `folder`, skipping the round-trip when it is already the
    /// selected one. A NO reply maps to `FolderNotFound`; transport
    /// failures keep their own variant so they abort the tenant run
    /// instead of reading as a missing folder.
    pub async fn select_folder(&mut self, folder: &str) -> Result<(), MailError> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        let session = self.session().await?;
        session
            .select(folder)
            .await
            .map_err(|e| select_error(folder, e))?;
        self.selected = Some(folder.to_string());
        Ok(())
    }

    pub async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, MailError> {
        let session = self.session().await?;
        let mut stream = session.list(Some(""), Some("*")).await?;
        let mut folders = Vec::new();
        while let Some(result) = stream.next().await {
            let name = result?;
            folders.push(RemoteFolder {
                id: name.name().to_string(),
                name: name.name().to_string(),
            });
        }
        Ok(folders)
    }

    /// First folder whose name contains "sent", case-insensitively.
    pub async fn sent_folder_id(&mut self) -> Result<Option<String>, MailError> {
        Ok(self
            .list_folders()
            .await?
            .into_iter()
            .find(|f| f.name.to_ascii_lowercase().contains(SENT_FOLDER_HINT))
            .map(|f| f.id))
    }

    pub async fn count_messages(&mut self, folder: &str) -> Result<u32, MailError> {
        let session = self.session().await?;
        let mailbox = session
            .select(folder)
            .await
            .map_err(|e| select_error(folder, e))?;
        self.selected = Some(folder.to_string());
        Ok(mailbox.exists)
    }

    pub async fn count_unseen(&mut self, folder: &str) -> Result<usize, MailError> {
        self.select_folder(folder).await?;
        let uids = self.session().await?.uid_search("UNSEEN").await?;
        Ok(uids.len())
    }

    //
    // Snapshot & Fetch Operations
    //

    /// Point-in-time uid sets for a folder. A failed search marks that
    /// category unavailable without failing the snapshot as a whole.
    pub async fn snapshot(&mut self, folder: &str) -> Result<RemoteSnapshot, MailError> {
        self.select_folder(folder).await?;
        let session = self.session().await?;

        let mut snapshot = RemoteSnapshot::default();
        for (query, slot) in [
            ("ALL", &mut snapshot.all),
            ("SEEN", &mut snapshot.seen),
            ("FLAGGED", &mut snapshot.flagged),
        ] {
            match session.uid_search(query).await {
                Ok(uids) => *slot = Some(uids),
                Err(err) => {
                    tracing::warn!(folder, query, %err, "uid search failed, category unavailable");
                }
            }
        }
        Ok(snapshot)
    }

    /// Single round-trip fetch of one message: flags, internal date, the
    /// full raw body (peek, so remote seen state is untouched) and the
    /// structure listing.
    pub async fn fetch_message(
        &mut self,
        folder: &str,
        uid: u32,
    ) -> Result<FetchedMessage, MailError> {
        self.select_folder(folder).await?;
        let session = self.session().await?;

        let mut stream = session
            .uid_fetch(
                uid.to_string(),
                "(UID FLAGS INTERNALDATE BODY.PEEK[] BODYSTRUCTURE)",
            )
            .await?;

        let mut fetched = None;
        while let Some(result) = stream.next().await {
            let fetch = result?;
            if fetch.uid == Some(uid) {
                fetched = Some(decode_fetch(&fetch, uid));
            }
        }

        fetched.ok_or_else(|| {
            MailError::MalformedMessage(format!("uid {uid} not returned by fetch"))
        })
    }

    /// Fetch one part's body, decoded per its declared transfer encoding.
    pub async fn fetch_part_body(
        &mut self,
        folder: &str,
        uid: u32,
        section: &str,
        encoding: TransferEncoding,
    ) -> Result<Vec<u8>, MailError> {
        self.select_folder(folder).await?;
        let path = section_path(section)?;
        let query = format!("(UID BODY.PEEK[{section}])");

        let session = self.session().await?;
        let mut stream = session.uid_fetch(uid.to_string(), &query).await?;

        let mut data = None;
        while let Some(result) = stream.next().await {
            let fetch = result?;
            if fetch.uid == Some(uid)
                && let Some(bytes) = fetch.section(&path)
            {
                data = Some(decode_part_body(bytes, encoding));
            }
        }

        data.ok_or_else(|| MailError::AttachmentNotFound(format!("{uid}:{section}")))
    }

    //
    // Flag & Delete Operations
    //

    pub async fn set_seen(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        self.store(folder, &uid.to_string(), "+FLAGS (\\Seen)").await
    }

    pub async fn set_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        self.store(folder, &uid.to_string(), "+FLAGS (\\Flagged)")
            .await
    }

    pub async fn unset_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        self.store(folder, &uid.to_string(), "-FLAGS (\\Flagged)")
            .await
    }

    /// Mark the given uids `\Deleted` and expunge them.
    pub async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<(), MailError> {
        if uids.is_empty() {
            return Ok(());
        }
        let uid_set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.store(folder, &uid_set, "+FLAGS (\\Deleted)").await?;

        let session = self.session().await?;
        let mut responses = std::pin::pin!(session.expunge().await?);
        while let Some(response) = responses.next().await {
            if let Err(err) = response {
                tracing::warn!(%err, "error in expunge response");
            }
        }
        Ok(())
    }

    async fn store(&mut self, folder: &str, uid_set: &str, query: &str) -> Result<(), MailError> {
        self.select_folder(folder).await?;
        let session = self.session().await?;
        let mut responses = session.uid_store(uid_set, query).await?;
        while let Some(response) = responses.next().await {
            if let Err(err) = response {
                tracing::warn!(%err, "error in store response");
            }
        }
        Ok(())
    }

    //
    // Sent Folder Filing
    //

    /// Append a raw sent message to the remote sent folder, marked seen.
    /// Returns the folder id used, or `None` when no sent folder exists.
    pub async fn save_message_in_sent(
        &mut self,
        raw: &[u8],
    ) -> Result<Option<String>, MailError> {
        let Some(folder) = self.sent_folder_id().await? else {
            return Ok(None);
        };
        let session = self.session().await?;
        session.append(&folder, Some("(\\Seen)"), None, raw).await?;
        Ok(Some(folder))
    }
}

impl RemoteMailbox for ImapConnection {
    async fn select_folder(&mut self, folder: &str) -> Result<(), MailError> {
        ImapConnection::select_folder(self, folder).await
    }

    async fn snapshot(&mut self, folder: &str) -> Result<RemoteSnapshot, MailError> {
        ImapConnection::snapshot(self, folder).await
    }

    async fn fetch_message(&mut self, folder: &str, uid: u32) -> Result<FetchedMessage, MailError> {
        ImapConnection::fetch_message(self, folder, uid).await
    }

    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, MailError> {
        ImapConnection::list_folders(self).await
    }

    async fn set_seen(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        ImapConnection::set_seen(self, folder, uid).await
    }

    async fn set_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        ImapConnection::set_flagged(self, folder, uid).await
    }

    async fn unset_flagged(&mut self, folder: &str, uid: u32) -> Result<(), MailError> {
        ImapConnection::unset_flagged(self, folder, uid).await
    }

    async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<(), MailError> {
        ImapConnection::delete_messages(self, folder, uids).await
    }
}

fn connection_error(detail: String) -> MailError {
    MailError::Connection {
        details: vec![detail],
    }
}

/// Classify a SELECT failure. Only a NO reply means the folder does not
/// exist; anything else (I/O, lost connection, parse) stays a transport
/// error.
fn select_error(folder: &str, err: async_imap::error::Error) -> MailError {
    match err {
        async_imap::error::Error::No(_) => MailError::FolderNotFound(folder.to_string()),
        other => MailError::Imap(other),
    }
}

//
// Fetch Response Decoding
//

/// Assemble a [`FetchedMessage`] from one FETCH response.
fn decode_fetch(fetch: &Fetch, uid: u32) -> FetchedMessage {
    let flags = flags_from_imap(fetch.flags());
    let internal_date = fetch.internal_date().map(|d| d.timestamp());
    let (envelope, body) = match fetch.body() {
        Some(raw) => parse_raw(raw, internal_date),
        None => (None, MessageBody::default()),
    };
    let parts = fetch
        .bodystructure()
        .map(part_forest)
        .unwrap_or_default();

    FetchedMessage {
        uid,
        num: fetch.message,
        envelope,
        flags,
        body,
        parts,
    }
}

pub(crate) fn flags_from_imap<'a>(flags: impl Iterator<Item = Flag<'a>>) -> MessageFlags {
    let mut result = MessageFlags::empty();
    for flag in flags {
        match flag {
            Flag::Seen => result |= MessageFlags::SEEN,
            Flag::Answered => result |= MessageFlags::ANSWERED,
            Flag::Flagged => result |= MessageFlags::FLAGGED,
            Flag::Deleted => result |= MessageFlags::DELETED,
            Flag::Draft => result |= MessageFlags::DRAFT,
            _ => {}
        }
    }
    result
}

/// Parse a raw RFC 2822 message into header data and body variants.
/// Returns no envelope when the message cannot be parsed at all.
fn parse_raw(raw: &[u8], internal_date: Option<i64>) -> (Option<Envelope>, MessageBody) {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        return (None, MessageBody::default());
    };

    let from = parsed.from().and_then(|a| a.first()).map(address_display);
    let from_addrs = parsed.from().map(address_list).unwrap_or_default();
    let to = parsed.to().map(|addrs| {
        addrs
            .iter()
            .filter_map(|a| a.address())
            .collect::<Vec<_>>()
            .join(", ")
    });
    let to_addrs = parsed.to().map(address_list).unwrap_or_default();
    let subject = parsed.subject().map(str::to_string);
    let timestamp = parsed.date().map(|d| d.to_timestamp()).or(internal_date);

    let body = MessageBody {
        text: extract_text_body(&parsed),
        html: extract_html_body(&parsed),
    };

    (
        Some(Envelope {
            from,
            to,
            from_addrs,
            to_addrs,
            subject,
            timestamp,
        }),
        body,
    )
}

fn address_display(addr: &mail_parser::Addr) -> String {
    match (addr.name(), addr.address()) {
        (Some(name), Some(email)) => format!("{name} <{email}>"),
        (Some(name), None) => name.to_string(),
        (None, Some(email)) => email.to_string(),
        (None, None) => String::new(),
    }
}

fn address_list(addrs: &mail_parser::Address) -> Vec<String> {
    addrs
        .iter()
        .filter_map(|a| a.address())
        .map(str::to_string)
        .collect()
}

fn extract_text_body(message: &mail_parser::Message) -> Option<String> {
    for part in message.text_bodies() {
        if let ParserPartType::Text(text) = &part.body {
            return Some(text.to_string());
        }
    }
    None
}

fn extract_html_body(message: &mail_parser::Message) -> Option<String> {
    for part in message.html_bodies() {
        if let ParserPartType::Html(html) = &part.body {
            return Some(html.to_string());
        }
    }
    None
}

//
// Structure Conversion
//

/// Root-level parts of a BODYSTRUCTURE listing. A non-multipart message
/// has a single root part addressed as section 1.
fn part_forest(bs: &BodyStructure) -> Vec<PartNode> {
    match bs {
        BodyStructure::Multipart { bodies, .. } => bodies.iter().map(part_node).collect(),
        other => vec![part_node(other)],
    }
}

fn part_node(bs: &BodyStructure) -> PartNode {
    match bs {
        BodyStructure::Multipart { bodies, .. } => PartNode::Container {
            children: bodies.iter().map(part_node).collect(),
        },
        // Parts nested in message/rfc822 are addressed below this section;
        // an inner multipart contributes its children directly.
        BodyStructure::Message { body, .. } => {
            let children = match body.as_ref() {
                BodyStructure::Multipart { bodies, .. } => {
                    bodies.iter().map(part_node).collect()
                }
                inner => vec![part_node(inner)],
            };
            PartNode::Container { children }
        }
        BodyStructure::Basic { common, other, .. }
        | BodyStructure::Text { common, other, .. } => {
            PartNode::Leaf(part_leaf(common, other))
        }
    }
}

fn part_leaf(common: &BodyContentCommon, other: &BodyContentSinglePart) -> PartLeaf {
    PartLeaf {
        part_type: PartType::from_mime(&common.ty.ty),
        encoding: map_encoding(&other.transfer_encoding),
        content_id: other.id.as_ref().map(|v| v.to_string()),
        size: other.octets,
        disposition: common.disposition.as_ref().map(|d| d.ty.to_string()),
        params: param_pairs(&common.ty.params),
        disposition_params: common
            .disposition
            .as_ref()
            .map(|d| param_pairs(&d.params))
            .unwrap_or_default(),
    }
}

fn param_pairs(
    params: &Option<Vec<(std::borrow::Cow<'_, str>, std::borrow::Cow<'_, str>)>>,
) -> Vec<(String, String)> {
    params
        .as_ref()
        .map(|pairs| {
            pairs
                .iter()
                .map(|(a, v)| (a.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn map_encoding(encoding: &ContentEncoding) -> TransferEncoding {
    match encoding {
        ContentEncoding::SevenBit => TransferEncoding::SevenBit,
        ContentEncoding::EightBit => TransferEncoding::EightBit,
        ContentEncoding::Binary => TransferEncoding::Binary,
        ContentEncoding::Base64 => TransferEncoding::Base64,
        ContentEncoding::QuotedPrintable => TransferEncoding::QuotedPrintable,
        ContentEncoding::Other(_) => TransferEncoding::Other,
    }
}

fn section_path(section: &str) -> Result<SectionPath, MailError> {
    let parts = section
        .split('.')
        .map(str::parse::<u32>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| MailError::MalformedMessage(format!("invalid section address: {section}")))?;
    Ok(SectionPath::Part(parts, None))
}

/// Decode a fetched part body per its declared encoding. Unknown encodings
/// pass through raw, as do undecodable payloads.
fn decode_part_body(raw: &[u8], encoding: TransferEncoding) -> Vec<u8> {
    match encoding {
        TransferEncoding::Base64 => {
            let cleaned: Vec<u8> = raw
                .iter()
                .filter(|b| !b.is_ascii_whitespace())
                .copied()
                .collect();
            base64::engine::general_purpose::STANDARD
                .decode(&cleaned)
                .unwrap_or_else(|_| raw.to_vec())
        }
        TransferEncoding::QuotedPrintable => {
            quoted_printable::decode(raw, quoted_printable::ParseMode::Robust)
                .unwrap_or_else(|_| raw.to_vec())
        }
        _ => raw.to_vec(),
    }
}
