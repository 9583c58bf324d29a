use std::collections::HashSet;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mail-layer failures that callers react to individually. Everything else
/// travels as `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("connection failed: {}", details.join("; "))]
    Connection { details: Vec<String> },
    #[error("folder not found: {0}")]
    FolderNotFound(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("attachment not found: {0}")]
    AttachmentNotFound(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("imap: {0}")]
    Imap(#[from] async_imap::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("message build failed: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("cache: {0}")]
    Cache(#[from] sqlx::Error),
    #[error("attachment payload: {0}")]
    Payload(#[from] serde_json::Error),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MessageFlags: u32 {
        const SEEN = 0b00000001;
        const ANSWERED = 0b00000010;
        const FLAGGED = 0b00000100;
        const DELETED = 0b00001000;
        const DRAFT = 0b00010000;
    }
}

/// Media type class of a MIME part, as reported by the remote structure
/// listing. Subtypes are not retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartType {
    #[default]
    Text,
    Multipart,
    Message,
    Application,
    Audio,
    Image,
    Video,
    Model,
    Other,
}

impl PartType {
    pub fn from_mime(ty: &str) -> Self {
        match ty.to_ascii_lowercase().as_str() {
            "text" => PartType::Text,
            "multipart" => PartType::Multipart,
            "message" => PartType::Message,
            "application" => PartType::Application,
            "audio" => PartType::Audio,
            "image" => PartType::Image,
            "video" => PartType::Video,
            "model" => PartType::Model,
            _ => PartType::Other,
        }
    }

    /// Classes that form the readable body of a message and are therefore
    /// never collected as attachments.
    pub fn is_inline_body(self) -> bool {
        matches!(self, PartType::Text | PartType::Multipart | PartType::Message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferEncoding {
    #[default]
    #[serde(rename = "7bit")]
    SevenBit,
    #[serde(rename = "8bit")]
    EightBit,
    #[serde(rename = "binary")]
    Binary,
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "quoted-printable")]
    QuotedPrintable,
    #[serde(rename = "other")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Inline,
    Attachment,
}

/// One node of a message's MIME part tree.
#[derive(Debug, Clone)]
pub enum PartNode {
    Container { children: Vec<PartNode> },
    Leaf(PartLeaf),
}

#[derive(Debug, Clone, Default)]
pub struct PartLeaf {
    pub part_type: PartType,
    pub encoding: TransferEncoding,
    pub content_id: Option<String>,
    pub size: u32,
    /// Raw Content-Disposition value, if the part declared one.
    pub disposition: Option<String>,
    pub params: Vec<(String, String)>,
    pub disposition_params: Vec<(String, String)>,
}

impl PartLeaf {
    pub fn param(&self, attribute: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(attribute))
            .map(|(_, v)| v.as_str())
    }

    pub fn disposition_param(&self, attribute: &str) -> Option<&str> {
        self.disposition_params
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(attribute))
            .map(|(_, v)| v.as_str())
    }
}

/// Attachment descriptor extracted from the part tree. `section` addresses
/// the part for a later body fetch; `id` is the part's content-id when it
/// carries one, otherwise `section|size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub section: String,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub part_type: PartType,
    pub size: u32,
    pub encoding: TransferEncoding,
}

/// Attachments grouped by disposition, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub inline: Vec<Attachment>,
    #[serde(default, rename = "attachment")]
    pub attached: Vec<Attachment>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        self.inline.is_empty() && self.attached.is_empty()
    }

    pub fn push(&mut self, disposition: Disposition, attachment: Attachment) {
        match disposition {
            Disposition::Inline => self.inline.push(attachment),
            Disposition::Attachment => self.attached.push(attachment),
        }
    }

    /// Look up an attachment by id, checking the inline bucket first.
    pub fn find(&self, id: &str) -> Option<&Attachment> {
        self.inline
            .iter()
            .chain(self.attached.iter())
            .find(|a| a.id == id)
    }
}

/// Header data of one fetched message, decoded from the raw form.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub from: Option<String>,
    pub to: Option<String>,
    pub from_addrs: Vec<String>,
    pub to_addrs: Vec<String>,
    pub subject: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageBody {
    pub text: Option<String>,
    pub html: Option<String>,
}

/// One message as fetched from the remote store, before decoding into a
/// cache record. `envelope` is `None` when the raw message could not be
/// parsed at all.
#[derive(Debug, Clone, Default)]
pub struct FetchedMessage {
    pub uid: u32,
    pub num: u32,
    pub envelope: Option<Envelope>,
    pub flags: MessageFlags,
    pub body: MessageBody,
    pub parts: Vec<PartNode>,
}

/// The canonical cache record for one remote message. Scoping keys
/// (tenant id, folder) are carried by the store operations, not the record.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub uid: u32,
    /// Sequence number at fetch time. Display only; never used as a key.
    pub num: u32,
    pub from: String,
    pub to: String,
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub timestamp: i64,
    pub seen: bool,
    pub flagged: bool,
    /// Withheld for messages from unknown correspondents.
    pub body: Option<String>,
    pub attachments: Attachments,
    pub contact_id: Option<i64>,
}

/// Cached presence and flag bits of one message, as read back from the
/// store when computing a reconciliation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagState {
    pub uid: u32,
    pub seen: bool,
    pub flagged: bool,
}

/// Point-in-time remote folder state. A `None` category means the remote
/// could not report it, which is distinct from a present-but-empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub all: Option<HashSet<u32>>,
    pub seen: Option<HashSet<u32>>,
    pub flagged: Option<HashSet<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// Folder listing entry served to callers.
#[derive(Debug, Clone)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub total: usize,
    pub unseen: usize,
}

/// One page of the cached message listing for a folder.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub items: Vec<Message>,
    pub page: u32,
    pub total: usize,
    pub per_page: u32,
}
