//! Decodes a fetched remote message into the canonical cache record.

use super::structure::collect_attachments;
use super::types::{FetchedMessage, MailError, Message, MessageFlags};

/// Map a raw fetched message to a [`Message`] record, without persisting it.
///
/// A missing header block is a hard error; missing optional fields degrade
/// to empty-string/zero defaults. The body is exactly one variant: HTML if
/// present, else plain text, else empty.
pub fn decode_message(fetched: &FetchedMessage) -> Result<Message, MailError> {
    let envelope = fetched.envelope.as_ref().ok_or_else(|| {
        MailError::MalformedMessage(format!("uid {}: no header block", fetched.uid))
    })?;

    let body = fetched
        .body
        .html
        .clone()
        .or_else(|| fetched.body.text.clone())
        .unwrap_or_default();

    let attachments = if fetched.parts.is_empty() {
        Default::default()
    } else {
        collect_attachments(&fetched.parts)
    };

    Ok(Message {
        uid: fetched.uid,
        num: fetched.num,
        from: envelope.from.clone().unwrap_or_default(),
        to: envelope.to.clone().unwrap_or_default(),
        from_email: envelope.from_addrs.first().cloned().unwrap_or_default(),
        to_email: envelope.to_addrs.first().cloned().unwrap_or_default(),
        subject: envelope.subject.clone().unwrap_or_default(),
        timestamp: envelope.timestamp.unwrap_or_default(),
        seen: fetched.flags.contains(MessageFlags::SEEN),
        flagged: fetched.flags.contains(MessageFlags::FLAGGED),
        body: Some(body),
        attachments,
        contact_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::types::{
        Envelope, MessageBody, PartLeaf, PartNode, PartType, TransferEncoding,
    };

    fn fetched_with_envelope() -> FetchedMessage {
        FetchedMessage {
            uid: 42,
            num: 7,
            envelope: Some(Envelope {
                from: Some("Alice <alice@example.com>".to_string()),
                to: Some("bob@example.com".to_string()),
                from_addrs: vec!["alice@example.com".to_string()],
                to_addrs: vec!["bob@example.com".to_string()],
                subject: Some("Hello".to_string()),
                timestamp: Some(1_700_000_000),
            }),
            flags: MessageFlags::SEEN,
            body: MessageBody::default(),
            parts: Vec::new(),
        }
    }

    #[test]
    fn test_missing_envelope_is_an_error() {
        let fetched = FetchedMessage::default();
        assert!(matches!(
            decode_message(&fetched),
            Err(MailError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_html_body_wins_over_text() {
        let mut fetched = fetched_with_envelope();
        fetched.body.text = Some("plain".to_string());
        fetched.body.html = Some("<p>rich</p>".to_string());

        let message = decode_message(&fetched).unwrap();
        assert_eq!(message.body.as_deref(), Some("<p>rich</p>"));
    }

    #[test]
    fn test_text_body_when_no_html() {
        let mut fetched = fetched_with_envelope();
        fetched.body.text = Some("plain".to_string());

        let message = decode_message(&fetched).unwrap();
        assert_eq!(message.body.as_deref(), Some("plain"));
    }

    #[test]
    fn test_no_body_variant_yields_empty_string() {
        let message = decode_message(&fetched_with_envelope()).unwrap();
        assert_eq!(message.body.as_deref(), Some(""));
    }

    #[test]
    fn test_optional_fields_default() {
        let fetched = FetchedMessage {
            uid: 1,
            envelope: Some(Envelope::default()),
            ..Default::default()
        };
        let message = decode_message(&fetched).unwrap();
        assert_eq!(message.from, "");
        assert_eq!(message.from_email, "");
        assert_eq!(message.subject, "");
        assert_eq!(message.timestamp, 0);
        assert!(!message.seen);
        assert!(!message.flagged);
    }

    #[test]
    fn test_part_tree_is_walked() {
        let mut fetched = fetched_with_envelope();
        fetched.parts = vec![
            PartNode::Leaf(PartLeaf {
                part_type: PartType::Text,
                ..Default::default()
            }),
            PartNode::Leaf(PartLeaf {
                part_type: PartType::Application,
                encoding: TransferEncoding::Base64,
                size: 256,
                disposition: Some("attachment".to_string()),
                ..Default::default()
            }),
        ];

        let message = decode_message(&fetched).unwrap();
        assert_eq!(message.attachments.attached.len(), 1);
        assert_eq!(message.attachments.attached[0].id, "2|256");
    }
}
