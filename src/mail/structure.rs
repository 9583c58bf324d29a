//! MIME structure walker: classifies a message's part tree into attachment
//! descriptors grouped by disposition.
//!
//! Section addresses follow IMAP part numbering: 1-based sibling index,
//! joined to the parent's address with `.` (root-level parts are bare
//! integers). The traversal is a single depth-first pass; bucket order is
//! discovery order.

use super::types::{Attachment, Attachments, Disposition, PartLeaf, PartNode};

/// Walk a message's part tree and collect attachment descriptors.
pub fn collect_attachments(parts: &[PartNode]) -> Attachments {
    let mut out = Attachments::default();
    walk(parts, "", &mut out);
    out
}

fn walk(parts: &[PartNode], prefix: &str, out: &mut Attachments) {
    for (index, node) in parts.iter().enumerate() {
        let section = if prefix.is_empty() {
            (index + 1).to_string()
        } else {
            format!("{}.{}", prefix, index + 1)
        };
        match node {
            PartNode::Container { children } => walk(children, &section, out),
            PartNode::Leaf(leaf) => {
                if let Some((disposition, attachment)) = classify(leaf, &section) {
                    out.push(disposition, attachment);
                }
            }
        }
    }
}

/// Evaluate one leaf part. Inline-body classes (text, multipart, message)
/// are never attachments; parts without a recognized disposition are
/// dropped silently.
fn classify(leaf: &PartLeaf, section: &str) -> Option<(Disposition, Attachment)> {
    if leaf.part_type.is_inline_body() {
        return None;
    }

    let disposition = match leaf.disposition.as_deref() {
        Some(d) if d.eq_ignore_ascii_case("inline") => Disposition::Inline,
        Some(d) if d.eq_ignore_ascii_case("attachment") => Disposition::Attachment,
        _ => return None,
    };

    let id = match &leaf.content_id {
        Some(cid) => cid.clone(),
        None => format!("{}|{}", section, leaf.size),
    };
    let name = leaf
        .param("name")
        .or_else(|| leaf.disposition_param("filename"))
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());

    Some((
        disposition,
        Attachment {
            section: section.to_string(),
            id,
            name,
            part_type: leaf.part_type,
            size: leaf.size,
            encoding: leaf.encoding,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::types::{PartType, TransferEncoding};

    fn leaf(part_type: PartType, size: u32, disposition: Option<&str>) -> PartLeaf {
        PartLeaf {
            part_type,
            encoding: TransferEncoding::Base64,
            content_id: None,
            size,
            disposition: disposition.map(str::to_string),
            params: Vec::new(),
            disposition_params: Vec::new(),
        }
    }

    #[test]
    fn test_id_falls_back_to_section_and_size() {
        // Root part 1 is a text body; part 2 is a container whose first
        // child is the attachment, so its section is "2.1".
        let tree = vec![
            PartNode::Leaf(leaf(PartType::Text, 40, None)),
            PartNode::Container {
                children: vec![PartNode::Leaf(leaf(
                    PartType::Application,
                    512,
                    Some("attachment"),
                ))],
            },
        ];

        let attachments = collect_attachments(&tree);
        assert_eq!(attachments.attached.len(), 1);
        assert_eq!(attachments.attached[0].id, "2.1|512");
        assert_eq!(attachments.attached[0].section, "2.1");
        // Without a name parameter or filename, the name falls back to the id.
        assert_eq!(attachments.attached[0].name, "2.1|512");
    }

    #[test]
    fn test_content_id_used_verbatim() {
        let mut part = leaf(PartType::Image, 1024, Some("inline"));
        part.content_id = Some("<logo@example>".to_string());
        let tree = vec![PartNode::Leaf(part)];

        let attachments = collect_attachments(&tree);
        assert_eq!(attachments.inline.len(), 1);
        assert_eq!(attachments.inline[0].id, "<logo@example>");
    }

    #[test]
    fn test_name_resolution_order() {
        let mut named = leaf(PartType::Application, 10, Some("attachment"));
        named.params = vec![("NAME".to_string(), "report.pdf".to_string())];
        named.disposition_params = vec![("FILENAME".to_string(), "ignored.pdf".to_string())];

        let mut filenamed = leaf(PartType::Application, 20, Some("attachment"));
        filenamed.disposition_params = vec![("FILENAME".to_string(), "notes.txt".to_string())];

        let tree = vec![PartNode::Leaf(named), PartNode::Leaf(filenamed)];
        let attachments = collect_attachments(&tree);

        // Content-Type NAME wins over Content-Disposition FILENAME.
        assert_eq!(attachments.attached[0].name, "report.pdf");
        assert_eq!(attachments.attached[1].name, "notes.txt");
    }

    #[test]
    fn test_missing_disposition_is_dropped() {
        let tree = vec![
            PartNode::Leaf(leaf(PartType::Application, 100, None)),
            PartNode::Leaf(leaf(PartType::Application, 100, Some("x-unknown"))),
        ];
        assert!(collect_attachments(&tree).is_empty());
    }

    #[test]
    fn test_inline_body_classes_are_never_attachments() {
        let tree = vec![
            PartNode::Leaf(leaf(PartType::Text, 100, Some("attachment"))),
            PartNode::Leaf(leaf(PartType::Message, 100, Some("attachment"))),
        ];
        assert!(collect_attachments(&tree).is_empty());
    }

    #[test]
    fn test_depth_first_sibling_order() {
        let tree = vec![
            PartNode::Container {
                children: vec![
                    PartNode::Leaf(leaf(PartType::Image, 1, Some("attachment"))),
                    PartNode::Container {
                        children: vec![PartNode::Leaf(leaf(
                            PartType::Audio,
                            2,
                            Some("attachment"),
                        ))],
                    },
                ],
            },
            PartNode::Leaf(leaf(PartType::Video, 3, Some("attachment"))),
        ];

        let attachments = collect_attachments(&tree);
        let sections: Vec<&str> = attachments
            .attached
            .iter()
            .map(|a| a.section.as_str())
            .collect();
        assert_eq!(sections, vec!["1.1", "1.2.1", "2"]);
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let tree = vec![
            PartNode::Leaf(leaf(PartType::Text, 5, None)),
            PartNode::Leaf(leaf(PartType::Application, 9, Some("attachment"))),
            PartNode::Leaf(leaf(PartType::Image, 7, Some("INLINE"))),
        ];
        assert_eq!(collect_attachments(&tree), collect_attachments(&tree));
    }
}
