//! Mail layer: wire types, MIME structure walking, message decoding, and
//! the IMAP/SMTP connection handles.

pub mod decoder;
pub mod imap;
pub mod smtp;
pub mod structure;
pub mod types;
