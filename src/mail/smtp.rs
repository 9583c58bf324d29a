//! Outbound SMTP transport built on lettre's STARTTLS relay.

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;

use super::types::MailError;

pub struct SmtpConnection {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    errors: Vec<String>,
}

impl SmtpConnection {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(config.login.clone(), config.password.clone());

        // Always require TLS - plaintext SMTP exposes credentials
        if !config.tls {
            tracing::warn!("SMTP TLS disabled in config - enabling anyway for security");
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
            .port(config.port)
            .credentials(creds)
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .build();

        Ok(Self {
            transport,
            from: config.login.clone(),
            errors: Vec::new(),
        })
    }

    /// Probe the relay with a NOOP round-trip. A failure appends a
    /// diagnostic instead of raising.
    pub async fn check_connection(&mut self) -> bool {
        match self.transport.test_connection().await {
            Ok(true) => true,
            Ok(false) => {
                self.errors
                    .push("SMTP server rejected the connection test".to_string());
                false
            }
            Err(err) => {
                self.errors.push(format!("SMTP connection failed: {err}"));
                false
            }
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Send a multipart/alternative message (HTML plus a derived plain-text
    /// part) from the tenant's configured address. Recipient arguments
    /// accept comma-separated lists. Returns the built message, whose raw
    /// RFC 2822 form is what gets filed in the sent folder.
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        cc: Option<&str>,
        bcc: Option<&str>,
    ) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.from)?)
            .subject(subject);

        for mailbox in parse_mailbox_list(to)? {
            builder = builder.to(mailbox);
        }
        if let Some(cc) = cc {
            for mailbox in parse_mailbox_list(cc)? {
                builder = builder.cc(mailbox);
            }
        }
        if let Some(bcc) = bcc {
            for mailbox in parse_mailbox_list(bcc)? {
                builder = builder.bcc(mailbox);
            }
        }

        let plain = html2text::from_read(html_body.as_bytes(), 80)
            .unwrap_or_else(|_| html_body.to_string());
        let message = builder.multipart(MultiPart::alternative_plain_html(
            plain,
            html_body.to_string(),
        ))?;

        self.transport.send(message.clone()).await?;
        tracing::info!(to, subject, "message sent");
        Ok(message)
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, MailError> {
    addr.parse::<Mailbox>()
        .map_err(|_| MailError::InvalidAddress(addr.to_string()))
}

/// Parse a comma-separated recipient list, ignoring empty entries (so
/// trailing commas are harmless).
fn parse_mailbox_list(list: &str) -> Result<Vec<Mailbox>, MailError> {
    list.split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(parse_mailbox)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mailbox_list_handles_trailing_comma() {
        let mailboxes = parse_mailbox_list("a@example.com, b@example.com,").unwrap();
        assert_eq!(mailboxes.len(), 2);
    }

    #[test]
    fn test_parse_mailbox_rejects_garbage() {
        assert!(matches!(
            parse_mailbox("not an address"),
            Err(MailError::InvalidAddress(_))
        ));
    }
}
