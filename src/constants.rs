//! Application-wide constants for tuning and configuration
//!
//! Centralizes magic numbers to make them discoverable and configurable.

/// Messages per listing page when the caller does not ask for a size.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// SQLite connection pool size for the shared cache database.
pub const POOL_SIZE: u32 = 16;

/// How long a writer waits on a locked SQLite database before erroring.
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

/// Case-insensitive substring that identifies the remote sent folder.
pub const SENT_FOLDER_HINT: &str = "sent";

/// Default IMAP port (implicit TLS).
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Default SMTP submission port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;
