//! Contact directory used by the privacy rule during import.

mod db;

pub use db::ContactsDb;
