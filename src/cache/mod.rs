//! Local message cache backed by SQLite.

mod db;

pub use db::Cache;
