//! MailCatch Common - Shared types and utilities
//!
//! This crate provides configuration, the error taxonomy, the captured-mail
//! data model and the filename sanitizer shared across all MailCatch crates.

pub mod config;
pub mod error;
pub mod sanitize;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use sanitize::sanitize_filename;
pub use types::{format_timestamp, BucketName, TransactionSummary, WeeklyIndex};
