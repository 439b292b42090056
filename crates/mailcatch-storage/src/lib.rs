//! MailCatch Storage - Recipient artifacts and weekly index
//!
//! This crate owns everything written under the mail root: per-recipient
//! message artifacts and the per-week JSON indexes.

pub mod file;
pub mod index;
pub mod locks;

pub use file::{create_storage, ArtifactWriter, FileStorage, LocalStorage, RecipientFolder, RecipientStore};
pub use index::WeeklyIndexManager;
pub use locks::{KeyedGuard, KeyedLocks};
