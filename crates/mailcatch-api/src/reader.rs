//! Read API facade
//!
//! Resolves listing and fetch requests against what the capture pipeline
//! wrote. Nothing here mutates the mail root or takes index locks.

use chrono::{DateTime, Datelike, Utc};
use mailcatch_common::{format_timestamp, BucketName, Error, Result, TransactionSummary};
use mailcatch_storage::{FileStorage, RecipientStore, WeeklyIndexManager};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Bytes escaped when a folder or file name becomes one path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Link to a decoded message artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageLink {
    pub href: String,
}

/// Summary as listed by the API: the storage path is replaced by the
/// recipient name and a link to the decoded artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryView {
    pub recipient: String,
    pub message_id: String,
    pub processed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_err: Option<String>,
    pub message: Option<MessageLink>,
}

impl SummaryView {
    fn from_summary(summary: TransactionSummary) -> Self {
        let recipient = summary
            .recipient_folder_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let message = if summary.filename.is_empty() {
            None
        } else {
            let (username, domain) = recipient.rsplit_once('@').unwrap_or((recipient.as_str(), ""));
            Some(MessageLink {
                href: format!(
                    "/mail/{}/{}/{}",
                    utf8_percent_encode(domain, PATH_SEGMENT),
                    utf8_percent_encode(username, PATH_SEGMENT),
                    utf8_percent_encode(&summary.filename, PATH_SEGMENT)
                ),
            })
        };

        Self {
            message,
            message_id: summary.message_id,
            processed_at: format_timestamp(&summary.processed_at),
            from: summary.from,
            subject: summary.subject,
            filename: summary.filename,
            error: summary.error,
            write_err: summary.write_err,
            recipient,
        }
    }
}

/// Read-only access to buckets and recipient artifacts
pub struct MailReader<S: FileStorage> {
    storage: Arc<S>,
    index: Arc<WeeklyIndexManager<S>>,
    store: RecipientStore<S>,
}

impl<S: FileStorage> MailReader<S> {
    /// Create a reader over the same storage and index the capture side uses
    pub fn new(storage: Arc<S>, index: Arc<WeeklyIndexManager<S>>, root_label: &str) -> Self {
        Self {
            store: RecipientStore::new(storage.clone(), root_label),
            storage,
            index,
        }
    }

    /// Summaries of one ISO week, newest first. A bucket that was never
    /// written lists as empty.
    pub async fn list_bucket(&self, year: i32, week: u32) -> Vec<SummaryView> {
        self.index
            .load(BucketName::new(year, week))
            .await
            .messages
            .into_iter()
            .map(SummaryView::from_summary)
            .collect()
    }

    /// Year and week the listing redirect points at
    pub fn current_bucket_redirect_target(&self) -> (i32, u32) {
        bucket_at(&Utc::now())
    }

    /// Decoded artifact for `username@domain`. Every failure is `NotFound`.
    pub async fn fetch_message(&self, domain: &str, username: &str, file_name: &str) -> Result<Value> {
        let folder = self.store.folder_for(&format!("{}@{}", username, domain));
        if !is_plain_file_name(file_name) {
            return Err(Error::NotFound(format!("{}/{}", folder.name, file_name)));
        }

        let data = self
            .store
            .read_artifact(&folder, file_name)
            .await
            .map_err(|e| {
                debug!(folder = %folder.path, file = %file_name, error = %e, "Artifact unavailable");
                Error::NotFound(format!("{}/{}", folder.name, file_name))
            })?;

        serde_json::from_slice(&data).map_err(|e| {
            debug!(folder = %folder.path, file = %file_name, error = %e, "Artifact is not JSON");
            Error::NotFound(format!("{}/{}", folder.name, file_name))
        })
    }

    /// True while the mail root is reachable
    pub async fn is_ready(&self) -> bool {
        self.storage.exists(".").await.unwrap_or(false)
    }
}

/// Artifact names are single path segments; labels keep their `:`
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn bucket_at(instant: &DateTime<Utc>) -> (i32, u32) {
    let week = instant.iso_week();
    (week.year(), week.week())
}
