//! Common types for MailCatch

use chrono::{DateTime, Datelike, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Render a UTC instant the way artifact labels and summaries carry it,
/// e.g. `2024-03-05T10:15:30.123Z`.
pub fn format_timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter keeping `processedAt` at millisecond precision.
mod timestamp_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Outcome record for one inbound message attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    /// Storage folder of the recipient
    pub recipient_folder_path: String,

    /// Identifier assigned by the transport
    pub message_id: String,

    /// Instant raw capture began
    #[serde(with = "timestamp_millis")]
    pub processed_at: DateTime<Utc>,

    /// First sender address, on successful decode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Decoded artifact name; empty when decoding failed
    #[serde(default)]
    pub filename: String,

    /// Decode failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Persistence failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_err: Option<String>,
}

impl TransactionSummary {
    /// Start a summary for a message whose capture begins at `processed_at`,
    /// kept at the millisecond precision it is stored with.
    pub fn begin(
        recipient_folder_path: impl Into<String>,
        message_id: impl Into<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient_folder_path: recipient_folder_path.into(),
            message_id: message_id.into(),
            processed_at: processed_at.trunc_subsecs(3),
            from: None,
            subject: None,
            filename: String::new(),
            error: None,
            write_err: None,
        }
    }

    /// Base name shared by the raw, decoded and error artifacts
    pub fn label(&self) -> String {
        format!("{}-{}", format_timestamp(&self.processed_at), self.message_id)
    }

    /// Bucket this summary belongs to
    pub fn bucket(&self) -> BucketName {
        BucketName::for_instant(&self.processed_at)
    }

    /// True when the message decoded and its artifact was named
    pub fn is_decoded(&self) -> bool {
        !self.filename.is_empty()
    }
}

/// ISO week bucket key, rendered as `w<week>-<year>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketName {
    pub year: i32,
    pub week: u32,
}

impl BucketName {
    pub fn new(year: i32, week: u32) -> Self {
        Self { year, week }
    }

    /// Bucket of a UTC instant, using ISO week-numbering year and week
    pub fn for_instant(instant: &DateTime<Utc>) -> Self {
        let iso = instant.iso_week();
        Self::new(iso.year(), iso.week())
    }

    /// Bucket of the present UTC instant
    pub fn current() -> Self {
        Self::for_instant(&Utc::now())
    }

    /// File name of the bucket under the mail root
    pub fn file_name(&self) -> String {
        format!("{}.json", self)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}-{}", self.week, self.year)
    }
}

/// All summaries captured during one ISO week, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyIndex {
    pub name: String,
    #[serde(default)]
    pub messages: Vec<TransactionSummary>,
}

impl WeeklyIndex {
    /// A bucket with no messages yet
    pub fn empty(bucket: BucketName) -> Self {
        Self {
            name: bucket.to_string(),
            messages: Vec::new(),
        }
    }

    /// Put `summary` at the front, keeping newest-first order
    pub fn prepend(&mut self, summary: TransactionSummary) {
        self.messages.insert(0, summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn instant(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 15, 30).unwrap()
            + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_label_uses_millisecond_timestamp() {
        let summary = TransactionSummary::begin("mail/user@example.com", "abc123", instant(2024, 3, 5));
        assert_eq!(summary.label(), "2024-03-05T10:15:30.123Z-abc123");
    }

    #[test]
    fn test_bucket_name() {
        assert_eq!(BucketName::for_instant(&instant(2024, 3, 5)).to_string(), "w10-2024");
        assert_eq!(BucketName::new(2024, 10).file_name(), "w10-2024.json");
        // 2021-01-01 belongs to the last ISO week of 2020
        assert_eq!(BucketName::for_instant(&instant(2021, 1, 1)).to_string(), "w53-2020");
    }

    #[test]
    fn test_summary_json_shape() {
        let mut summary = TransactionSummary::begin("mail/user@example.com", "abc", instant(2024, 3, 5));
        summary.filename = "x.json".to_string();
        summary.subject = Some("Hello".to_string());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "recipientFolderPath": "mail/user@example.com",
                "messageId": "abc",
                "processedAt": "2024-03-05T10:15:30.123Z",
                "subject": "Hello",
                "filename": "x.json",
            })
        );

        let back: TransactionSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_prepend_keeps_newest_first() {
        let mut index = WeeklyIndex::empty(BucketName::new(2024, 10));
        index.prepend(TransactionSummary::begin("a", "1", instant(2024, 3, 5)));
        index.prepend(TransactionSummary::begin("a", "2", instant(2024, 3, 6)));

        let ids: Vec<_> = index.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(index.name, "w10-2024");
    }
}
