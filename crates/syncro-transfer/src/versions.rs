//! History naming and version scanning
//!
//! Before a remote file is overwritten it is renamed into the history
//! directory as `<name>_<timestamp>`, with the timestamp formatted as
//! `yyyy-MM-ddTHH:mm:ss` in local time. Older archives may carry only a
//! date (`yyyy-MM-dd`); those are read as midnight of that day.
//!
//! The remote store is the only record of versions, so a scan simply lists
//! the history directory and parses whatever matches.

use chrono::{Local, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::error;

use syncro_core::ports::VersionHistory;

/// Full archive timestamp format
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Date-only format found on legacy archives
pub const LEGACY_DATE_FORMAT: &str = "%Y-%m-%d";

/// History entry name for `remote_name` archived at `at`
pub fn history_name(remote_name: &str, at: NaiveDateTime) -> String {
    format!("{remote_name}_{}", at.format(TIMESTAMP_FORMAT))
}

/// History entry name for `remote_name` archived now
pub fn history_name_now(remote_name: &str) -> String {
    history_name(remote_name, Local::now().naive_local())
}

/// Why a history entry could not be turned into a version record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("no '_' separator followed by a timestamp in '{0}'")]
    MissingSeparator(String),

    #[error("unparseable timestamp '{timestamp}' in '{entry}'")]
    BadTimestamp { entry: String, timestamp: String },
}

/// One archived copy: when it was archived and where it lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub timestamp: NaiveDateTime,
    pub remote_name: String,
}

impl VersionRecord {
    /// Parses `<anything>_<timestamp>` using the last `_` as separator
    pub fn parse(entry: &str) -> Result<Self, VersionParseError> {
        let separator = entry
            .rfind('_')
            .filter(|&idx| idx > 0 && idx < entry.len() - 1)
            .ok_or_else(|| VersionParseError::MissingSeparator(entry.to_string()))?;
        let suffix = &entry[separator + 1..];

        let timestamp = NaiveDateTime::parse_from_str(suffix, TIMESTAMP_FORMAT)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(suffix, LEGACY_DATE_FORMAT)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| VersionParseError::BadTimestamp {
                entry: entry.to_string(),
                timestamp: suffix.to_string(),
            })?;

        Ok(Self {
            timestamp,
            remote_name: entry.to_string(),
        })
    }
}

/// Builds the version history of `original_name` from a history listing
///
/// Entries are selected by substring match on `original_name`. Matching
/// entries whose timestamp cannot be parsed are logged and skipped.
pub fn collect_versions<I, S>(original_name: &str, entries: I) -> VersionHistory
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut history = VersionHistory::new();
    for entry in entries {
        let entry = entry.as_ref();
        if !entry.contains(original_name) {
            continue;
        }
        match VersionRecord::parse(entry) {
            Ok(record) => {
                history.insert(record.timestamp, record.remote_name);
            }
            Err(e) => error!(original = original_name, error = %e, "Skipping history entry"),
        }
    }
    history
}
