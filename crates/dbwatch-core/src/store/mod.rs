//! Core store: system configuration and the managed-database registry.
//!
//! A single SQLite file holds both tables. All statements come from the
//! closed `Statement` set so the prepared-statement cache stays bounded.

mod metadata_store;
pub mod schema;
mod statements;

pub use metadata_store::{open_connection, ExecuteSummary, MetadataStore, StoreTx};
pub use statements::Statement;

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as fixed-width RFC 3339, so stored timestamps sort lexically.
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Unparseable values map to the Unix epoch.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2024-01-01T00:00:01Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(parse_timestamp(&format_timestamp(later)), later);
    }

    #[test]
    fn test_parse_timestamp_falls_back_to_epoch() {
        assert_eq!(parse_timestamp("not a date"), DateTime::<Utc>::UNIX_EPOCH);
    }
}
