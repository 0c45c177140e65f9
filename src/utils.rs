//! Utility functions for clock parsing, string manipulation, and file system operations.
//!
//! This module provides helper functions used throughout the service:
//! - `HH:MM` parsing for the configured generate/push times
//! - String truncation for logs and slugification for artifact file names
//! - File system validation for the artifact and progress directories

use chrono::{DateTime, FixedOffset, NaiveTime};
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument, warn};

/// Fallback time used when a configured time of day cannot be parsed.
pub const FALLBACK_TIME: (u32, u32) = (8, 0);

/// Parse a `HH:MM` time of day.
///
/// Unparsable or out-of-range input falls back to 08:00 with a warning, so a
/// bad setting never stops the scheduler.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(parse_clock_time("07:30"), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
/// assert_eq!(parse_clock_time("soon"), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
/// ```
pub fn parse_clock_time(raw: &str) -> NaiveTime {
    let parsed = raw.trim().split_once(':').and_then(|(h, m)| {
        let hour = h.trim().parse::<u32>().ok()?;
        let minute = m.trim().parse::<u32>().ok()?;
        NaiveTime::from_hms_opt(hour, minute, 0)
    });

    match parsed {
        Some(time) => time,
        None => {
            warn!(value = %raw, "Could not parse time of day; falling back to 08:00");
            NaiveTime::from_hms_opt(FALLBACK_TIME.0, FALLBACK_TIME.1, 0).unwrap_or(NaiveTime::MIN)
        }
    }
}

/// Format a date as `YYYY-MM-DD`, the representation stored in progress files.
pub fn date_string(now: &DateTime<FixedOffset>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut after `max` characters with an ellipsis and a
/// remaining-characters indicator appended. Cuts always land on a character
/// boundary, so CJK content is safe.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 chars)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}…(+{} chars)", head, total - max)
    }
}

/// Convert text to a file-name friendly slug.
///
/// Lowercases, drops everything that is not alphanumeric, space or hyphen,
/// and joins words with hyphens. Non-ASCII letters (kana, hanzi) are kept.
/// An input with nothing left becomes `"entry"`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("???"), "entry");
/// ```
pub fn slugify(text: &str) -> String {
    let slug = text
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "entry".to_string()
    } else {
        slug
    }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
