//! Time utilities for sentinel-deploy
//!
//! Timestamps in history entries and reports are RFC 3339 UTC; run ids are
//! derived from the start time so they sort chronologically.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format used for timestamp-derived deployment ids
const DEPLOY_ID_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Current time as an RFC 3339 string with millisecond precision.
///
/// # Examples
/// ```
/// use sd_core::time::now_rfc3339;
///
/// let now = now_rfc3339();
/// assert!(now.ends_with('Z'));
/// ```
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

/// Format an instant the way history entries and reports store it
pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Deployment id for a run started at `at`
pub fn deploy_id_at(at: DateTime<Utc>) -> String {
    at.format(DEPLOY_ID_FORMAT).to_string()
}

/// Seconds elapsed between two instants, never negative
pub fn elapsed_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
