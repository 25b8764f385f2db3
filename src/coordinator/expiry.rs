//! Expiry derivation for resolved URLs.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Query parameter carrying the signed URL's unix expiry.
const EXPIRE_PARAM: &str = "expire";

/// Expiry embedded in a signed URL's query string, if present and parseable.
pub fn url_expiry(url: &str) -> Option<DateTime<Utc>> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let (_, value) = parsed.query_pairs().find(|(key, _)| key == EXPIRE_PARAM)?;
    let secs: i64 = value.trim().parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Absolute expiry for a fresh resolution.
///
/// Preference order: the URL's own `expire` parameter (less `margin`), the
/// resolver's hint, then `now + default_horizon`.
pub fn compute_expiry(
    url: &str,
    hint: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    margin: Duration,
    default_horizon: Duration,
) -> DateTime<Utc> {
    // An `expire` too close to the representable minimum falls through.
    if let Some(expiry) = url_expiry(url).and_then(|e| e.checked_sub_signed(to_chrono(margin))) {
        return expiry;
    }
    if let Some(hint) = hint {
        return hint;
    }
    now.checked_add_signed(to_chrono(default_horizon))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
