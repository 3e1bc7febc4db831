//! Turns a dataset's location template into a concrete location.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use regex::{Captures, Regex};
use std::sync::OnceLock;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Substitute `${YEAR}`, `${MONTH}`, `${DAY}`, `${HOUR}` and `${MINUTE}` with
/// the fields of `timestamp` as seen in `timezone`.
///
/// Year is four digits, the rest two. Any other `${...}` token is kept as
/// literal text.
pub fn materialize(template: &str, timestamp: DateTime<Utc>, timezone: Tz) -> String {
    let local = timestamp.with_timezone(&timezone);
    placeholder_re()
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "YEAR" => format!("{:04}", local.year()),
            "MONTH" => format!("{:02}", local.month()),
            "DAY" => format!("{:02}", local.day()),
            "HOUR" => format!("{:02}", local.hour()),
            "MINUTE" => format!("{:02}", local.minute()),
            _ => caps[0].to_string(),
        })
        .into_owned()
}
