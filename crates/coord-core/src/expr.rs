//! The small expression layer between job definitions and the scheduler.
//!
//! Instance offsets arrive either as plain integers or as `${coord:current(n)}`
//! expressions; action properties may reference the resolved locations with
//! `${coord:dataIn('name')}` and friends. Nothing here touches the store.

use crate::error::{CoordError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

static CURRENT_RE: OnceLock<Regex> = OnceLock::new();
static CALL_RE: OnceLock<Regex> = OnceLock::new();

fn current_re() -> &'static Regex {
    CURRENT_RE.get_or_init(|| {
        Regex::new(r"^(?:\$\{\s*)?coord:current\(\s*(-?\d+)\s*\)(?:\s*\})?$").unwrap()
    })
}

fn call_re() -> &'static Regex {
    CALL_RE.get_or_init(|| {
        Regex::new(r"\$\{coord:(dataIn|dataOut|nominalTime|actionId)\(\s*(?:'([^']*)')?\s*\)\}")
            .unwrap()
    })
}

/// Evaluate an instance offset: `-3`, `coord:current(-3)` or
/// `${coord:current(-3)}`.
pub fn parse_offset(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Ok(n);
    }
    let caps = current_re()
        .captures(text)
        .ok_or_else(|| CoordError::InvalidExpression(text.to_string()))?;
    caps[1]
        .parse::<i64>()
        .map_err(|_| CoordError::InvalidExpression(text.to_string()))
}

/// Values available to action property expressions.
#[derive(Debug, Clone, Copy)]
pub struct PayloadScope<'a> {
    pub action_id: &'a str,
    pub nominal_time: DateTime<Utc>,
    pub inputs: &'a BTreeMap<String, Vec<String>>,
    pub outputs: &'a BTreeMap<String, Vec<String>>,
}

/// Expand `${coord:...}` calls in one property value. Calls naming an
/// unknown event are left untouched.
pub fn expand(value: &str, scope: &PayloadScope<'_>) -> String {
    call_re()
        .replace_all(value, |caps: &Captures| {
            let arg = caps.get(2).map(|m| m.as_str());
            let joined = |events: &BTreeMap<String, Vec<String>>| {
                arg.and_then(|name| events.get(name)).map(|locs| locs.join(","))
            };
            let expanded = match &caps[1] {
                "dataIn" => joined(scope.inputs),
                "dataOut" => joined(scope.outputs),
                "nominalTime" => Some(scope.nominal_time.to_rfc3339_opts(SecondsFormat::Secs, true)),
                "actionId" => Some(scope.action_id.to_string()),
                _ => None,
            };
            expanded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn expand_all(
    properties: &BTreeMap<String, String>,
    scope: &PayloadScope<'_>,
) -> BTreeMap<String, String> {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), expand(v, scope)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offsets_accept_plain_and_expression_forms() {
        assert_eq!(parse_offset("-3").unwrap(), -3);
        assert_eq!(parse_offset("0").unwrap(), 0);
        assert_eq!(parse_offset("${coord:current(-3)}").unwrap(), -3);
        assert_eq!(parse_offset(" coord:current( 2 ) ").unwrap(), 2);
        assert!(parse_offset("${coord:latest(-1)}").is_err());
        assert!(parse_offset("yesterday").is_err());
    }

    #[test]
    fn expands_data_references() {
        let inputs = BTreeMap::from([(
            "A".to_string(),
            vec!["/2009/22".to_string(), "/2009/29".to_string()],
        )]);
        let outputs = BTreeMap::from([("OUT".to_string(), vec!["/out/2009/29".to_string()])]);
        let scope = PayloadScope {
            action_id: "job-C@1",
            nominal_time: Utc.with_ymd_and_hms(2009, 2, 1, 23, 59, 0).unwrap(),
            inputs: &inputs,
            outputs: &outputs,
        };

        assert_eq!(expand("${coord:dataIn('A')}", &scope), "/2009/22,/2009/29");
        assert_eq!(expand("out=${coord:dataOut('OUT')}", &scope), "out=/out/2009/29");
        assert_eq!(
            expand("${coord:nominalTime()} ${coord:actionId()}", &scope),
            "2009-02-01T23:59:00Z job-C@1"
        );
        assert_eq!(expand("${coord:dataIn('B')}", &scope), "${coord:dataIn('B')}");
        assert_eq!(expand("${wf:user()}", &scope), "${wf:user()}");
    }
}
