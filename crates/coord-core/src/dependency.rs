//! Existence checks for concrete dependency locations.

use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// A failed existence probe. Always treated as "not present yet".
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("transient error probing {location}: {reason}")]
    Transient { location: String, reason: String },

    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
}

/// Answers whether a concrete location currently exists.
///
/// The location scheme is opaque to the scheduler: a path, a URI, an object
/// key. Implementations may block on I/O.
pub trait ExistenceOracle: Send + Sync {
    fn exists(&self, location: &str) -> Result<bool, OracleError>;
}

/// Outcome of one pass over a list of locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub satisfied: BTreeSet<String>,
    /// Missing locations in the order they were requested, without repeats.
    pub missing: Vec<String>,
}

impl CheckReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Probe every location once.
///
/// A probe error marks only that location as missing; the remaining
/// locations are still checked. No retries happen here.
pub fn check_all(oracle: &dyn ExistenceOracle, locations: &[String]) -> CheckReport {
    let mut report = CheckReport::default();
    for location in locations {
        if report.satisfied.contains(location) || report.missing.contains(location) {
            continue;
        }
        match oracle.exists(location) {
            Ok(true) => {
                report.satisfied.insert(location.clone());
            }
            Ok(false) => report.missing.push(location.clone()),
            Err(e) => {
                tracing::warn!(location = %location, error = %e, "existence check failed, treating as missing");
                report.missing.push(location.clone());
            }
        }
    }
    report
}

/// The path that must exist for `location` to count as present.
pub fn probe_target(location: &str, done_flag: Option<&str>) -> String {
    match done_flag {
        Some(flag) if !flag.is_empty() => {
            format!("{}/{}", location.trim_end_matches('/'), flag)
        }
        _ => location.to_string(),
    }
}

// ---------------------------------------------------------------------------
// FsOracle
// ---------------------------------------------------------------------------

/// Local filesystem oracle for `file://` URIs and bare paths.
#[derive(Debug, Clone, Default)]
pub struct FsOracle;

impl ExistenceOracle for FsOracle {
    fn exists(&self, location: &str) -> Result<bool, OracleError> {
        let path = match location.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => return Err(OracleError::UnsupportedScheme(scheme.to_string())),
            None => location,
        };
        Path::new(path)
            .try_exists()
            .map_err(|e| OracleError::Transient {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct FlakyOracle {
        present: HashSet<&'static str>,
        failing: HashSet<&'static str>,
    }

    impl ExistenceOracle for FlakyOracle {
        fn exists(&self, location: &str) -> Result<bool, OracleError> {
            if self.failing.contains(location) {
                return Err(OracleError::Transient {
                    location: location.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            Ok(self.present.contains(location))
        }
    }

    fn locs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partitions_and_keeps_request_order() {
        let oracle = FlakyOracle {
            present: HashSet::from(["/b"]),
            failing: HashSet::new(),
        };
        let report = check_all(&oracle, &locs(&["/d", "/b", "/a", "/d"]));
        assert_eq!(report.missing, locs(&["/d", "/a"]));
        assert!(report.satisfied.contains("/b"));
        assert!(!report.is_complete());
    }

    #[test]
    fn transient_error_is_missing_not_fatal() {
        let oracle = FlakyOracle {
            present: HashSet::from(["/a", "/c"]),
            failing: HashSet::from(["/b"]),
        };
        let report = check_all(&oracle, &locs(&["/a", "/b", "/c"]));
        assert_eq!(report.missing, locs(&["/b"]));
        assert_eq!(report.satisfied.len(), 2);
    }

    #[test]
    fn probe_target_appends_done_flag() {
        assert_eq!(probe_target("/x/2009/15/", Some("_SUCCESS")), "/x/2009/15/_SUCCESS");
        assert_eq!(probe_target("/x/2009/15", Some("_SUCCESS")), "/x/2009/15/_SUCCESS");
        assert_eq!(probe_target("/x/2009/15", None), "/x/2009/15");
        assert_eq!(probe_target("/x/2009/15", Some("")), "/x/2009/15");
    }

    #[test]
    fn fs_oracle_handles_file_uris_and_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("2009/29")).unwrap();
        let base = dir.path().display().to_string();

        let oracle = FsOracle;
        assert!(oracle.exists(&format!("file://{base}/2009/29")).unwrap());
        assert!(oracle.exists(&format!("{base}/2009/29/")).unwrap());
        assert!(!oracle.exists(&format!("file://{base}/2009/15")).unwrap());
        assert!(matches!(
            oracle.exists("hdfs://nn/2009/29"),
            Err(OracleError::UnsupportedScheme(_))
        ));
    }
}
