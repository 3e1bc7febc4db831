//! Dataset definitions and the dependency expressions that reference them.

use crate::types::{EndOfDuration, TimeUnit};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A named, time-partitioned data source.
///
/// Instance `k` of the dataset sits at `initial_instance + k * frequency`
/// units, computed on the wall clock of `timezone`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub frequency: u32,
    pub unit: TimeUnit,
    pub timezone: Tz,
    pub initial_instance: DateTime<Utc>,
    #[serde(default)]
    pub end_of_duration: EndOfDuration,
    /// Location with `${YEAR}`, `${MONTH}`, `${DAY}`, `${HOUR}`, `${MINUTE}`
    /// placeholders.
    pub uri_template: String,
    /// File that must exist inside a location before it counts as present.
    #[serde(default)]
    pub done_flag: Option<String>,
}

/// Which instances of a dataset an expression selects, as offsets from the
/// instance current at the action's nominal time.
///
/// Offsets count in units of the dataset's own frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceSelector {
    Current { offset: i64 },
    Range { start: i64, end: i64 },
}

/// A named reference from a job to one or more dataset instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyExpr {
    pub name: String,
    pub dataset: String,
    pub selector: InstanceSelector,
}

/// A dependency expression with its instances resolved for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundDependency {
    pub name: String,
    pub dataset: String,
    pub instances: Vec<DateTime<Utc>>,
    pub locations: Vec<String>,
}
