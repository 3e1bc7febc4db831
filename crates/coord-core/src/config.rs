use crate::dataset::{Dataset, DependencyExpr, InstanceSelector};
use crate::error::{CoordError, Result};
use crate::expr;
use crate::job::CoordinatorJob;
use crate::paths;
use crate::time::MAX_RANGE_INSTANCES;
use crate::types::{
    Concurrency, EndBound, EndOfDuration, ExecutionOrder, JobStatus, TimeUnit, TimeoutBasis,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Offsets
// ---------------------------------------------------------------------------

/// An instance offset as written in a job definition: `-3` or
/// `${coord:current(-3)}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OffsetExpr {
    Index(i64),
    Expr(String),
}

impl OffsetExpr {
    pub fn value(&self) -> Result<i64> {
        match self {
            OffsetExpr::Index(n) => Ok(*n),
            OffsetExpr::Expr(text) => expr::parse_offset(text),
        }
    }
}

// ---------------------------------------------------------------------------
// JobDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDefinition {
    pub name: String,
    pub frequency: u32,
    pub unit: TimeUnit,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub initial_instance: DateTime<Utc>,
    #[serde(default)]
    pub end_of_duration: EndOfDuration,
    pub uri_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_flag: Option<String>,
}

/// An input or output event. Either `instance` or both `start_instance` and
/// `end_instance` must be given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDefinition {
    pub name: String,
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<OffsetExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_instance: Option<OffsetExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_instance: Option<OffsetExpr>,
}

impl EventDefinition {
    fn selector(&self) -> Result<InstanceSelector> {
        let invalid = |why: &str| CoordError::InvalidConfig(format!("event '{}': {why}", self.name));
        match (&self.instance, &self.start_instance, &self.end_instance) {
            (Some(offset), None, None) => Ok(InstanceSelector::Current {
                offset: offset.value()?,
            }),
            (None, Some(start), Some(end)) => {
                let (start, end) = (start.value()?, end.value()?);
                let width = end.checked_sub(start).and_then(|w| w.checked_add(1));
                if width.map_or(true, |w| w > MAX_RANGE_INSTANCES) {
                    return Err(invalid(&format!(
                        "range spans more than {MAX_RANGE_INSTANCES} instances"
                    )));
                }
                Ok(InstanceSelector::Range { start, end })
            }
            (Some(_), _, _) => Err(invalid("'instance' excludes 'start_instance'/'end_instance'")),
            _ => Err(invalid("needs 'instance' or both 'start_instance' and 'end_instance'")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Controls {
    /// Minutes an action may wait for its inputs. Absent means forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub timeout_basis: TimeoutBasis,
    #[serde(default)]
    pub concurrency: Concurrency,
    #[serde(default)]
    pub execution: ExecutionOrder,
}

/// A coordinator job as submitted in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub frequency: u32,
    pub unit: TimeUnit,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub end_bound: EndBound,
    #[serde(default)]
    pub controls: Controls,
    #[serde(default)]
    pub datasets: Vec<DatasetDefinition>,
    #[serde(default)]
    pub inputs: Vec<EventDefinition>,
    #[serde(default)]
    pub outputs: Vec<EventDefinition>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]{0,63}$").unwrap())
}

fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CoordError::InvalidTimezone(name.to_string()))
}

impl JobDefinition {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    /// Reject definitions the scheduler cannot run. Offsets are checked for
    /// syntax only; whether an offset resolves depends on the nominal time.
    pub fn validate(&self) -> Result<()> {
        if !name_re().is_match(&self.name) {
            return Err(CoordError::InvalidConfig(format!(
                "job name '{}' must be alphanumeric, '-' or '_'",
                self.name
            )));
        }
        if self.frequency == 0 {
            return Err(CoordError::InvalidConfig(
                "job frequency must be positive".to_string(),
            ));
        }
        parse_tz(&self.timezone)?;
        if self.end <= self.start {
            return Err(CoordError::InvalidConfig(format!(
                "end {} is not after start {}",
                self.end, self.start
            )));
        }

        let mut names = HashSet::new();
        for ds in &self.datasets {
            if !names.insert(ds.name.as_str()) {
                return Err(CoordError::InvalidConfig(format!(
                    "dataset '{}' is defined twice",
                    ds.name
                )));
            }
            if ds.frequency == 0 {
                return Err(CoordError::InvalidConfig(format!(
                    "dataset '{}' frequency must be positive",
                    ds.name
                )));
            }
            parse_tz(&ds.timezone)?;
        }

        for events in [&self.inputs, &self.outputs] {
            let mut seen = HashSet::new();
            for event in events {
                if !names.contains(event.dataset.as_str()) {
                    return Err(CoordError::UnknownDataset(event.dataset.clone()));
                }
                if !seen.insert(event.name.as_str()) {
                    return Err(CoordError::InvalidConfig(format!(
                        "event '{}' is defined twice",
                        event.name
                    )));
                }
                event.selector()?;
            }
        }
        Ok(())
    }

    /// Build a fresh PREP job with a new id.
    pub fn into_job(self, now: DateTime<Utc>) -> Result<CoordinatorJob> {
        self.validate()?;
        let datasets = self
            .datasets
            .into_iter()
            .map(|d| {
                Ok(Dataset {
                    timezone: parse_tz(&d.timezone)?,
                    name: d.name,
                    frequency: d.frequency,
                    unit: d.unit,
                    initial_instance: d.initial_instance,
                    end_of_duration: d.end_of_duration,
                    uri_template: d.uri_template,
                    done_flag: d.done_flag,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let events = |defs: Vec<EventDefinition>| {
            defs.into_iter()
                .map(|e| {
                    Ok(DependencyExpr {
                        selector: e.selector()?,
                        name: e.name,
                        dataset: e.dataset,
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        Ok(CoordinatorJob {
            id: format!("{}-{}", self.name, &suffix[..12]),
            timezone: parse_tz(&self.timezone)?,
            name: self.name,
            frequency: self.frequency,
            unit: self.unit,
            start: self.start,
            end: self.end,
            end_bound: self.end_bound,
            concurrency: self.controls.concurrency,
            execution: self.controls.execution,
            timeout_minutes: self.controls.timeout,
            timeout_basis: self.controls.timeout_basis,
            datasets,
            inputs: events(self.inputs)?,
            outputs: events(self.outputs)?,
            properties: self.properties,
            status: JobStatus::Prep,
            last_action_number: 0,
            next_materialized_time: None,
            done_materialization: false,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler config (.coord/config.yaml)
// ---------------------------------------------------------------------------

/// Exponential backoff between input checks of the same action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_seconds")]
    pub initial_seconds: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
}

fn default_initial_seconds() -> u64 {
    60
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_seconds() -> u64 {
    3600
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_seconds: default_initial_seconds(),
            multiplier: default_multiplier(),
            max_seconds: default_max_seconds(),
        }
    }
}

impl BackoffConfig {
    /// Delay before check number `attempt + 1` of an action.
    pub fn delay(&self, attempt: u32) -> std::time::Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let secs = (self.initial_seconds as f64 * factor).min(self.max_seconds as f64);
        std::time::Duration::from_secs(secs as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// How far past now the driver materializes nominal times.
    #[serde(default = "default_lookahead_minutes")]
    pub lookahead_minutes: u64,
    /// Driver wake-up interval.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Input checks run concurrently per driver tick.
    #[serde(default = "default_max_parallel_checks")]
    pub max_parallel_checks: usize,
}

fn default_lookahead_minutes() -> u64 {
    60
}

fn default_tick_seconds() -> u64 {
    10
}

fn default_max_parallel_checks() -> usize {
    8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            lookahead_minutes: default_lookahead_minutes(),
            tick_seconds: default_tick_seconds(),
            max_parallel_checks: default_max_parallel_checks(),
        }
    }
}

impl Config {
    /// Load `.coord/config.yaml`. A missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    /// Write this config unless one already exists. Returns true if written.
    pub fn save_if_missing(&self, root: &Path) -> Result<bool> {
        let data = serde_yaml::to_string(self)?;
        crate::io::write_if_missing(&paths::config_path(root), data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
