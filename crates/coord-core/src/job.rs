use crate::dataset::{BoundDependency, Dataset, DependencyExpr, InstanceSelector};
use crate::error::{CoordError, Result};
use crate::location;
use crate::time;
use crate::types::{Concurrency, EndBound, ExecutionOrder, JobStatus, TimeUnit, TimeoutBasis};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// CoordinatorJob
// ---------------------------------------------------------------------------

/// A recurring job: one action per nominal time from `start` at the job's
/// frequency, each gated on its input datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorJob {
    pub id: String,
    pub name: String,
    pub frequency: u32,
    pub unit: TimeUnit,
    pub timezone: Tz,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub end_bound: EndBound,
    #[serde(default)]
    pub concurrency: Concurrency,
    #[serde(default)]
    pub execution: ExecutionOrder,
    /// Minutes an action may wait for its inputs. `None` waits forever.
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub timeout_basis: TimeoutBasis,
    pub datasets: Vec<Dataset>,
    pub inputs: Vec<DependencyExpr>,
    #[serde(default)]
    pub outputs: Vec<DependencyExpr>,
    /// Action configuration, expanded into the payload once inputs are ready.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub status: JobStatus,
    pub last_action_number: u64,
    #[serde(default)]
    pub next_materialized_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub done_materialization: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row version, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl CoordinatorJob {
    /// Nominal time of action `number` (1-based).
    pub fn nominal_time(&self, number: u64) -> Result<DateTime<Utc>> {
        let steps = number
            .checked_sub(1)
            .and_then(|n| i64::try_from(n).ok())
            .and_then(|n| n.checked_mul(self.frequency as i64))
            .ok_or_else(|| {
                CoordError::InvalidConfig(format!("action number {number} is out of range"))
            })?;
        time::shift(self.start, self.timezone, self.unit, steps).ok_or_else(|| {
            CoordError::InvalidConfig(format!(
                "nominal time of action {number} is outside the representable range"
            ))
        })
    }

    /// Whether `t` falls before the job's end under its end-bound policy.
    pub fn within_end(&self, t: DateTime<Utc>) -> bool {
        match self.end_bound {
            EndBound::Exclusive => t < self.end,
            EndBound::Inclusive => t <= self.end,
        }
    }

    pub fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CoordError::UnknownDataset(name.to_string()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_minutes.map(|m| Duration::minutes(m as i64))
    }

    /// Resolve `exprs` against `nominal` into instances and concrete locations.
    pub fn bind(
        &self,
        exprs: &[DependencyExpr],
        nominal: DateTime<Utc>,
    ) -> Result<Vec<BoundDependency>> {
        exprs
            .iter()
            .map(|expr| {
                let dataset = self.dataset(&expr.dataset)?;
                let instances = match expr.selector {
                    InstanceSelector::Current { offset } => {
                        vec![time::resolve_instance(dataset, nominal, offset)?]
                    }
                    InstanceSelector::Range { start, end } => {
                        time::resolve_range(dataset, nominal, start, end)?
                    }
                };
                let locations = instances
                    .iter()
                    .map(|t| location::materialize(&dataset.uri_template, *t, dataset.timezone))
                    .collect();
                Ok(BoundDependency {
                    name: expr.name.clone(),
                    dataset: expr.dataset.clone(),
                    instances,
                    locations,
                })
            })
            .collect()
    }

    /// Locations the existence oracle must confirm, done flags included.
    pub fn probe_targets(&self, bound: &[BoundDependency]) -> Result<Vec<String>> {
        let mut targets = Vec::new();
        for dep in bound {
            let flag = self.dataset(&dep.dataset)?.done_flag.as_deref();
            targets.extend(
                dep.locations
                    .iter()
                    .map(|loc| crate::dependency::probe_target(loc, flag)),
            );
        }
        Ok(targets)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
