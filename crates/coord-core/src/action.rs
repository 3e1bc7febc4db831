//! Coordinator action data model.
//!
//! An action is one materialized nominal time of a job. It is created WAITING
//! with the locations it still needs, becomes READY once every input exists,
//! and is then admitted (SUBMITTED) under the job's concurrency ceiling.

use crate::dataset::BoundDependency;
use crate::error::{CoordError, Result};
use crate::types::ActionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// `{job_id}@{action_number}`. Action numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionId {
    pub job_id: String,
    pub number: u64,
}

impl ActionId {
    pub fn new(job_id: impl Into<String>, number: u64) -> Self {
        Self {
            job_id: job_id.into(),
            number,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.job_id, self.number)
    }
}

impl std::str::FromStr for ActionId {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self> {
        let (job_id, number) = s
            .rsplit_once('@')
            .ok_or_else(|| CoordError::InvalidActionId(s.to_string()))?;
        let number: u64 = number
            .parse()
            .map_err(|_| CoordError::InvalidActionId(s.to_string()))?;
        if job_id.is_empty() || number == 0 {
            return Err(CoordError::InvalidActionId(s.to_string()));
        }
        Ok(Self::new(job_id, number))
    }
}

impl TryFrom<String> for ActionId {
    type Error = CoordError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ActionId> for String {
    fn from(id: ActionId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// ActionPayload
// ---------------------------------------------------------------------------

/// What the submission side receives once an action's inputs are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub action_id: ActionId,
    pub nominal_time: DateTime<Utc>,
    /// Input event name → resolved locations, ascending instance order.
    pub inputs: BTreeMap<String, Vec<String>>,
    pub outputs: BTreeMap<String, Vec<String>>,
    pub properties: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// CoordinatorAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorAction {
    pub id: ActionId,
    pub nominal_time: DateTime<Utc>,
    pub status: ActionStatus,
    /// Locations not yet confirmed present. Non-empty only while WAITING.
    #[serde(default)]
    pub missing_dependencies: Vec<String>,
    /// Input instances bound at materialization.
    #[serde(default)]
    pub inputs: Vec<BoundDependency>,
    #[serde(default)]
    pub payload: Option<ActionPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row version, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl CoordinatorAction {
    /// A freshly materialized action, waiting on every location in `missing`.
    pub fn new_waiting(
        id: ActionId,
        nominal_time: DateTime<Utc>,
        inputs: Vec<BoundDependency>,
        missing: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            nominal_time,
            status: ActionStatus::Waiting,
            missing_dependencies: missing,
            inputs,
            payload: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow.
    ///
    /// Leaving WAITING clears the missing list.
    pub fn transition(&mut self, to: ActionStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(CoordError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        if to != ActionStatus::Waiting {
            self.missing_dependencies.clear();
        }
        self.updated_at = now;
        Ok(())
    }
}
