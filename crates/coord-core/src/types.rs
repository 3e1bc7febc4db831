use crate::error::CoordError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TimeUnit
// ---------------------------------------------------------------------------

/// Calendar unit a frequency is expressed in.
///
/// `Minute` and `Hour` have a fixed duration. `Day` and `Month` are calendar
/// units: adding one day keeps the local wall-clock time across a daylight
/// saving shift, and adding one month moves to the same day of the next month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Month,
}

impl TimeUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Month => "month",
        }
    }

    /// Length in seconds for fixed-duration units.
    pub fn fixed_seconds(self) -> Option<i64> {
        match self {
            TimeUnit::Minute => Some(60),
            TimeUnit::Hour => Some(3_600),
            TimeUnit::Day | TimeUnit::Month => None,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" => Ok(TimeUnit::Minute),
            "hour" => Ok(TimeUnit::Hour),
            "day" => Ok(TimeUnit::Day),
            "month" => Ok(TimeUnit::Month),
            _ => Err(CoordError::InvalidConfig(format!("unknown time unit: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// EndOfDuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfDuration {
    #[default]
    None,
    EndOfDay,
    EndOfMonth,
}

impl fmt::Display for EndOfDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndOfDuration::None => "none",
            EndOfDuration::EndOfDay => "end_of_day",
            EndOfDuration::EndOfMonth => "end_of_month",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ExecutionOrder
// ---------------------------------------------------------------------------

/// Order in which READY actions are admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Oldest nominal time (smallest action number) first.
    #[default]
    Fifo,
    /// Newest nominal time (largest action number) first.
    Lifo,
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOrder::Fifo => f.write_str("FIFO"),
            ExecutionOrder::Lifo => f.write_str("LIFO"),
        }
    }
}

impl std::str::FromStr for ExecutionOrder {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(ExecutionOrder::Fifo),
            "lifo" => Ok(ExecutionOrder::Lifo),
            _ => Err(CoordError::InvalidConfig(format!(
                "unknown execution order: {s}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

/// Ceiling on admitted, non-terminal actions per job.
///
/// Serialized as the keyword `unlimited` or a positive integer. Zero is
/// rejected rather than silently read as "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConcurrencyRepr", into = "ConcurrencyRepr")]
pub enum Concurrency {
    #[default]
    Unlimited,
    Max(u32),
}

impl Concurrency {
    /// Whether another action may be admitted when `admitted` are in flight.
    pub fn has_capacity(self, admitted: usize) -> bool {
        match self {
            Concurrency::Unlimited => true,
            Concurrency::Max(n) => admitted < n as usize,
        }
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Unlimited => f.write_str("unlimited"),
            Concurrency::Max(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConcurrencyRepr {
    Count(i64),
    Keyword(String),
}

impl TryFrom<ConcurrencyRepr> for Concurrency {
    type Error = String;

    fn try_from(repr: ConcurrencyRepr) -> Result<Self, Self::Error> {
        match repr {
            ConcurrencyRepr::Keyword(k) if k.eq_ignore_ascii_case("unlimited") => {
                Ok(Concurrency::Unlimited)
            }
            ConcurrencyRepr::Keyword(k) => Err(format!(
                "concurrency must be 'unlimited' or a positive integer, got '{k}'"
            )),
            ConcurrencyRepr::Count(n) if n >= 1 && n <= u32::MAX as i64 => {
                Ok(Concurrency::Max(n as u32))
            }
            ConcurrencyRepr::Count(n) => Err(format!(
                "concurrency must be 'unlimited' or a positive integer, got {n}"
            )),
        }
    }
}

impl From<Concurrency> for ConcurrencyRepr {
    fn from(c: Concurrency) -> Self {
        match c {
            Concurrency::Unlimited => ConcurrencyRepr::Keyword("unlimited".to_string()),
            Concurrency::Max(n) => ConcurrencyRepr::Count(n as i64),
        }
    }
}

// ---------------------------------------------------------------------------
// EndBound / TimeoutBasis
// ---------------------------------------------------------------------------

/// Whether a job's `end` is itself a valid nominal time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndBound {
    #[default]
    Exclusive,
    Inclusive,
}

/// Instant the input-check timeout is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBasis {
    #[default]
    NominalTime,
    CreatedTime,
}

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a coordinator action.
///
/// Transitions owned by this crate: `Waiting → Ready | TimedOut`,
/// `Ready → Submitted` (admission) and `* → Killed`. `Submitted → Running`
/// and the `Succeeded | Failed` outcomes are reported by the submission side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    Waiting,
    Ready,
    Submitted,
    Running,
    TimedOut,
    Killed,
    Succeeded,
    Failed,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Waiting => "WAITING",
            ActionStatus::Ready => "READY",
            ActionStatus::Submitted => "SUBMITTED",
            ActionStatus::Running => "RUNNING",
            ActionStatus::TimedOut => "TIMEDOUT",
            ActionStatus::Killed => "KILLED",
            ActionStatus::Succeeded => "SUCCEEDED",
            ActionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::TimedOut
                | ActionStatus::Killed
                | ActionStatus::Succeeded
                | ActionStatus::Failed
        )
    }

    /// Admitted past READY and not yet finished: occupies a concurrency slot.
    pub fn is_admitted(self) -> bool {
        matches!(self, ActionStatus::Submitted | ActionStatus::Running)
    }

    pub fn can_transition_to(self, to: ActionStatus) -> bool {
        use ActionStatus::*;
        match (self, to) {
            (from, Killed) => !from.is_terminal(),
            (Waiting, Ready) | (Waiting, TimedOut) => true,
            (Ready, Submitted) => true,
            (Submitted, Running) => true,
            (Submitted | Running, Succeeded | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Ok(ActionStatus::Waiting),
            "READY" => Ok(ActionStatus::Ready),
            "SUBMITTED" => Ok(ActionStatus::Submitted),
            "RUNNING" => Ok(ActionStatus::Running),
            "TIMEDOUT" => Ok(ActionStatus::TimedOut),
            "KILLED" => Ok(ActionStatus::Killed),
            "SUCCEEDED" => Ok(ActionStatus::Succeeded),
            "FAILED" => Ok(ActionStatus::Failed),
            _ => Err(CoordError::InvalidConfig(format!("unknown action status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Prep,
    Premater,
    Running,
    Succeeded,
    Killed,
    Failed,
    DoneWithError,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Prep => "PREP",
            JobStatus::Premater => "PREMATER",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Killed => "KILLED",
            JobStatus::Failed => "FAILED",
            JobStatus::DoneWithError => "DONEWITHERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Killed | JobStatus::Failed | JobStatus::DoneWithError
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
