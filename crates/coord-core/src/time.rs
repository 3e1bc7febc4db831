//! Symbolic time resolution for dataset instances.
//!
//! All arithmetic is calendar-aware: `Day` and `Month` steps are applied to
//! the wall clock of the relevant timezone and mapped back to UTC, so a daily
//! dataset keeps its local hour across daylight saving shifts and a monthly
//! dataset anchored on the 31st lands on the last day of shorter months.
//! Every instance is computed directly from the anchor (`anchor + k * step`)
//! rather than by repeated stepping, which keeps month clamping from drifting.
//!
//! Nothing here reads the current time; results depend only on the inputs.

use crate::dataset::Dataset;
use crate::error::{CoordError, Result};
use crate::types::{EndOfDuration, TimeUnit};
use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

// ---------------------------------------------------------------------------
// Calendar arithmetic
// ---------------------------------------------------------------------------

/// Map a local wall-clock time to UTC.
///
/// Ambiguous times (clocks rolled back) resolve to the earlier instant. Times
/// inside a gap (clocks sprung forward) are read with the offset in force
/// before the gap, which lands just past it.
pub(crate) fn local_to_utc(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    if let Some(t) = tz.from_local_datetime(&naive).earliest() {
        return Some(t.with_timezone(&Utc));
    }
    let probe = naive.checked_sub_signed(Duration::hours(24))?;
    let offset = tz.from_local_datetime(&probe).earliest()?.offset().fix();
    let utc = naive.checked_sub_signed(Duration::seconds(offset.local_minus_utc() as i64))?;
    Some(Utc.from_utc_datetime(&utc))
}

/// Move `start` by `amount` units of `unit` on the wall clock of `tz`.
pub(crate) fn shift(
    start: DateTime<Utc>,
    tz: Tz,
    unit: TimeUnit,
    amount: i64,
) -> Option<DateTime<Utc>> {
    let local = start.with_timezone(&tz).naive_local();
    let moved = match unit {
        TimeUnit::Minute | TimeUnit::Hour => {
            let secs = unit.fixed_seconds()?;
            let delta = Duration::try_seconds(amount.checked_mul(secs)?)?;
            return start.checked_add_signed(delta);
        }
        TimeUnit::Day => {
            let days = Days::new(amount.unsigned_abs());
            if amount >= 0 {
                local.checked_add_days(days)?
            } else {
                local.checked_sub_days(days)?
            }
        }
        TimeUnit::Month => {
            let months = Months::new(u32::try_from(amount.unsigned_abs()).ok()?);
            if amount >= 0 {
                local.checked_add_months(months)?
            } else {
                local.checked_sub_months(months)?
            }
        }
    };
    local_to_utc(tz, moved)
}

/// Number of whole `frequency`-sized steps from `anchor` to `target`,
/// as a first guess to be corrected against the exact calendar.
fn estimate_steps(anchor: DateTime<Utc>, target: DateTime<Utc>, tz: Tz, unit: TimeUnit, frequency: i64) -> i64 {
    let steps = match unit.fixed_seconds() {
        Some(secs) => (target - anchor).num_seconds().div_euclid(secs),
        None => {
            let a = anchor.with_timezone(&tz).naive_local();
            let t = target.with_timezone(&tz).naive_local();
            match unit {
                TimeUnit::Month => {
                    (t.year() as i64 - a.year() as i64) * 12 + (t.month() as i64 - a.month() as i64)
                }
                _ => (t.date() - a.date()).num_days(),
            }
        }
    };
    steps.div_euclid(frequency)
}

/// Largest `k` with `anchor + k * frequency units <= target`.
///
/// Returns `None` when `target` precedes the anchor.
pub(crate) fn steps_at_or_before(
    anchor: DateTime<Utc>,
    target: DateTime<Utc>,
    tz: Tz,
    unit: TimeUnit,
    frequency: u32,
) -> Option<i64> {
    if target < anchor {
        return None;
    }
    let freq = frequency as i64;
    let at = |k: i64| shift(anchor, tz, unit, k.checked_mul(freq)?);
    let mut k = estimate_steps(anchor, target, tz, unit, freq).max(0);
    while k > 0 && at(k).map_or(true, |t| t > target) {
        k -= 1;
    }
    while at(k + 1).is_some_and(|t| t <= target) {
        k += 1;
    }
    Some(k)
}

// ---------------------------------------------------------------------------
// End-of-duration snapping
// ---------------------------------------------------------------------------

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Ceil `t` to the next day or month boundary in `tz`. Instants already on a
/// boundary are returned unchanged.
fn snap(t: DateTime<Utc>, tz: Tz, policy: EndOfDuration) -> Option<DateTime<Utc>> {
    let local = t.with_timezone(&tz).naive_local();
    let on_day_boundary = local.num_seconds_from_midnight() == 0 && local.nanosecond() == 0;
    match policy {
        EndOfDuration::None => Some(t),
        EndOfDuration::EndOfDay if on_day_boundary => Some(t),
        EndOfDuration::EndOfDay => local_to_utc(tz, midnight(local.date().succ_opt()?)),
        EndOfDuration::EndOfMonth if on_day_boundary && local.day() == 1 => Some(t),
        EndOfDuration::EndOfMonth => {
            let first = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)?;
            local_to_utc(tz, midnight(first.checked_add_months(Months::new(1))?))
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

fn invalid(dataset: &Dataset, offset: i64, reason: impl Into<String>) -> CoordError {
    CoordError::InvalidOffset {
        dataset: dataset.name.clone(),
        offset,
        reason: reason.into(),
    }
}

/// Index of the dataset instance at or before `nominal` (the `current(0)`
/// instance).
pub fn current_index(dataset: &Dataset, nominal: DateTime<Utc>) -> Result<i64> {
    steps_at_or_before(
        dataset.initial_instance,
        nominal,
        dataset.timezone,
        dataset.unit,
        dataset.frequency,
    )
    .ok_or_else(|| {
        invalid(
            dataset,
            0,
            format!(
                "nominal time {nominal} precedes initial instance {}",
                dataset.initial_instance
            ),
        )
    })
}

/// Timestamp of instance `index`, with end-of-duration snapping applied.
pub fn instance_at(dataset: &Dataset, index: i64) -> Result<DateTime<Utc>> {
    if index < 0 {
        return Err(invalid(dataset, index, "instance precedes initial instance"));
    }
    let amount = index
        .checked_mul(dataset.frequency as i64)
        .ok_or_else(|| invalid(dataset, index, "instance index overflows"))?;
    shift(dataset.initial_instance, dataset.timezone, dataset.unit, amount)
        .and_then(|t| snap(t, dataset.timezone, dataset.end_of_duration))
        .ok_or_else(|| invalid(dataset, index, "instance is outside the representable range"))
}

/// Resolve `current(offset)` relative to `nominal`.
pub fn resolve_instance(dataset: &Dataset, nominal: DateTime<Utc>, offset: i64) -> Result<DateTime<Utc>> {
    let base = current_index(dataset, nominal)?;
    let index = base
        .checked_add(offset)
        .filter(|i| *i >= 0)
        .ok_or_else(|| {
            invalid(
                dataset,
                offset,
                format!("resolves before initial instance {}", dataset.initial_instance),
            )
        })?;
    instance_at(dataset, index)
}

/// Most instances a single range may resolve to.
pub const MAX_RANGE_INSTANCES: i64 = 1000;

/// Resolve every instance from `current(start)` through `current(end)`,
/// ascending. Empty when `start > end`.
pub fn resolve_range(
    dataset: &Dataset,
    nominal: DateTime<Utc>,
    start: i64,
    end: i64,
) -> Result<Vec<DateTime<Utc>>> {
    if start > end {
        return Ok(Vec::new());
    }
    let width = end
        .checked_sub(start)
        .and_then(|w| w.checked_add(1))
        .filter(|w| *w <= MAX_RANGE_INSTANCES)
        .ok_or_else(|| {
            invalid(
                dataset,
                end,
                format!("range spans more than {MAX_RANGE_INSTANCES} instances"),
            )
        })?;
    let base = current_index(dataset, nominal)?;
    let first = base
        .checked_add(start)
        .filter(|i| *i >= 0)
        .ok_or_else(|| {
            invalid(
                dataset,
                start,
                format!("resolves before initial instance {}", dataset.initial_instance),
            )
        })?;
    if first.checked_add(width - 1).is_none() {
        return Err(invalid(dataset, end, "instance index overflows"));
    }
    (0..width).map(|k| instance_at(dataset, first + k)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
