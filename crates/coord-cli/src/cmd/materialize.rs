use crate::output::{print_json, print_table, time_cell};
use chrono::{Duration, Utc};
use coord_core::config::Config;
use std::path::Path;

/// Materialize `[start, end)` when both are given, otherwise everything due
/// within the configured lookahead.
pub fn run(
    root: &Path,
    job_id: &str,
    start: Option<&str>,
    end: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let coord = super::open(root)?;
    let now = Utc::now();
    let created = match (start, end) {
        (Some(start), Some(end)) => {
            coord.materialize(job_id, super::parse_time(start)?, super::parse_time(end)?, now)?
        }
        _ => {
            let cfg = Config::load(root)?;
            let lookahead = Duration::minutes(cfg.lookahead_minutes as i64);
            coord.materialize_due(job_id, lookahead, now)?
        }
    };

    if json {
        return print_json(&created);
    }
    if created.is_empty() {
        println!("Nothing to materialize for '{job_id}'.");
        return Ok(());
    }
    let rows = created
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                time_cell(a.nominal_time),
                a.missing_dependencies.len().to_string(),
            ]
        })
        .collect();
    print_table(&["ACTION", "NOMINAL", "MISSING"], rows);
    Ok(())
}
