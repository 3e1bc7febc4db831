use crate::output::{print_json, print_table, time_cell};
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use coord_core::config::JobDefinition;
use coord_core::job::CoordinatorJob;
use coord_core::types::ActionStatus;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum JobSubcommand {
    /// Submit a job definition (YAML)
    Submit { file: PathBuf },
    /// List all jobs
    List,
    /// Show a job and a count of its actions per status
    Show { id: String },
    /// Kill a job and every unfinished action
    Kill { id: String },
}

pub fn run(root: &Path, subcmd: JobSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        JobSubcommand::Submit { file } => submit(root, &file, json),
        JobSubcommand::List => list(root, json),
        JobSubcommand::Show { id } => show(root, &id, json),
        JobSubcommand::Kill { id } => kill(root, &id, json),
    }
}

fn submit(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let def = JobDefinition::load(file)
        .with_context(|| format!("failed to read job definition {}", file.display()))?;
    let job = def.into_job(Utc::now()).context("invalid job definition")?;
    let coord = super::open(root)?;
    let job = coord.submit_job(job)?;

    if json {
        print_json(&job)?;
    } else {
        println!("Submitted job '{}' ({})", job.id, job.name);
    }
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let jobs = super::open(root)?.jobs()?;
    if json {
        return print_json(&jobs);
    }
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    let rows = jobs.iter().map(row).collect();
    print_table(&["ID", "STATUS", "FREQUENCY", "START", "END", "ACTIONS"], rows);
    Ok(())
}

fn row(job: &CoordinatorJob) -> Vec<String> {
    vec![
        job.id.clone(),
        job.status.to_string(),
        format!("{} {}", job.frequency, job.unit),
        time_cell(job.start),
        time_cell(job.end),
        job.last_action_number.to_string(),
    ]
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let coord = super::open(root)?;
    let job = coord.job(id)?;
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for action in coord.actions(id)? {
        *counts.entry(action.status.as_str()).or_default() += 1;
    }

    if json {
        return print_json(&serde_json::json!({
            "job": job,
            "action_counts": counts,
        }));
    }

    println!("Job:          {}", job.id);
    println!("Name:         {}", job.name);
    println!("Status:       {}", job.status);
    println!("Frequency:    {} {} ({})", job.frequency, job.unit, job.timezone);
    println!("Window:       {} .. {}", time_cell(job.start), time_cell(job.end));
    println!("Concurrency:  {} ({})", job.concurrency, job.execution);
    match job.timeout_minutes {
        Some(m) => println!("Timeout:      {m} min"),
        None => println!("Timeout:      none"),
    }
    if let Some(next) = job.next_materialized_time {
        println!("Next:         {}", time_cell(next));
    }
    println!("Actions:      {}", job.last_action_number);
    for status in [
        ActionStatus::Waiting,
        ActionStatus::Ready,
        ActionStatus::Submitted,
        ActionStatus::Running,
        ActionStatus::Succeeded,
        ActionStatus::Failed,
        ActionStatus::TimedOut,
        ActionStatus::Killed,
    ] {
        if let Some(n) = counts.get(status.as_str()) {
            println!("  {:<11} {n}", status.as_str());
        }
    }
    Ok(())
}

fn kill(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let killed = super::open(root)?.kill_job(id, Utc::now())?;
    if json {
        print_json(&serde_json::json!({ "job": id, "killed_actions": killed }))?;
    } else {
        println!("Killed job '{id}' ({killed} action(s) killed)");
    }
    Ok(())
}
