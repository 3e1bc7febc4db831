use crate::output::{print_json, print_table, time_cell};
use chrono::Utc;
use clap::{Subcommand, ValueEnum};
use coord_core::types::ActionStatus;
use std::path::Path;

#[derive(Clone, Copy, ValueEnum)]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl From<Outcome> for ActionStatus {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Succeeded => ActionStatus::Succeeded,
            Outcome::Failed => ActionStatus::Failed,
        }
    }
}

#[derive(Subcommand)]
pub enum ActionSubcommand {
    /// List the actions of a job
    List {
        job: String,
        /// Only actions in this status (e.g. waiting, ready)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one action, including its missing locations and payload
    Show { id: String },
    /// Kill an action; frees its slot if it was admitted
    Kill { id: String },
    /// Report that a submitted action started running
    Start { id: String },
    /// Report the outcome of an admitted action
    Finish {
        id: String,
        #[arg(long, value_enum)]
        outcome: Outcome,
    },
}

pub fn run(root: &Path, subcmd: ActionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ActionSubcommand::List { job, status } => list(root, &job, status.as_deref(), json),
        ActionSubcommand::Show { id } => show(root, &id, json),
        ActionSubcommand::Kill { id } => kill(root, &id, json),
        ActionSubcommand::Start { id } => start(root, &id, json),
        ActionSubcommand::Finish { id, outcome } => finish(root, &id, outcome.into(), json),
    }
}

fn list(root: &Path, job: &str, status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let filter = status.map(str::parse::<ActionStatus>).transpose()?;
    let actions: Vec<_> = super::open(root)?
        .actions(job)?
        .into_iter()
        .filter(|a| filter.map_or(true, |s| a.status == s))
        .collect();

    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.status.to_string(),
                time_cell(a.nominal_time),
                a.missing_dependencies.len().to_string(),
                time_cell(a.updated_at),
            ]
        })
        .collect();
    print_table(&["ACTION", "STATUS", "NOMINAL", "MISSING", "UPDATED"], rows);
    Ok(())
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let id = super::parse_action_id(id)?;
    let action = super::open(root)?.action(&id)?;
    if json {
        return print_json(&action);
    }

    println!("Action:   {}", action.id);
    println!("Status:   {}", action.status);
    println!("Nominal:  {}", time_cell(action.nominal_time));
    println!("Created:  {}", time_cell(action.created_at));
    println!("Updated:  {}", time_cell(action.updated_at));
    for dep in &action.inputs {
        println!("Input {} ({}):", dep.name, dep.dataset);
        for loc in &dep.locations {
            println!("  {loc}");
        }
    }
    if !action.missing_dependencies.is_empty() {
        println!("Missing:");
        for m in &action.missing_dependencies {
            println!("  {m}");
        }
    }
    if let Some(payload) = &action.payload {
        println!("Properties:");
        for (k, v) in &payload.properties {
            println!("  {k} = {v}");
        }
    }
    Ok(())
}

fn kill(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let id = super::parse_action_id(id)?;
    let killed = super::open(root)?.kill_action(&id, Utc::now())?;
    if json {
        print_json(&serde_json::json!({ "action": id, "killed": killed }))?;
    } else if killed {
        println!("Killed {id}");
    } else {
        println!("{id} already finished");
    }
    Ok(())
}

fn start(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let id = super::parse_action_id(id)?;
    super::open(root)?.mark_running(&id, Utc::now())?;
    if json {
        print_json(&serde_json::json!({ "action": id, "status": ActionStatus::Running }))?;
    } else {
        println!("{id} is RUNNING");
    }
    Ok(())
}

fn finish(root: &Path, id: &str, outcome: ActionStatus, json: bool) -> anyhow::Result<()> {
    let id = super::parse_action_id(id)?;
    let admitted = super::open(root)?.release(&id, outcome, Utc::now())?;
    if json {
        print_json(&serde_json::json!({
            "action": id,
            "status": outcome,
            "admitted": admitted,
        }))?;
    } else {
        println!("{id} is {outcome}");
        for a in admitted {
            println!("  admitted {a}");
        }
    }
    Ok(())
}
