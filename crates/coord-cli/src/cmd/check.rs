use crate::output::print_json;
use chrono::Utc;
use coord_core::input_check::CheckOutcome;
use std::path::Path;

pub fn run(root: &Path, action: &str, json: bool) -> anyhow::Result<()> {
    let id = super::parse_action_id(action)?;
    let outcome = super::open(root)?.check_inputs(&id, Utc::now())?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        CheckOutcome::Skipped { status } => println!("{id}: {status}, nothing to check"),
        CheckOutcome::Superseded => println!("{id}: changed concurrently, check skipped"),
        CheckOutcome::Waiting { missing } => {
            println!("{id}: WAITING on {} location(s)", missing.len());
            for m in missing {
                println!("  {m}");
            }
        }
        CheckOutcome::Ready { admitted } => {
            println!("{id}: READY");
            for a in admitted {
                println!("  admitted {a}");
            }
        }
        CheckOutcome::TimedOut => println!("{id}: TIMEDOUT"),
    }
    Ok(())
}
