use crate::output::print_json;
use chrono::Utc;
use std::path::Path;

pub fn run(root: &Path, job_id: &str, json: bool) -> anyhow::Result<()> {
    let admitted = super::open(root)?.admit(job_id, Utc::now())?;
    if json {
        return print_json(&admitted);
    }
    if admitted.is_empty() {
        println!("No actions admitted for '{job_id}'.");
    }
    for id in admitted {
        println!("admitted {id}");
    }
    Ok(())
}
