use anyhow::Context;
use coord_core::{config::Config, paths, store::RedbStore};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing coordinator in: {}", root.display());

    // 1. Directory for dropped payloads
    let submissions = paths::submissions_dir(root);
    std::fs::create_dir_all(&submissions)
        .with_context(|| format!("failed to create {}", submissions.display()))?;

    // 2. Scheduler config, defaults only
    let created = Config::default()
        .save_if_missing(root)
        .context("failed to write config.yaml")?;
    let verb = if created { "created:" } else { "exists: " };
    println!("  {verb} {}", paths::CONFIG_FILE);

    // 3. Job and action database
    if paths::is_initialized(root) {
        println!("  exists:  {}", paths::DB_FILE);
    } else {
        RedbStore::open(&paths::db_path(root)).context("failed to create coord.db")?;
        println!("  created: {}", paths::DB_FILE);
    }
    Ok(())
}
