pub mod action;
pub mod admit;
pub mod check;
pub mod init;
pub mod job;
pub mod materialize;
pub mod run;

use anyhow::Context;
use chrono::{DateTime, Utc};
use coord_core::action::ActionId;
use coord_core::dependency::FsOracle;
use coord_core::store::RedbStore;
use coord_core::submission::FileDropSubmitter;
use coord_core::{paths, CoordError, Coordinator};
use std::path::Path;
use std::sync::Arc;

/// Open the project's coordinator: redb store, filesystem oracle, file-drop
/// submission.
pub fn open(root: &Path) -> anyhow::Result<Coordinator> {
    if !paths::is_initialized(root) {
        return Err(CoordError::NotInitialized.into());
    }
    let db = paths::db_path(root);
    let store = RedbStore::open(&db).with_context(|| format!("failed to open {}", db.display()))?;
    Ok(Coordinator::new(
        Arc::new(store),
        Arc::new(FsOracle),
        Arc::new(FileDropSubmitter::new(root)),
    ))
}

pub fn parse_action_id(text: &str) -> anyhow::Result<ActionId> {
    Ok(text.parse::<ActionId>()?)
}

pub fn parse_time(text: &str) -> anyhow::Result<DateTime<Utc>> {
    let t = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("invalid timestamp '{text}': expected RFC 3339"))?;
    Ok(t.with_timezone(&Utc))
}
