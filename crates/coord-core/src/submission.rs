//! File-drop submission: an admitted action's payload is written as JSON to
//! `.coord/submissions/<action-id>.json` for an external runner to pick up.

use crate::action::{ActionPayload, CoordinatorAction};
use crate::admission::Submitter;
use crate::error::{CoordError, Result};
use crate::io::atomic_write;
use crate::paths;
use std::path::PathBuf;

pub struct FileDropSubmitter {
    root: PathBuf,
}

impl FileDropSubmitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Submitter for FileDropSubmitter {
    fn submit(&self, action: &CoordinatorAction, payload: &ActionPayload) -> Result<()> {
        let path = paths::submission_path(&self.root, &action.id);
        let data = serde_json::to_vec_pretty(payload)?;
        atomic_write(&path, &data).map_err(|e| CoordError::Submission {
            action_id: action.id.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(action_id = %action.id, path = %path.display(), "payload dropped");
        Ok(())
    }
}
