//! `load_from_configuration`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{instrument, warn};

use crate::error::{MetacallError, Result};

use super::handle::Handle;
use super::registry::Registry;

/// One record of the configuration document: a tag, an execution path to
/// register for it, and the scripts to load from that path.
#[derive(Debug, Deserialize)]
struct ConfigRecord {
    language_id: String,
    path: String,
    scripts: Vec<String>,
}

/// The result of processing a configuration document: every handle
/// produced, plus the per-record failures that did not stop the rest of
/// the document from loading.
#[derive(Default)]
pub struct ConfigurationOutcome {
    pub handles: Vec<Handle>,
    pub failures: Vec<(usize, MetacallError)>,
}

impl ConfigurationOutcome {
    pub fn any_failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Reads `path` as a JSON array of `{ language_id, path, scripts }` records
/// and processes them in order. Each record produces one `execution_path`
/// call followed by one `load_from_file` call. A record whose tag is not
/// registered fails only that record; the rest of the document still runs.
#[instrument(skip(registry))]
pub fn load_from_configuration(registry: &Registry, path: &Path) -> Result<ConfigurationOutcome> {
    let text = std::fs::read_to_string(path)?;
    let records: Vec<ConfigRecord> = serde_json::from_str(&text).map_err(|e| MetacallError::Load {
        tag: "configuration".to_string(),
        name: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut outcome = ConfigurationOutcome::default();
    for (index, record) in records.into_iter().enumerate() {
        match apply_record(registry, &record) {
            Ok(handle) => outcome.handles.push(handle),
            Err(e) => {
                warn!(index, tag = %record.language_id, error = %e, "configuration record failed");
                outcome.failures.push((index, e));
            }
        }
    }
    Ok(outcome)
}

fn apply_record(registry: &Registry, record: &ConfigRecord) -> Result<Handle> {
    registry.execution_path(&record.language_id, Path::new(&record.path))?;
    let paths: Vec<PathBuf> = record.scripts.iter().map(PathBuf::from).collect();
    registry.load_from_file(&record.language_id, &paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_document() {
        let json = r#"[
            {"language_id": "mock", "path": ".", "scripts": ["a.mock"]},
            {"language_id": "py", "path": "./scripts", "scripts": ["b.py", "c.py"]}
        ]"#;
        let records: Vec<ConfigRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].language_id, "mock");
        assert_eq!(records[1].scripts.len(), 2);
    }
}
