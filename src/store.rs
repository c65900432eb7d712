//! Term list input and definition snapshots on disk.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::error::{DefsError, Result};

/// Term → definition, in first-seen order. An empty definition means
/// "looked up, nothing found".
pub type Definitions = IndexMap<String, String>;

/// Open a file, decompressing `.bz2` transparently.
fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| DefsError::io(path, e))?;
    let reader: Box<dyn Read> = if path.to_string_lossy().ends_with(".bz2") {
        Box::new(BufReader::with_capacity(256 * 1024, BzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(256 * 1024, file))
    };
    Ok(reader)
}

/// Read a JSON array of terms. Non-string items become empty placeholders,
/// which the pipeline skips, so every input position still counts.
pub fn load_terms(path: &Path) -> Result<Vec<String>> {
    let mut contents = String::new();
    open_input(path)?
        .read_to_string(&mut contents)
        .map_err(|e| DefsError::io(path, e))?;

    let value: Value = serde_json::from_str(&contents)?;
    let Value::Array(items) = value else {
        return Err(DefsError::InvalidInput(format!(
            "{} must contain a JSON array of strings",
            path.display()
        )));
    };

    let terms = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(term) => term,
            other => {
                warn!(index, item = %other, "skipping non-string input item");
                String::new()
            }
        })
        .collect();
    Ok(terms)
}

/// Previous output for append mode. A missing file is an empty map.
/// Non-string values are kept as unresolved (`""`) so they get looked up
/// again. A file that is not a JSON object is an error, since starting empty
/// would overwrite it at the first checkpoint.
pub fn load_existing(path: &Path) -> Result<Definitions> {
    if !path.exists() {
        return Ok(Definitions::new());
    }
    let contents = fs::read_to_string(path).map_err(|e| DefsError::io(path, e))?;
    // IndexMap keeps the file's key order
    let entries: IndexMap<String, Value> = serde_json::from_str(&contents)?;

    let mut defs = Definitions::with_capacity(entries.len());
    for (term, value) in entries {
        let definition = match value {
            Value::String(definition) => definition,
            other => {
                warn!(term = %term, value = %other, "non-string definition, treating as unresolved");
                String::new()
            }
        };
        defs.insert(term, definition);
    }
    Ok(defs)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write the full mapping as pretty JSON. Readers see either the old file
/// or the new one, never a partial write.
pub fn save_definitions(path: &Path, defs: &Definitions) -> Result<()> {
    let json = serde_json::to_string_pretty(defs)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DefsError::io(parent, e))?;
    }

    let temp = temp_path(path);
    fs::write(&temp, json).map_err(|e| DefsError::io(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| DefsError::io(path, e))?;
    Ok(())
}
