use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;

use crate::models::SquarePair;

#[derive(Debug, ThisError)]
pub enum HighlightStoreError {
    #[error("Highlight store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Highlight store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Remembers the highlighted squares per (session, position).
///
/// Entries never expire; a revisited position gets back whatever was chosen there last.
pub trait HighlightStore {
    fn load(&self, session: &str, position: &str) -> Option<SquarePair>;
    fn save(&mut self, session: &str, position: &str, squares: SquarePair) -> Result<(), HighlightStoreError>;
}

/// session -> position -> squares. Entries stay raw JSON so one unreadable entry never costs
/// the others.
type HighlightRecord = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// A single JSON document on disk, read and rewritten on every access
pub struct FileHighlightStore {
    path: PathBuf,
}

impl FileHighlightStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_record(&self) -> Result<HighlightRecord, HighlightStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HighlightRecord::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HighlightRecord::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_record(&self, record: &HighlightRecord) -> Result<(), HighlightStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // replace in one step so a crash never leaves half a document behind
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl HighlightStore for FileHighlightStore {
    fn load(&self, session: &str, position: &str) -> Option<SquarePair> {
        let record = match self.read_record() {
            Ok(record) => record,
            Err(err) => {
                warn!("Failed to read highlight store {}: {}", self.path.display(), err);
                return None;
            }
        };
        let entry = record.get(session).and_then(|positions| positions.get(position))?;

        match serde_json::from_value(entry.clone()) {
            Ok(squares) => Some(squares),
            Err(err) => {
                warn!("Ignoring unreadable highlight of {} in {}: {}", position, session, err);
                None
            }
        }
    }

    fn save(&mut self, session: &str, position: &str, squares: SquarePair) -> Result<(), HighlightStoreError> {
        let mut record = match self.read_record() {
            Ok(record) => record,
            // only a document that is not a session map at all is started over
            Err(HighlightStoreError::Json(err)) => {
                warn!("Discarding unparsable highlight store {}: {}", self.path.display(), err);
                HighlightRecord::new()
            }
            Err(err) => return Err(err),
        };

        record
            .entry(session.to_string())
            .or_default()
            .insert(position.to_string(), serde_json::to_value(squares)?);
        debug!("Saving highlight {:?} for {} in {}", squares, position, session);
        self.write_record(&record)
    }
}

/// Process-local store, used where nothing has to survive a restart
#[derive(Default)]
pub struct MemoryHighlightStore {
    entries: HashMap<(String, String), SquarePair>,
}

impl MemoryHighlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl HighlightStore for MemoryHighlightStore {
    fn load(&self, session: &str, position: &str) -> Option<SquarePair> {
        self.entries.get(&(session.to_string(), position.to_string())).copied()
    }

    fn save(&mut self, session: &str, position: &str, squares: SquarePair) -> Result<(), HighlightStoreError> {
        self.entries.insert((session.to_string(), position.to_string()), squares);
        Ok(())
    }
}
