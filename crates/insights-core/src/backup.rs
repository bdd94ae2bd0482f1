//! Backup export and import
//!
//! A backup is the local document written out as pretty JSON. Importing
//! replaces the whole local document, and only after the file has been
//! checked: it must be an object with a `notes` array of valid notes.
//! Cloud notes are never part of a backup.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Language, Note};
use crate::storage::{LocalStore, StorageError, StorageState, STORAGE_VERSION};

/// A serialized backup ready to be saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub file_name: String,
    pub contents: String,
}

/// Reasons a backup could not be written or restored
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Backup has no notes list")]
    MissingNotes,

    #[error("Note {index} in the backup is not valid: {source}")]
    InvalidNote {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to access backup file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// File name for a backup taken on `date`
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("backup-insights-{}.json", date.format("%Y-%m-%d"))
}

/// Serialize the local document
pub fn export(local: &LocalStore) -> Result<Backup, BackupError> {
    let state = local.read()?;
    let contents = serde_json::to_string_pretty(&state).map_err(StorageError::from)?;
    Ok(Backup {
        file_name: backup_file_name(Utc::now().date_naive()),
        contents,
    })
}

/// Write a backup into `dir`, returning the file path
pub fn export_to_dir(local: &LocalStore, dir: &Path) -> Result<PathBuf, BackupError> {
    let backup = export(local)?;
    let path = dir.join(&backup.file_name);
    fs::write(&path, &backup.contents).map_err(|source| BackupError::Io {
        path: path.clone(),
        source,
    })?;
    info!("Exported backup to {:?}", path);
    Ok(path)
}

/// Check a backup and turn it into a local document
///
/// Owner tags are dropped: restored notes always belong to this device.
pub fn parse_backup(text: &str) -> Result<StorageState, BackupError> {
    let value: Value = serde_json::from_str(text).map_err(BackupError::Parse)?;
    let Value::Object(mut document) = value else {
        return Err(BackupError::MissingNotes);
    };
    let Some(Value::Array(entries)) = document.remove("notes") else {
        return Err(BackupError::MissingNotes);
    };

    let notes = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value::<Note>(entry)
                .map(|mut note| {
                    note.user_id = None;
                    note
                })
                .map_err(|source| BackupError::InvalidNote { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let version = document
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(STORAGE_VERSION);
    let language = document
        .get("language")
        .and_then(Value::as_str)
        .and_then(|code| code.parse::<Language>().ok());

    Ok(StorageState {
        notes,
        version,
        language,
    })
}

/// Replace the local document with a backup, returning the note count
pub fn try_import(local: &LocalStore, text: &str) -> Result<usize, BackupError> {
    let state = parse_backup(text)?;
    local.write(&state)?;
    info!("Imported {} notes from backup", state.notes.len());
    Ok(state.notes.len())
}

/// Replace the local document with a backup
///
/// Returns false, leaving local notes untouched, when the backup is rejected.
pub fn import(local: &LocalStore, text: &str) -> bool {
    match try_import(local, text) {
        Ok(_) => true,
        Err(e) => {
            warn!("Backup import rejected: {}", e);
            false
        }
    }
}

/// Import a backup file
pub fn import_file(local: &LocalStore, path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(text) => import(local, &text),
        Err(e) => {
            warn!("Could not read backup {:?}: {}", path, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NoteColor, NoteDraft};
    use tempfile::TempDir;

    fn seeded() -> LocalStore {
        let local = LocalStore::in_memory();
        local
            .create(NoteDraft::new("first").with_title("A").with_color(NoteColor::Blue))
            .unwrap();
        local
            .create(
                NoteDraft::new("second")
                    .with_schedule(Some("2024-03-01".to_string()), Some("09:30".to_string())),
            )
            .unwrap();
        local.set_language(Language::PtBr).unwrap();
        local
    }

    #[test]
    fn test_file_name() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(backup_file_name(date), "backup-insights-2024-01-09.json");
    }

    #[test]
    fn test_export_then_import_restores_document() {
        let source = seeded();
        let backup = export(&source).unwrap();
        assert!(backup.file_name.starts_with("backup-insights-"));

        let target = LocalStore::in_memory();
        target.create(NoteDraft::new("to be replaced")).unwrap();

        assert!(import(&target, &backup.contents));
        assert_eq!(target.read().unwrap(), source.read().unwrap());
    }

    #[test]
    fn test_rejected_imports_leave_store_untouched() {
        let local = seeded();
        let before = local.read().unwrap();

        for bad in [
            "{not json",
            "[]",
            r#"{"version": 1}"#,
            r#"{"notes": {}}"#,
            r#"{"notes": [{"title": "no id"}]}"#,
        ] {
            assert!(!import(&local, bad), "accepted {}", bad);
        }
        assert_eq!(local.read().unwrap(), before);
    }

    #[test]
    fn test_invalid_note_index_reported() {
        let good = serde_json::to_value(Note::from_draft(NoteDraft::new("ok")).unwrap()).unwrap();
        let text = serde_json::json!({"notes": [good, {"id": "x"}]}).to_string();
        let err = parse_backup(&text).unwrap_err();
        assert!(matches!(err, BackupError::InvalidNote { index: 1, .. }));
    }

    #[test]
    fn test_import_strips_owner_and_defaults_version() {
        let mut note = Note::from_draft(NoteDraft::new("owned")).unwrap();
        note.user_id = Some("u1".to_string());
        let text = serde_json::json!({"notes": [note]}).to_string();

        let state = parse_backup(&text).unwrap();
        assert_eq!(state.version, STORAGE_VERSION);
        assert!(state.notes[0].user_id.is_none());
    }

    #[test]
    fn test_export_to_dir_and_import_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = seeded();
        let path = export_to_dir(&source, temp_dir.path()).unwrap();
        assert!(path.exists());

        let target = LocalStore::in_memory();
        assert!(import_file(&target, &path));
        assert_eq!(target.list().unwrap().len(), 2);

        assert!(!import_file(&target, &temp_dir.path().join("missing.json")));
    }
}
