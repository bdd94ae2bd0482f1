//! Backup command handlers

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use insights_core::backup;
use insights_core::SyncStore;

use crate::output::Output;

/// Write the local document to a dated backup file in `dir`
pub fn export(store: &SyncStore, dir: PathBuf, output: &Output) -> Result<()> {
    let path = store
        .export_to_dir(&dir)
        .context("Failed to export notes")?;

    if output.is_json() {
        output.json(&serde_json::json!({
            "status": "success",
            "path": path,
        }));
    } else {
        output.success(&format!("Exported notes to {}", path.display()));
    }
    Ok(())
}

/// Replace the local notes with a backup file
///
/// A rejected backup leaves the local notes untouched and is reported, not
/// raised.
pub fn import(store: &SyncStore, path: PathBuf, output: &Output) -> Result<()> {
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read backup file: {}", path.display()))?;

    match backup::try_import(store.local(), &text) {
        Ok(count) => {
            output.success(&format!("Imported {} note(s) from {}", count, path.display()));
            if store.user_id().is_some() {
                output.message(
                    "Imported notes stay on this device until the next sign-in moves them.",
                );
            }
        }
        Err(e) => {
            output.failure(&format!("Backup not imported: {}", e));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::storage::LocalStore;
    use insights_core::{CloudAdapter, NoteDraft};

    use crate::output::OutputFormat;

    fn store() -> SyncStore {
        SyncStore::new(LocalStore::in_memory(), CloudAdapter::Unconfigured)
    }

    #[test]
    fn test_export_then_import_restores_notes() {
        let dir = tempfile::tempdir().unwrap();
        let output = Output::new(OutputFormat::Quiet);

        let source = store();
        source.local().create(NoteDraft::new("keep me")).unwrap();
        export(&source, dir.path().to_path_buf(), &output).unwrap();

        let file = fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();

        let target = store();
        import(&target, file, &output).unwrap();
        let notes = target.local().list().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "keep me");
    }

    #[test]
    fn test_rejected_backup_keeps_notes() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{\"notes\": 3}").unwrap();

        let target = store();
        target.local().create(NoteDraft::new("existing")).unwrap();
        import(&target, bad, &Output::new(OutputFormat::Quiet)).unwrap();
        assert_eq!(target.local().note_count().unwrap(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let output = Output::new(OutputFormat::Quiet);
        assert!(import(&store(), PathBuf::from("/nonexistent/backup.json"), &output).is_err());
    }
}
