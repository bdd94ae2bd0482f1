//! Local note store
//!
//! The whole collection lives in one JSON document under a single key.
//! Every mutation reads the document, changes it and writes it back whole.
//! There is no locking: concurrent writers overwrite each other (last write wins).

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::persistence::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use crate::config::Config;
use crate::models::{Language, Note, NoteDraft, NotePatch};

/// Key the local document is stored under
pub const STORAGE_KEY: &str = "insights_storage";

/// Current document version
pub const STORAGE_VERSION: u32 = 1;

/// The persisted local document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    pub notes: Vec<Note>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_language"
    )]
    pub language: Option<Language>,
}

impl Default for StorageState {
    fn default() -> Self {
        Self {
            notes: Vec::new(),
            version: STORAGE_VERSION,
            language: None,
        }
    }
}

impl StorageState {
    /// Parse a document, `None` if it is not a valid document
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Store for notes kept on this device only
#[derive(Clone)]
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Store backed by files in the configured data directory
    pub fn open(config: &Config) -> Self {
        Self::new(Arc::new(FileKeyValueStore::new(config.storage_dir())))
    }

    /// Store that lives only in memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    /// Read the document
    ///
    /// A missing or unparsable document reads as an empty one.
    pub fn read(&self) -> StorageResult<StorageState> {
        let Some(raw) = self.kv.get(STORAGE_KEY)? else {
            return Ok(StorageState::default());
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!("Local document is not valid, treating it as empty: {}", e);
                Ok(StorageState::default())
            }
        }
    }

    /// Overwrite the document
    pub fn write(&self, state: &StorageState) -> StorageResult<()> {
        let json = serde_json::to_string(state)?;
        self.kv.set(STORAGE_KEY, &json)
    }

    /// All notes, manually ordered notes first, then most recently updated
    pub fn list(&self) -> StorageResult<Vec<Note>> {
        let mut notes = self.read()?.notes;
        sort_notes(&mut notes);
        Ok(notes)
    }

    pub fn get(&self, id: Uuid) -> StorageResult<Option<Note>> {
        Ok(self.read()?.notes.into_iter().find(|n| n.id == id))
    }

    pub fn note_count(&self) -> StorageResult<usize> {
        Ok(self.read()?.notes.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.note_count()? == 0)
    }

    /// Create a note
    ///
    /// Once the collection carries manual ordering, the new note is placed after
    /// the last ordered note; otherwise `order` stays unset.
    pub fn create(&self, draft: NoteDraft) -> StorageResult<Note> {
        let mut state = self.read()?;
        let mut note = Note::from_draft(draft)?;
        note.order = state
            .notes
            .iter()
            .filter_map(|n| n.order)
            .max()
            .map(|max| max + 1);

        state.notes.push(note.clone());
        self.write(&state)?;
        debug!("Created local note {}", note.id);
        Ok(note)
    }

    /// Apply a partial update and refresh `updatedAt`
    ///
    /// An empty patch leaves the note untouched.
    pub fn update(&self, id: Uuid, patch: &NotePatch) -> StorageResult<Note> {
        let mut state = self.read()?;
        let note = state
            .notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(StorageError::NoteNotFound(id))?;

        if patch.is_empty() {
            return Ok(note.clone());
        }

        patch.apply_to(note)?;
        let updated = note.clone();
        self.write(&state)?;
        debug!("Updated local note {}", id);
        Ok(updated)
    }

    /// Delete a note, returning whether it existed
    pub fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let mut state = self.read()?;
        let before = state.notes.len();
        state.notes.retain(|n| n.id != id);
        if state.notes.len() == before {
            return Ok(false);
        }
        self.write(&state)?;
        debug!("Deleted local note {}", id);
        Ok(true)
    }

    /// Assign `order = index` following the given IDs
    ///
    /// IDs not in the document are skipped; notes not listed keep their order.
    pub fn reorder(&self, ids: &[Uuid]) -> StorageResult<()> {
        let mut state = self.read()?;
        for (index, id) in ids.iter().enumerate() {
            if let Some(note) = state.notes.iter_mut().find(|n| n.id == *id) {
                note.order = Some(index as i64);
                note.touch();
            }
        }
        self.write(&state)
    }

    /// Empty the note collection, keeping the other document fields
    pub fn clear_notes(&self) -> StorageResult<()> {
        let mut state = self.read()?;
        state.notes.clear();
        self.write(&state)
    }

    pub fn language(&self) -> StorageResult<Option<Language>> {
        Ok(self.read()?.language)
    }

    pub fn set_language(&self, language: Language) -> StorageResult<()> {
        let mut state = self.read()?;
        state.language = Some(language);
        self.write(&state)
    }
}

/// Sort for display: notes with `order` ascending, then the rest by `updatedAt` descending
pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| match (a.order, b.order) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| b.updated_at.cmp(&a.updated_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.updated_at.cmp(&a.updated_at),
    });
}

fn default_version() -> u32 {
    STORAGE_VERSION
}

/// Unknown language codes load as "no preference" instead of failing the document
fn lenient_language<'de, D>(deserializer: D) -> Result<Option<Language>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().and_then(|s| s.parse().ok())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelError, NoteColor};
    use chrono::Duration;
    use tempfile::TempDir;

    fn draft(title: &str, content: &str) -> NoteDraft {
        NoteDraft::new(content).with_title(title)
    }

    #[test]
    fn test_read_missing_document() {
        let store = LocalStore::in_memory();
        let state = store.read().unwrap();
        assert!(state.notes.is_empty());
        assert_eq!(state.version, 1);
        assert!(state.language.is_none());
    }

    #[test]
    fn test_read_invalid_json_is_empty_document() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(STORAGE_KEY, "{not json").unwrap();
        let store = LocalStore::new(kv);

        assert_eq!(store.read().unwrap(), StorageState::default());
    }

    #[test]
    fn test_read_wrong_shape_is_empty_document() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(STORAGE_KEY, r#"{"notes": "nope"}"#).unwrap();
        let store = LocalStore::new(kv);

        assert!(store.read().unwrap().notes.is_empty());
    }

    #[test]
    fn test_unknown_language_is_dropped() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(STORAGE_KEY, r#"{"notes": [], "version": 1, "language": "xx"}"#)
            .unwrap();
        let store = LocalStore::new(kv);

        let state = store.read().unwrap();
        assert!(state.language.is_none());
    }

    #[test]
    fn test_create_and_delete_scenario() {
        let store = LocalStore::in_memory();

        let note = store
            .create(draft("A", "hello").with_color(NoteColor::Yellow))
            .unwrap();

        let notes = store.list().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "A");
        assert_eq!(notes[0].content, "hello");
        assert!(notes[0].order.is_none());
        assert_eq!(notes[0].created_at, notes[0].updated_at);

        assert!(store.delete(note.id).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_empty_content() {
        let store = LocalStore::in_memory();
        let err = store.create(draft("title", "")).unwrap_err();
        assert!(matches!(err, StorageError::Invalid(ModelError::EmptyContent)));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_sorted_by_updated_desc() {
        let store = LocalStore::in_memory();
        let first = store.create(draft("first", "1")).unwrap();
        let second = store.create(draft("second", "2")).unwrap();
        let third = store.create(draft("third", "3")).unwrap();

        // Make the first note the most recently updated
        store.update(first.id, &NotePatch::title("first!")).unwrap();

        let ids: Vec<_> = store.list().unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids[0], first.id);
        assert!(ids.contains(&second.id));
        assert!(ids.contains(&third.id));

        let notes = store.list().unwrap();
        for pair in notes.windows(2) {
            assert!(pair[0].updated_at >= pair[1].updated_at);
        }
    }

    #[test]
    fn test_update_refreshes_updated_at() {
        let store = LocalStore::in_memory();
        let note = store.create(draft("A", "hello")).unwrap();

        let updated = store.update(note.id, &NotePatch::content("bye")).unwrap();
        assert_eq!(updated.content, "bye");
        assert_eq!(updated.created_at, note.created_at);
        assert!(updated.updated_at > note.updated_at);

        let stored = store.get(note.id).unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let store = LocalStore::in_memory();
        let note = store.create(draft("A", "hello")).unwrap();

        let same = store.update(note.id, &NotePatch::default()).unwrap();
        assert_eq!(same.updated_at, note.updated_at);
    }

    #[test]
    fn test_update_unknown_note() {
        let store = LocalStore::in_memory();
        let id = Uuid::new_v4();
        let err = store.update(id, &NotePatch::title("x")).unwrap_err();
        assert!(matches!(err, StorageError::NoteNotFound(missing) if missing == id));
    }

    #[test]
    fn test_delete_unknown_note() {
        let store = LocalStore::in_memory();
        store.create(draft("A", "hello")).unwrap();
        assert!(!store.delete(Uuid::new_v4()).unwrap());
        assert_eq!(store.note_count().unwrap(), 1);
    }

    #[test]
    fn test_reorder_assigns_indices_idempotently() {
        let store = LocalStore::in_memory();
        let a = store.create(draft("a", "1")).unwrap();
        let b = store.create(draft("b", "2")).unwrap();
        let c = store.create(draft("c", "3")).unwrap();

        let wanted = [c.id, a.id, b.id];
        store.reorder(&wanted).unwrap();
        let first: Vec<_> = store
            .list()
            .unwrap()
            .iter()
            .map(|n| (n.id, n.order))
            .collect();

        store.reorder(&wanted).unwrap();
        let second: Vec<_> = store
            .list()
            .unwrap()
            .iter()
            .map(|n| (n.id, n.order))
            .collect();

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![(c.id, Some(0)), (a.id, Some(1)), (b.id, Some(2))]
        );
    }

    #[test]
    fn test_create_after_reorder_takes_next_order() {
        let store = LocalStore::in_memory();
        let a = store.create(draft("a", "1")).unwrap();
        let b = store.create(draft("b", "2")).unwrap();
        store.reorder(&[b.id, a.id]).unwrap();

        let c = store.create(draft("c", "3")).unwrap();
        assert_eq!(c.order, Some(2));

        let ids: Vec<_> = store.list().unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);
    }

    #[test]
    fn test_sort_ordered_before_unordered() {
        let mut notes: Vec<Note> = (0..3)
            .map(|i| Note::from_draft(NoteDraft::new(format!("n{}", i))).unwrap())
            .collect();
        notes[0].updated_at = notes[0].updated_at + Duration::seconds(10);
        notes[2].order = Some(0);

        let expected = vec![notes[2].id, notes[0].id, notes[1].id];
        sort_notes(&mut notes);
        let ids: Vec<_> = notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_clear_notes_keeps_language() {
        let store = LocalStore::in_memory();
        store.set_language(Language::En).unwrap();
        store.create(draft("a", "1")).unwrap();

        store.clear_notes().unwrap();

        let state = store.read().unwrap();
        assert!(state.notes.is_empty());
        assert_eq!(state.language, Some(Language::En));
    }

    #[test]
    fn test_file_backed_store_persists() {
        let temp_dir = TempDir::new().unwrap();
        let kv = Arc::new(FileKeyValueStore::new(temp_dir.path()));

        let note = {
            let store = LocalStore::new(kv.clone());
            store.create(draft("persist", "me")).unwrap()
        };

        let reopened = LocalStore::new(Arc::new(FileKeyValueStore::new(temp_dir.path())));
        let notes = reopened.list().unwrap();
        assert_eq!(notes, vec![note]);
        assert!(kv.path_for(STORAGE_KEY).exists());
    }

    #[test]
    fn test_document_json_shape() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = LocalStore::new(kv.clone());
        store.create(draft("A", "hello")).unwrap();
        store.set_language(Language::Es).unwrap();

        let raw = kv.get(STORAGE_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["language"], "es");
        assert_eq!(value["notes"][0]["title"], "A");
        assert!(value["notes"][0]["updatedAt"].is_i64());
    }
}
