//! Note command handlers

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use insights_core::{Note, NoteColor, NoteDraft, NotePatch, SyncStore};

use crate::editor::{confirm, edit_note_content};
use crate::output::{truncate, Output};

/// Note fields given on the command line
#[derive(Debug, Default)]
pub struct NoteInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub color: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

/// Create a new note
pub async fn create(store: &SyncStore, input: NoteInput, output: &Output) -> Result<()> {
    let content = match input.content {
        Some(content) => content,
        None => edit_note_content("New note. Lines starting with # are ignored.", "")?,
    };

    if content.trim().is_empty() {
        bail!("Note content cannot be empty");
    }

    let mut draft = NoteDraft::new(content).with_schedule(input.date, input.time);
    if let Some(title) = input.title {
        draft = draft.with_title(title);
    }
    if let Some(color) = input.color {
        draft = draft.with_color(parse_color(&color)?);
    }

    let note = store.create(draft).await.context("Failed to create note")?;

    if output.is_json() {
        output.print_note(&note);
    } else {
        output.success(&format!("Created note: {}", &note.id.to_string()[..8]));
    }
    Ok(())
}

/// List all notes
pub async fn list(store: &SyncStore, output: &Output) -> Result<()> {
    let notes = store.list().await.context("Failed to list notes")?;
    output.print_notes(&notes);
    Ok(())
}

/// Show a single note
pub async fn show(store: &SyncStore, id: String, output: &Output) -> Result<()> {
    let notes = store.list().await?;
    let note = find_note(&notes, &id)?;
    output.print_note(note);
    Ok(())
}

/// Edit a note
///
/// Without field flags the content opens in the editor.
pub async fn edit(
    store: &SyncStore,
    id: String,
    input: NoteInput,
    clear_schedule: bool,
    output: &Output,
) -> Result<()> {
    let notes = store.list().await?;
    let note = find_note(&notes, &id)?;

    let mut patch = NotePatch {
        title: input.title,
        content: input.content,
        color: input.color.as_deref().map(parse_color).transpose()?,
        date: input.date.map(Some),
        time: input.time.map(Some),
    };
    if clear_schedule {
        patch.date = Some(None);
        patch.time = Some(None);
    }

    if patch.is_empty() {
        let header = format!("Editing: {}", note.display_title());
        let edited = edit_note_content(&header, &note.content)?;
        if edited == note.content {
            output.message("No changes made.");
            return Ok(());
        }
        patch.content = Some(edited);
    }

    if patch.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
        bail!("Note content cannot be empty");
    }

    store
        .update(note.id, &patch)
        .await
        .context("Failed to update note")?;
    output.success(&format!("Updated note: {}", &note.id.to_string()[..8]));
    Ok(())
}

/// Delete a note after confirmation
pub async fn delete(store: &SyncStore, id: String, output: &Output) -> Result<()> {
    let notes = store.list().await?;
    let note = find_note(&notes, &id)?;

    if output.should_prompt() {
        println!(
            "Delete note: {} - {}",
            &note.id.to_string()[..8],
            truncate(&note.content.replace('\n', " "), 50)
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete(note.id).await.context("Failed to delete note")?;
    output.success(&format!("Deleted note: {}", &note.id.to_string()[..8]));
    Ok(())
}

/// Search notes by title or content
pub async fn search(store: &SyncStore, query: String, output: &Output) -> Result<()> {
    let notes = store.list().await?;
    let results = SyncStore::search(&notes, &query);
    output.print_notes(&results);
    Ok(())
}

/// Put the given notes first, in order; the rest keep their relative order
pub async fn reorder(store: &SyncStore, ids: Vec<String>, output: &Output) -> Result<()> {
    let notes = store.list().await?;

    let mut front = Vec::with_capacity(ids.len());
    for id in &ids {
        let note = find_note(&notes, id)?;
        if front.iter().any(|n: &Note| n.id == note.id) {
            bail!("Note listed twice: {}", id);
        }
        front.push(note.clone());
    }

    let ordered = arrange(notes, front);
    store.reorder(&ordered).await.context("Failed to reorder notes")?;
    output.success(&format!("Reordered {} note(s)", ordered.len()));
    Ok(())
}

/// Move one note to a position in the manual order
pub async fn move_to(
    store: &SyncStore,
    id: String,
    position: usize,
    output: &Output,
) -> Result<()> {
    let mut notes = store.list().await?;
    let wanted = find_note_id(&notes, &id)?;
    let index = notes
        .iter()
        .position(|n| n.id == wanted)
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    let note = notes.remove(index);
    let target = position.min(notes.len());
    let note_id = note.id;
    notes.insert(target, note);

    store.reorder(&notes).await.context("Failed to move note")?;
    output.success(&format!(
        "Moved note {} to position {}",
        &note_id.to_string()[..8],
        target
    ));
    Ok(())
}

/// Listed notes first, then every other note in its current order
fn arrange(all: Vec<Note>, front: Vec<Note>) -> Vec<Note> {
    let rest: Vec<Note> = all
        .into_iter()
        .filter(|n| !front.iter().any(|f| f.id == n.id))
        .collect();
    front.into_iter().chain(rest).collect()
}

fn parse_color(value: &str) -> Result<NoteColor> {
    value.parse::<NoteColor>().with_context(|| {
        let names: Vec<_> = NoteColor::ALL.iter().map(|c| c.name()).collect();
        format!("Valid colors: {}", names.join(", "))
    })
}

/// Find a note by full UUID or unique prefix
pub fn find_note<'a>(notes: &'a [Note], id: &str) -> Result<&'a Note> {
    let wanted = find_note_id(notes, id)?;
    notes
        .iter()
        .find(|n| n.id == wanted)
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))
}

/// Resolve a note ID (supports full UUID or prefix)
fn find_note_id(notes: &[Note], id: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }

    let matches: Vec<_> = notes
        .iter()
        .filter(|n| n.id.to_string().starts_with(id))
        .collect();

    match matches.len() {
        0 => bail!("No note found matching: {}", id),
        1 => Ok(matches[0].id),
        _ => {
            eprintln!("Multiple notes match '{}':", id);
            for note in &matches {
                eprintln!(
                    "  {} - {}",
                    &note.id.to_string()[..8],
                    truncate(note.display_title(), 30)
                );
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes() -> Vec<Note> {
        ["one", "two", "three"]
            .into_iter()
            .map(|content| Note::from_draft(NoteDraft::new(content)).unwrap())
            .collect()
    }

    #[test]
    fn test_find_note_by_full_id_and_prefix() {
        let notes = notes();
        let target = &notes[1];

        assert_eq!(find_note(&notes, &target.id.to_string()).unwrap().id, target.id);

        let prefix = &target.id.to_string()[..12];
        assert_eq!(find_note(&notes, prefix).unwrap().id, target.id);

        assert!(find_note(&notes, "zzzz").is_err());
    }

    #[test]
    fn test_arrange_puts_listed_first() {
        let notes = notes();
        let front = vec![notes[2].clone()];
        let ids: Vec<_> = arrange(notes.clone(), front).iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![notes[2].id, notes[0].id, notes[1].id]);
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("green").unwrap(), NoteColor::Green);
        assert_eq!(parse_color("bg-pink-200").unwrap(), NoteColor::Pink);
        let err = parse_color("teal").unwrap_err();
        assert!(format!("{:#}", err).contains("yellow"));
    }
}
