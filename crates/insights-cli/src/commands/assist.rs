//! AI assistant handlers

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use insights_core::{AssistError, Assistant, Config, NotePatch, SyncStore};

use crate::commands::note::find_note;
use crate::output::{truncate, Output};

/// Rewrite a note's content more clearly
pub async fn enhance(
    store: &SyncStore,
    config: &Config,
    id: String,
    apply: bool,
    output: &Output,
) -> Result<()> {
    let notes = store.list().await?;
    let note = find_note(&notes, &id)?;
    let assistant = assistant(store, config)?;

    let enhanced = assistant
        .enhance(&note.content)
        .await
        .map_err(explain)
        .context("Failed to enhance note")?;

    if apply {
        store
            .update(note.id, &NotePatch::content(enhanced.clone()))
            .await
            .context("Failed to save enhanced content")?;
    }

    if output.is_json() {
        output.json(&serde_json::json!({
            "id": note.id,
            "content": enhanced,
            "applied": apply,
        }));
    } else {
        output.message(&enhanced);
        if apply {
            output.success(&format!("Updated note: {}", &note.id.to_string()[..8]));
        }
    }
    Ok(())
}

/// Summarize a note in one sentence
pub async fn summarize(
    store: &SyncStore,
    config: &Config,
    id: String,
    output: &Output,
) -> Result<()> {
    let notes = store.list().await?;
    let note = find_note(&notes, &id)?;
    let assistant = assistant(store, config)?;

    let summary = assistant
        .summarize(&note.content)
        .await
        .map_err(explain)
        .context("Failed to summarize note")?;

    if output.is_json() {
        output.json(&serde_json::json!({ "id": note.id, "summary": summary }));
    } else {
        output.message(&summary);
    }
    Ok(())
}

/// Read a note aloud into a WAV file
pub async fn speak(
    store: &SyncStore,
    config: &Config,
    id: String,
    out: Option<PathBuf>,
    output: &Output,
) -> Result<()> {
    let notes = store.list().await?;
    let note = find_note(&notes, &id)?;
    let assistant = assistant(store, config)?;

    let text = if note.title.trim().is_empty() {
        note.content.clone()
    } else {
        format!("{}. {}", note.title, note.content)
    };

    let audio = assistant
        .speak(&text)
        .await
        .map_err(explain)
        .context("Failed to generate speech")?;

    let path = out.unwrap_or_else(|| PathBuf::from(format!("{}.wav", &note.id.to_string()[..8])));
    fs::write(&path, audio.to_wav())
        .with_context(|| format!("Failed to write audio file: {}", path.display()))?;

    if output.is_json() {
        output.json(&serde_json::json!({
            "id": note.id,
            "path": path,
            "seconds": audio.duration_secs(),
        }));
    } else {
        output.success(&format!(
            "Saved {:.1}s of audio for \"{}\" to {}",
            audio.duration_secs(),
            truncate(note.display_title(), 30),
            path.display()
        ));
    }
    Ok(())
}

fn assistant(store: &SyncStore, config: &Config) -> Result<Assistant> {
    let language = store.language().context("Failed to read language")?;
    let assistant = Assistant::from_config(config).map_err(explain)?;
    Ok(assistant.with_language(language))
}

/// Attach a hint on how to fix the failure, where there is one
fn explain(err: AssistError) -> anyhow::Error {
    let hint = match &err {
        AssistError::MissingKey => Some("Set one with: insights config set ai_api_key <key>"),
        AssistError::InvalidKey(_) => Some("Check ai_api_key with: insights config show"),
        AssistError::QuotaExceeded(_) => Some("Wait a moment and try again"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_adds_hints() {
        let err = explain(AssistError::MissingKey);
        let text = format!("{:#}", err);
        assert!(text.contains("config set ai_api_key"));
        assert!(text.contains("No AI API key"));

        let err = explain(AssistError::EmptyResponse);
        assert_eq!(format!("{:#}", err), "The AI service returned no content");
    }
}
