//! Data models for Insights
//!
//! Defines the note, its color tag, the UI language preference, and the
//! input shapes used to create and partially update notes.
//!
//! The JSON shape (camelCase, epoch-millisecond timestamps, style-token colors)
//! is shared by the local document, backup files and the cloud table.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by model validation and parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Note content cannot be empty")]
    EmptyContent,

    #[error("Unknown color '{0}'. Valid colors: yellow, blue, green, pink, purple, orange")]
    UnknownColor(String),

    #[error("Unknown language '{0}'. Valid languages: pt-BR, en, es")]
    UnknownLanguage(String),
}

/// Visual tag of a note
///
/// Serialized with the style tokens used by existing documents and backups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteColor {
    #[default]
    #[serde(rename = "bg-yellow-200")]
    Yellow,
    #[serde(rename = "bg-blue-200")]
    Blue,
    #[serde(rename = "bg-green-200")]
    Green,
    #[serde(rename = "bg-pink-200")]
    Pink,
    #[serde(rename = "bg-purple-200")]
    Purple,
    #[serde(rename = "bg-orange-200")]
    Orange,
}

impl NoteColor {
    pub const ALL: [NoteColor; 6] = [
        NoteColor::Yellow,
        NoteColor::Blue,
        NoteColor::Green,
        NoteColor::Pink,
        NoteColor::Purple,
        NoteColor::Orange,
    ];

    /// Short human name
    pub fn name(&self) -> &'static str {
        match self {
            NoteColor::Yellow => "yellow",
            NoteColor::Blue => "blue",
            NoteColor::Green => "green",
            NoteColor::Pink => "pink",
            NoteColor::Purple => "purple",
            NoteColor::Orange => "orange",
        }
    }

    /// Persisted style token
    pub fn token(&self) -> &'static str {
        match self {
            NoteColor::Yellow => "bg-yellow-200",
            NoteColor::Blue => "bg-blue-200",
            NoteColor::Green => "bg-green-200",
            NoteColor::Pink => "bg-pink-200",
            NoteColor::Purple => "bg-purple-200",
            NoteColor::Orange => "bg-orange-200",
        }
    }
}

impl fmt::Display for NoteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for NoteColor {
    type Err = ModelError;

    /// Accepts either the short name (`blue`) or the style token (`bg-blue-200`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        NoteColor::ALL
            .into_iter()
            .find(|color| color.name() == wanted || color.token() == wanted)
            .ok_or_else(|| ModelError::UnknownColor(s.to_string()))
    }
}

/// Interface language preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "pt-BR")]
    PtBr,
    #[serde(rename = "en")]
    En,
    #[serde(rename = "es")]
    Es,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::PtBr, Language::En, Language::Es];

    pub fn code(&self) -> &'static str {
        match self {
            Language::PtBr => "pt-BR",
            Language::En => "en",
            Language::Es => "es",
        }
    }

    /// Language name as written in AI prompts
    pub fn prompt_name(&self) -> &'static str {
        match self {
            Language::PtBr => "Brazilian Portuguese",
            Language::En => "English",
            Language::Es => "Spanish",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Language {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Language::ALL
            .into_iter()
            .find(|lang| lang.code().eq_ignore_ascii_case(wanted))
            .or(match wanted.to_lowercase().as_str() {
                "pt" | "pt_br" => Some(Language::PtBr),
                _ => None,
            })
            .ok_or_else(|| ModelError::UnknownLanguage(s.to_string()))
    }
}

/// A sticky note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier, assigned at creation
    pub id: Uuid,
    /// Title (may be empty)
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    /// Body text (required)
    pub content: String,
    /// Visual tag
    #[serde(default, deserialize_with = "null_as_default")]
    pub color: NoteColor,
    /// Scheduled date, `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Scheduled time, `HH:MM`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Manual position set by reordering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    /// When this note was created
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// When this note was last changed
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Owner, set only on cloud-owned notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Note {
    /// Create a new note from user input
    pub fn from_draft(draft: NoteDraft) -> Result<Self, ModelError> {
        draft.validate()?;
        let now = now_millis();
        Ok(Self {
            id: Uuid::new_v4(),
            title: draft.title,
            content: draft.content,
            color: draft.color,
            date: draft.date,
            time: draft.time,
            order: None,
            created_at: now,
            updated_at: now,
            user_id: None,
        })
    }

    /// Whether this note belongs to a cloud owner
    pub fn is_cloud_owned(&self) -> bool {
        self.user_id.is_some()
    }

    /// Refresh `updated_at`, never moving it backwards or leaving it unchanged
    pub fn touch(&mut self) {
        self.updated_at = next_timestamp(self.updated_at);
    }

    /// Title for display; empty titles get a placeholder
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "(untitled)"
        } else {
            &self.title
        }
    }
}

/// Input for creating a note
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub color: NoteColor,
    pub date: Option<String>,
    pub time: Option<String>,
}

impl NoteDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_color(mut self, color: NoteColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_schedule(mut self, date: Option<String>, time: Option<String>) -> Self {
        self.date = date;
        self.time = time;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.content.trim().is_empty() {
            return Err(ModelError::EmptyContent);
        }
        Ok(())
    }
}

/// Partial update of a note's editable fields
///
/// `date` and `time` use a nested option so a patch can clear them:
/// `None` leaves the field alone, `Some(None)` removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub color: Option<NoteColor>,
    pub date: Option<Option<String>>,
    pub time: Option<Option<String>>,
}

impl NotePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn color(color: NoteColor) -> Self {
        Self {
            color: Some(color),
            ..Self::default()
        }
    }

    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.color.is_none()
            && self.date.is_none()
            && self.time.is_none()
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match &self.content {
            Some(content) if content.trim().is_empty() => Err(ModelError::EmptyContent),
            _ => Ok(()),
        }
    }

    /// Apply the patch and refresh `updated_at`
    pub fn apply_to(&self, note: &mut Note) -> Result<(), ModelError> {
        self.validate()?;
        if let Some(ref title) = self.title {
            note.title = title.clone();
        }
        if let Some(ref content) = self.content {
            note.content = content.clone();
        }
        if let Some(color) = self.color {
            note.color = color;
        }
        if let Some(ref date) = self.date {
            note.date = date.clone();
        }
        if let Some(ref time) = self.time {
            note.time = time.clone();
        }
        note.touch();
        Ok(())
    }

    /// Column/value pairs for a remote row update
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(ref title) = self.title {
            fields.insert("title".into(), Value::from(title.clone()));
        }
        if let Some(ref content) = self.content {
            fields.insert("content".into(), Value::from(content.clone()));
        }
        if let Some(color) = self.color {
            fields.insert("color".into(), Value::from(color.token()));
        }
        if let Some(ref date) = self.date {
            fields.insert("date".into(), date.clone().map_or(Value::Null, Value::from));
        }
        if let Some(ref time) = self.time {
            fields.insert("time".into(), time.clone().map_or(Value::Null, Value::from));
        }
        fields
    }
}

/// Current time at the millisecond resolution timestamps are stored with
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// A timestamp strictly after `previous`, normally "now"
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_millis();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
