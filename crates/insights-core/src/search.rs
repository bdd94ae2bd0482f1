//! Client-side note filtering
//!
//! Works over whatever list the caller holds, independent of which backend
//! produced it.

use crate::models::Note;

/// Notes whose title or content contains `query`, ignoring case
///
/// An empty query returns the input unchanged. Input order is preserved.
pub fn search(notes: &[Note], query: &str) -> Vec<Note> {
    if query.is_empty() {
        return notes.to_vec();
    }

    let needle = query.to_lowercase();
    notes
        .iter()
        .filter(|note| {
            note.title.to_lowercase().contains(&needle)
                || note.content.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteDraft;

    fn note(title: &str, content: &str) -> Note {
        Note::from_draft(NoteDraft::new(content).with_title(title)).unwrap()
    }

    #[test]
    fn test_empty_query_is_identity() {
        let notes = vec![note("A", "one"), note("B", "two")];
        assert_eq!(search(&notes, ""), notes);
    }

    #[test]
    fn test_matches_title_or_content_case_insensitively() {
        let notes = vec![
            note("Groceries", "milk and eggs"),
            note("Work", "Call the BANK"),
            note("Ideas", "nothing here"),
        ];

        let results = search(&notes, "bank");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Work");

        let results = search(&notes, "GROC");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Groceries");
    }

    #[test]
    fn test_returns_exact_subset_in_order() {
        let notes = vec![
            note("alpha", "x"),
            note("beta", "alpha inside"),
            note("gamma", "y"),
        ];
        let results = search(&notes, "Alpha");
        let titles: Vec<_> = results.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_no_match() {
        let notes = vec![note("A", "one")];
        assert!(search(&notes, "zzz").is_empty());
    }
}
