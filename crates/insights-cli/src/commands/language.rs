//! Language preference handler

use anyhow::{Context, Result};

use insights_core::{Language, SyncStore};

use crate::output::Output;

/// Show the language, or set it when a code is given
pub fn language(store: &SyncStore, code: Option<String>, output: &Output) -> Result<()> {
    let Some(code) = code else {
        let current = store.language().context("Failed to read language")?;
        if output.is_json() {
            output.json(&serde_json::json!({ "language": current.code() }));
        } else {
            println!("{}", current.code());
        }
        return Ok(());
    };

    let language = parse_language(&code)?;
    store
        .set_language(language)
        .context("Failed to save language")?;
    output.success(&format!("Language set to {}", language.code()));
    Ok(())
}

fn parse_language(code: &str) -> Result<Language> {
    code.parse::<Language>().with_context(|| {
        let codes: Vec<_> = Language::ALL.iter().map(|l| l.code()).collect();
        format!("Supported languages: {}", codes.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::storage::LocalStore;
    use insights_core::CloudAdapter;

    use crate::output::OutputFormat;

    #[test]
    fn test_set_language() {
        let store = SyncStore::new(LocalStore::in_memory(), CloudAdapter::Unconfigured);
        let output = Output::new(OutputFormat::Quiet);

        assert_eq!(store.language().unwrap(), Language::PtBr);
        language(&store, Some("en".to_string()), &output).unwrap();
        assert_eq!(store.language().unwrap(), Language::En);
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        let err = parse_language("klingon").unwrap_err();
        assert!(format!("{:#}", err).contains("pt-BR"));
    }
}
