//! Status command handler

use anyhow::Result;

use insights_core::{Config, SyncStore};

use crate::output::{Output, OutputFormat};

/// Show where notes go and who is signed in
pub async fn show(store: &SyncStore, config: &Config, output: &Output) -> Result<()> {
    let user = store.cloud().current_user();
    let local_notes = store.local().note_count().unwrap_or(0);
    let language = store.language().unwrap_or_default();

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "state": store.state().to_string(),
                "backend": store.backend_name(),
                "cloud_configured": store.cloud().is_configured(),
                "user": user,
                "data_dir": config.data_dir,
                "local_notes": local_notes,
                "language": language.code(),
                "assistant_configured": config.ai_api_key.is_some(),
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", store.backend_name());
        }
        OutputFormat::Human => {
            println!("Insights Status");
            println!("===============");
            println!();
            println!("Notes:");
            println!("  Stored in: {}", store.state());
            match store.list().await {
                Ok(notes) => println!("  Count:     {}", notes.len()),
                Err(e) => println!("  Count:     unavailable ({})", e),
            }
            println!();
            println!("Cloud:");
            if store.cloud().is_configured() {
                println!("  Server:    {}", config.cloud_url.as_deref().unwrap_or(""));
                match user {
                    Some(ref user) => {
                        println!("  User:      {}", user.uid);
                        if let Some(ref email) = user.email {
                            println!("  Email:     {}", email);
                        }
                    }
                    None => println!("  User:      (signed out)"),
                }
            } else {
                println!("  Status:    not configured");
            }
            println!();
            println!("Device:");
            println!("  Location:  {}", config.data_dir.display());
            println!("  Local:     {} note(s)", local_notes);
            println!("  Language:  {}", language);
            println!(
                "  Assistant: {}",
                if config.ai_api_key.is_some() {
                    "configured"
                } else {
                    "not configured"
                }
            );
        }
    }

    Ok(())
}
