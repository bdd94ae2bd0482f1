//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use insights_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, cloud_url, cloud_key, auth_provider, redirect_url, \
                          ai_api_key, ai_model, speech_model, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "data_dir": config.data_dir,
                "cloud_url": config.cloud_url,
                "cloud_key": config.cloud_key.as_deref().map(mask),
                "auth_provider": config.auth_provider,
                "redirect_url": config.redirect_url,
                "ai_api_key": config.ai_api_key.as_deref().map(mask),
                "ai_model": config.ai_model,
                "speech_model": config.speech_model,
                "log_file": config.log_file,
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:      {}", config.data_dir.display());
            println!("  cloud_url:     {}", or_unset(config.cloud_url.as_deref()));
            println!(
                "  cloud_key:     {}",
                or_unset(config.cloud_key.as_deref().map(mask).as_deref())
            );
            println!("  auth_provider: {}", config.auth_provider);
            println!("  redirect_url:  {}", or_unset(config.redirect_url.as_deref()));
            println!(
                "  ai_api_key:    {}",
                or_unset(config.ai_api_key.as_deref().map(mask).as_deref())
            );
            println!("  ai_model:      {}", config.ai_model);
            println!("  speech_model:  {}", config.speech_model);
            println!(
                "  log_file:      {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match key.as_str() {
        "data_dir" => config.data_dir = required(&key, &value)?.into(),
        "cloud_url" => config.cloud_url = optional(&value),
        "cloud_key" => config.cloud_key = optional(&value),
        "auth_provider" => config.auth_provider = required(&key, &value)?,
        "redirect_url" => config.redirect_url = optional(&value),
        "ai_api_key" => config.ai_api_key = optional(&value),
        "ai_model" => config.ai_model = required(&key, &value)?,
        "speech_model" => config.speech_model = required(&key, &value)?,
        "log_file" => config.log_file = optional(&value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key.ends_with("_key") {
        mask(&value)
    } else {
        value
    };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

/// "none" or an empty value clears an optional setting
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn required(key: &str, value: &str) -> Result<String> {
    match optional(value) {
        Some(value) => Ok(value),
        None => bail!("'{}' cannot be cleared", key),
    }
}

/// Show only the last four characters of a secret
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}
