//! Sign-in and sign-out handlers

use anyhow::{bail, Context, Result};
use tracing::debug;

use insights_core::{MigrationOutcome, SyncError, SyncResult, SyncStore};

use crate::output::Output;

/// Sign in to cloud sync
///
/// Without a token this starts the OAuth flow in the browser. The provider
/// redirects back with an access token, which finishes sign-in when passed
/// with `--token`.
pub async fn login(
    store: &mut SyncStore,
    token: Option<String>,
    refresh_token: Option<String>,
    no_browser: bool,
    output: &Output,
) -> Result<()> {
    if !store.cloud().is_configured() {
        bail!(
            "Cloud sync is not configured.\n\
             Set cloud_url and cloud_key with 'insights config set'."
        );
    }

    let Some(token) = token else {
        let request = store.cloud().sign_in().context("Failed to start sign-in")?;
        let opened = !no_browser && open_browser(&request.url);

        if output.is_json() {
            output.json(&serde_json::json!({
                "status": "pending",
                "provider": request.provider,
                "url": request.url,
            }));
        } else {
            if !opened {
                output.message(&format!("Open this URL to sign in:\n  {}", request.url));
            }
            output.message(
                "After signing in, run: insights login --token <access_token> \
                 [--refresh-token <refresh_token>]",
            );
        }
        return Ok(());
    };

    let user = store
        .cloud()
        .complete_sign_in(&token, refresh_token)
        .await
        .context("Sign-in failed")?;

    let who = user
        .email
        .clone()
        .or_else(|| user.display_name.clone())
        .unwrap_or_else(|| user.uid.clone());

    match settle(store, Some(&user.uid)).await {
        Ok(Some(outcome)) => {
            output.success(&format!("Signed in as {}", who));
            if outcome.migrated > 0 {
                output.message(&format!(
                    "Moved {} local note(s) to the cloud",
                    outcome.migrated
                ));
            }
        }
        Ok(None) => output.success(&format!("Signed in as {}", who)),
        Err(SyncError::Cloud(e)) => {
            output.success(&format!("Signed in as {}", who));
            output.failure(&format!(
                "Local notes were not moved to the cloud and stay on this device: {}",
                e
            ));
        }
        Err(e) => return Err(e).context("Failed to switch to cloud notes"),
    }
    Ok(())
}

/// Sign out and return to local notes
pub async fn logout(store: &mut SyncStore, output: &Output) -> Result<()> {
    if store.cloud().current_user().is_none() {
        output.message("Not signed in.");
        return Ok(());
    }

    store.cloud().sign_out().await.context("Sign-out failed")?;
    settle(store, None)
        .await
        .context("Failed to switch to local notes")?;
    output.success("Signed out. Using notes stored on this device.");
    Ok(())
}

/// Apply identity changes until the store is bound to `uid`
///
/// A token refresh queued earlier may arrive before the sign-in or sign-out
/// that was just made.
async fn settle(
    store: &mut SyncStore,
    uid: Option<&str>,
) -> SyncResult<Option<MigrationOutcome>> {
    loop {
        let result = store.next_identity().await;
        if result.is_err() || store.user_id() == uid {
            return result;
        }
    }
}

fn open_browser(url: &str) -> bool {
    match open::that(url) {
        Ok(()) => true,
        Err(e) => {
            debug!("Could not open browser: {}", e);
            false
        }
    }
}
