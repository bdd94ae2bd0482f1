//! Live note list

use std::pin::pin;

use anyhow::{Context, Result};
use tracing::debug;

use insights_core::{Subscription, SyncStore};

use crate::output::Output;

/// Print the note list now and after every change until Ctrl-C
///
/// Local notes are printed once; cloud notes follow remote changes. Signing
/// in or out elsewhere, or the session expiring, switches the list over.
pub async fn watch(store: &mut SyncStore, output: Output) -> Result<()> {
    if store.user_id().is_none() {
        output.message("Not signed in: showing local notes, which do not change remotely.");
    }

    let mut subscription = print_updates(store, output);
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());

    if !store.cloud().is_configured() {
        ctrl_c.await.context("Failed to listen for Ctrl-C")?;
        subscription.unsubscribe();
        return Ok(());
    }

    loop {
        let bound = store.state().clone();
        let changed = tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            changed = store.next_identity() => changed,
        };

        if let Err(e) = changed {
            output.failure(&format!("Could not switch notes: {}", e));
        }
        if *store.state() != bound {
            output.message(&format!("Now showing notes stored in: {}", store.state()));
            subscription.unsubscribe();
            subscription = print_updates(store, output);
        }
    }

    debug!("Stopping watch");
    subscription.unsubscribe();
    Ok(())
}

fn print_updates(store: &SyncStore, output: Output) -> Subscription {
    store.subscribe(move |result| match result {
        Ok(notes) => {
            output.print_notes(&notes);
            if !output.is_quiet() && !output.is_json() {
                println!("---");
            }
        }
        Err(e) => output.failure(&format!("Could not load notes: {}", e)),
    })
}
