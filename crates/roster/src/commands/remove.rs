//! Remove command handler.

use std::io::Write;

use roster_core::AccountId;

use crate::cli::{GlobalOpts, RemoveArgs};
use crate::engine::Engine;
use crate::error::CliError;

pub async fn handle(engine: &Engine, args: RemoveArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let id = AccountId::from(args.account_id.as_str());

    if !confirm(
        &format!("Remove account '{id}' locally and from the cloud?"),
        global.yes,
    )? {
        return Ok(());
    }

    if !engine.sync.delete_account(&id).await {
        return Err(CliError::ApiError {
            message: format!("cloud record deletion failed for '{id}'"),
            status: None,
        });
    }

    if !global.quiet {
        eprintln!("Account removed");
    }
    Ok(())
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }

    eprint!("{message} [y/N] ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
