//! Command handler modules.

pub mod config_cmd;
pub mod login;
pub mod remove;
pub mod status;
pub mod sync;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::engine::Engine;
use crate::error::CliError;

/// Dispatch an engine-backed command to its handler.
pub async fn dispatch(cmd: Command, engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Status(args) => status::handle(engine, args, global).await,
        Command::Sync(args) => sync::handle(engine, args, global).await,
        Command::Login(args) => login::handle(engine, args, global).await,
        Command::Watch(args) => watch::handle(engine, args, global).await,
        Command::Remove(args) => remove::handle(engine, args, global).await,
        Command::Config(_) => unreachable!("config is dispatched before engine construction"),
    }
}
