//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod config_cmd;
pub mod controls;
pub mod info;
pub mod send;
pub mod stream;

use loxone_core::Controller;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command that needs a live session.
pub async fn dispatch(
    cmd: Command,
    controller: &Controller,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Stream(args) => stream::handle(controller, &args, global).await,
        Command::Controls(args) => controls::handle(controller, &args, global),
        Command::Send(args) => send::handle(controller, &args, global).await,
        // Handled before a session is opened
        Command::Info | Command::Config(_) => Ok(()),
    }
}

/// Parse a state or control identifier given on the command line.
pub(crate) fn parse_identifier(raw: &str) -> Result<loxone_core::Identifier, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "identifier".into(),
        reason: format!("'{raw}' is not a Miniserver identifier"),
    })
}
