//! Wake message command.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::open_transmitter;
use crate::config::Config;
use crate::{Cli, CliError};

/// Wake command implementation.
pub(crate) fn cmd_wake(
    cli: &Cli,
    config: &Config,
    message: Option<&str>,
    device: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    let upload = config.upload_config()?;
    let message = message.map_or_else(|| upload.wake_command.clone(), str::to_string);
    if !message.is_ascii() {
        return Err(CliError::Usage(format!("wake message must be ASCII: {message:?}")).into());
    }

    let device = device.map_or_else(|| config.device(), Path::to_path_buf);
    let mut transmitter = open_transmitter(&device, dry_run)?;

    upload
        .wake_signaler()
        .send(&mut transmitter, &message)
        .with_context(|| format!("Failed to send wake message {message:?}"))?;

    if !cli.quiet {
        eprintln!("{} Sent {}", style("✓").green(), style(&message).cyan());
    }
    Ok(())
}
