//! Upload client command.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use irflash::server::DEFAULT_PORT;
use log::debug;
use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, use_fancy_output};

use super::load_hex_file;

/// Send command implementation.
///
/// The server never answers, but it closes the connection once the last page
/// has been transmitted, so waiting for end of stream tells when the target
/// is done.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    file: &Path,
    host: &str,
    port: Option<u16>,
) -> Result<()> {
    // Reject a bad image here rather than after the target has been woken
    let pages = load_hex_file(config, file)?;
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} {} ({} page(s), {} bytes)",
            style("📦").cyan(),
            file.display(),
            pages.len(),
            data.len()
        );
    }

    let port = port.or(config.server.port).unwrap_or(DEFAULT_PORT);
    let mut stream = TcpStream::connect((host, port))
        .with_context(|| format!("Failed to connect to {host}:{port}"))?;
    if !cli.quiet {
        eprintln!("{} Connected to {host}:{port}", style("🔌").cyan());
    }

    stream
        .write_all(&data)
        .context("Failed to send hex file")?;
    stream
        .shutdown(Shutdown::Write)
        .context("Failed to close upload stream")?;

    let spinner = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    };
    spinner.set_message("Server is transmitting...");

    wait_for_close(&mut stream);
    spinner.finish_and_clear();

    if !cli.quiet {
        eprintln!("\n{} Upload finished", style("🎉").green().bold());
    }
    Ok(())
}

/// Drain the connection until the server closes it.
fn wait_for_close(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => debug!("Ignoring {n} unexpected byte(s) from server"),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => {
                debug!("Connection ended: {e}");
                return;
            },
        }
    }
}
