//! Upload server command.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use irflash::{ServerState, UploadProgress, UploadServer};
use log::{debug, info};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::Config;
use crate::{Cli, use_fancy_output};

use super::open_transmitter;

/// Command-line overrides for `serve`.
pub(crate) struct ServeOptions {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub device: Option<PathBuf>,
    pub dry_run: bool,
}

/// Serve command implementation.
pub(crate) fn cmd_serve(cli: &Cli, config: &Config, opts: &ServeOptions) -> Result<()> {
    let mut upload = config.upload_config()?;
    if let Some(bind) = opts.bind {
        upload.bind = bind;
    }
    if let Some(port) = opts.port {
        upload.port = port;
    }

    let device = opts.device.clone().unwrap_or_else(|| config.device());
    let transmitter = open_transmitter(&device, opts.dry_run)?;
    if !cli.quiet {
        let target = if opts.dry_run {
            "stdout (dry run)".to_string()
        } else {
            device.display().to_string()
        };
        eprintln!("{} Transmitting via {}", style("📡").cyan(), style(target).green());
    }

    let quiet = cli.quiet;
    let mut reporter = ProgressReporter::new(quiet);
    let handle = UploadServer::new(upload, transmitter)
        .on_progress(move |event| reporter.report(event))
        .start()
        .context("Failed to start upload server")?;

    if let ServerState::Listening { ip, port } = handle.state() {
        if !quiet {
            eprintln!(
                "{} Listening on {}",
                style("✓").green(),
                style(format!("{ip}:{port}")).cyan().bold()
            );
            eprintln!(
                "  Upload with: {}",
                style(format!("irflash send <FILE> --host {ip} --port {port}")).dim()
            );
            eprintln!("  {}", style("Press Ctrl-C to stop").dim());
        }
    }

    let stopper = handle.stopper();
    ctrlc::set_handler(move || stopper.stop()).context("Failed to install Ctrl-C handler")?;

    let status = handle.status();
    handle.wait();

    let summary = status.snapshot();
    info!(
        "Server stopped after {} completed upload(s)",
        summary.completed_uploads
    );
    if let Some(err) = summary.last_error {
        debug!("Last error: {err}");
    }
    Ok(())
}

/// Turns server progress events into console output.
struct ProgressReporter {
    quiet: bool,
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    fn new(quiet: bool) -> Self {
        Self { quiet, bar: None }
    }

    fn line(&self, text: &str) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.println(text),
            _ => eprintln!("{text}"),
        }
    }

    fn report(&mut self, event: &UploadProgress) {
        match event {
            UploadProgress::Connected { peer } => {
                self.line(&format!("{} Client connected: {peer}", style("🔌").cyan()));
            },
            UploadProgress::Woke => {
                self.line(&format!(
                    "{} Wake command sent, waiting for bootloader",
                    style("⏳").yellow()
                ));
            },
            UploadProgress::Loaded { pages } => {
                self.line(&format!("{} Image has {pages} page(s)", style("ℹ").blue()));
                self.bar = Some(page_bar(*pages as u64, self.quiet));
            },
            UploadProgress::PageSent {
                sent,
                total,
                address,
            } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(*sent as u64);
                    bar.set_message(format!("page {sent}/{total} @ 0x{address:04X}"));
                }
            },
            UploadProgress::Finished { pages } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
                self.line(&format!(
                    "{} Upload complete: {pages} page(s) sent",
                    style("🎉").green().bold()
                ));
            },
            UploadProgress::Failed { reason } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon();
                }
                self.line(&format!("{} Upload failed: {reason}", style("✗").red().bold()));
            },
        }
    }
}

fn page_bar(pages: u64, quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(pages);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(bar_style);
    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar
}
