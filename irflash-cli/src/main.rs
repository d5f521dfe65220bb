//! irflash CLI - relay firmware uploads to an infrared bootloader.
//!
//! ## Features
//!
//! - Upload server that turns Intel HEX streams into IR bursts
//! - Client that pushes a hex file to a running server
//! - Offline inspection and encoding of hex images
//! - Wake message transmission
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::serve::ServeOptions;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or an impossible request.
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration value.
    #[error("{0}")]
    Config(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// irflash - push firmware to microcontrollers through an IR bootloader.
///
/// Environment variables:
///   IRFLASH_CONFIG            - Configuration file path
///   IRFLASH_BIND              - Server bind address (default: 0.0.0.0)
///   IRFLASH_PORT              - Server TCP port (default: 12345)
///   IRFLASH_DEVICE            - LIRC transmit device (default: /dev/lirc0)
///   IRFLASH_HOST              - Server host for `send`
///   IRFLASH_STRICT_CHECKSUM   - Reject hex records with bad checksums
#[derive(Parser)]
#[command(name = "irflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Reject hex records whose checksum does not match.
    #[arg(long, global = true, env = "IRFLASH_STRICT_CHECKSUM")]
    strict_checksum: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "IRFLASH_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the upload server until Ctrl-C.
    Serve {
        /// Local address to listen on.
        #[arg(long, env = "IRFLASH_BIND")]
        bind: Option<IpAddr>,

        /// TCP port to listen on.
        #[arg(short, long, env = "IRFLASH_PORT")]
        port: Option<u16>,

        /// LIRC device used to transmit.
        #[arg(short, long, env = "IRFLASH_DEVICE")]
        device: Option<PathBuf>,

        /// Print bursts to stdout instead of transmitting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Upload a hex file to a running server.
    Send {
        /// Intel HEX file to upload.
        file: PathBuf,

        /// Server host name or address.
        #[arg(long, default_value = "127.0.0.1", env = "IRFLASH_HOST")]
        host: String,

        /// Server TCP port.
        #[arg(short, long, env = "IRFLASH_PORT")]
        port: Option<u16>,
    },

    /// Show the flash pages a hex file would program.
    Info {
        /// Intel HEX file.
        file: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Render the bursts an upload would transmit, without hardware.
    Encode {
        /// Intel HEX file.
        file: PathBuf,

        /// Output bursts as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Transmit a wake message.
    Wake {
        /// Message to send (defaults to the configured wake command).
        message: Option<String>,

        /// LIRC device used to transmit.
        #[arg(short, long, env = "IRFLASH_DEVICE")]
        device: Option<PathBuf>,

        /// Print the burst to stdout instead of transmitting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "irflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    if cli.strict_checksum {
        config.upload.strict_checksum = Some(true);
    }

    match &cli.command {
        Commands::Serve {
            bind,
            port,
            device,
            dry_run,
        } => commands::serve::cmd_serve(
            cli,
            &config,
            &ServeOptions {
                bind: *bind,
                port: *port,
                device: device.clone(),
                dry_run: *dry_run,
            },
        ),
        Commands::Send { file, host, port } => {
            commands::send::cmd_send(cli, &config, file, host, *port)
        },
        Commands::Info { file, json } => commands::info::cmd_info(&config, file, *json),
        Commands::Encode { file, json } => commands::encode::cmd_encode(&config, file, *json),
        Commands::Wake {
            message,
            device,
            dry_run,
        } => commands::wake::cmd_wake(
            cli,
            &config,
            message.as_deref(),
            device.as_deref(),
            *dry_run,
        ),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Map an error chain to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<irflash::Error>() {
        Some(irflash::Error::Config(_)) => 3,
        Some(irflash::Error::Cancelled) => 130,
        _ => 1,
    }
}
