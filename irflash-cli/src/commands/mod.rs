//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod encode;
pub(crate) mod info;
pub(crate) mod send;
pub(crate) mod serve;
pub(crate) mod wake;

use anyhow::{Context, Result};
use irflash::{DumpTransmitter, FlashPageMap, IrTransmitter, LircTransmitter, LoadOptions, load_flash_pages};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use crate::config::Config;

/// Open the LIRC device, or a stdout dump for dry runs.
pub(crate) fn open_transmitter(device: &Path, dry_run: bool) -> Result<Box<dyn IrTransmitter>> {
    if dry_run {
        return Ok(Box::new(DumpTransmitter::new(io::stdout())));
    }
    let lirc = LircTransmitter::open(device)
        .with_context(|| format!("Failed to open LIRC device {}", device.display()))?;
    Ok(Box::new(lirc))
}

/// Parse a hex file into flash pages using the configured target layout.
pub(crate) fn load_hex_file(config: &Config, path: &Path) -> Result<FlashPageMap> {
    let geometry = config.geometry()?;
    let file =
        File::open(path).with_context(|| format!("Failed to open hex file {}", path.display()))?;
    let options = LoadOptions {
        strict_checksum: config.strict_checksum(),
    };
    load_flash_pages(BufReader::new(file), geometry, options)
        .with_context(|| format!("Failed to load hex file {}", path.display()))
}
