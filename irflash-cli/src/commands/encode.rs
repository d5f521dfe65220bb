//! Offline burst rendering.

use anyhow::{Context, Result};
use irflash::{
    CancelToken, DumpTransmitter, FirmwareSender, FlashPageMap, FrameConfig, UploadConfig, encode_flash,
};
use log::debug;
use std::io;
use std::path::Path;
use std::time::Duration;

use super::load_hex_file;
use crate::config::Config;

/// Encode command implementation.
///
/// Text output is one line per burst, `<frequency> <d0> <d1> ...`, the same
/// format `serve --dry-run` prints.
pub(crate) fn cmd_encode(config: &Config, file: &Path, json: bool) -> Result<()> {
    let upload = config.upload_config()?;
    let flash = load_hex_file(config, file)?;

    if json {
        return print_bursts_json(&upload, &flash);
    }

    let mut dump = DumpTransmitter::new(io::stdout());
    upload
        .wake_signaler()
        .send(&mut dump, &upload.wake_command)
        .context("Failed to encode wake command")?;

    let frame_config = FrameConfig {
        page_delay: Duration::ZERO,
        ..upload.frame_config()
    };
    FirmwareSender::with_config(&mut dump, frame_config)
        .send_flash(&flash, &CancelToken::new(), |sent, total, address| {
            debug!("Encoded page {sent}/{total} @ 0x{address:04X}");
        })
        .context("Failed to encode pages")?;

    debug!("{} burst(s) written", dump.bursts());
    Ok(())
}

fn print_bursts_json(upload: &UploadConfig, flash: &FlashPageMap) -> Result<()> {
    let wake = upload
        .wake_signaler()
        .encode(&upload.wake_command)
        .context("Failed to encode wake command")?;
    let frames = encode_flash(flash, upload.geometry.page_size).context("Failed to encode pages")?;

    let pages: Vec<serde_json::Value> = frames
        .iter()
        .map(|page| {
            serde_json::json!({
                "address": format!("0x{:04X}", page.address),
                "counter": page.packet.counter(),
                "crc": format!("0x{:02X}", page.packet.crc()),
                "packet_len": page.packet.len(),
                "frame_len": page.frame.len(),
                "pattern": page.frame.to_pulses(upload.bit_unit_us),
            })
        })
        .collect();

    let output = serde_json::json!({
        "ok": true,
        "data": {
            "frequency_hz": upload.frequency_hz,
            "wake": {
                "message": upload.wake_command,
                "pattern": wake,
            },
            "pages": pages,
        }
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
