//! Hex image info command.

use {
    anyhow::Result,
    console::style,
    irflash::{FlashPageMap, image::hex::ERASED_BYTE, protocol::frame::MAX_PAGES},
    std::path::Path,
};

use super::load_hex_file;
use crate::config::Config;

/// Bytes in a page that differ from the erased state.
fn used_bytes(page: &[u8]) -> usize {
    page.iter().filter(|&&b| b != ERASED_BYTE).count()
}

/// Info command implementation.
pub(crate) fn cmd_info(config: &Config, file: &Path, json: bool) -> Result<()> {
    let geometry = config.geometry()?;
    let flash = load_hex_file(config, file)?;

    if json {
        return print_info_json(&flash, geometry.page_size, geometry.page_count);
    }

    eprintln!("{} {}", style("📦").cyan(), file.display());
    eprintln!("\n{}", style("Image Information").bold().underlined());
    eprintln!(
        "  Target: {} pages x {} bytes ({} bytes)",
        geometry.page_count,
        geometry.page_size,
        geometry.flash_size()
    );
    eprintln!("  Pages to send: {}", flash.len());

    let used: usize = flash.iter().map(|(_, page)| used_bytes(page)).sum();
    eprintln!("  Programmed bytes: {used}");

    if flash.len() > MAX_PAGES {
        eprintln!(
            "  {} more than {MAX_PAGES} pages cannot be uploaded in one transfer",
            style("⚠").yellow()
        );
    }

    if !flash.is_empty() {
        eprintln!("\n{}", style("Pages").bold().underlined());
    }
    let total = flash.len();
    for (index, (address, page)) in flash.iter().enumerate() {
        eprintln!(
            "  [{:3}] {} {:3} bytes used, counter {}",
            index,
            style(format!("0x{address:04X}")).cyan(),
            used_bytes(page),
            total - index
        );
    }

    Ok(())
}

fn print_info_json(flash: &FlashPageMap, page_size: usize, page_count: usize) -> Result<()> {
    let total = flash.len();
    let pages: Vec<serde_json::Value> = flash
        .iter()
        .enumerate()
        .map(|(index, (address, page))| {
            serde_json::json!({
                "address": format!("0x{address:04X}"),
                "used_bytes": used_bytes(page),
                "counter": total - index,
            })
        })
        .collect();

    let output = serde_json::json!({
        "ok": true,
        "data": {
            "page_size": page_size,
            "page_count": page_count,
            "total_pages": total,
            "fits_counter": total <= MAX_PAGES,
            "pages": pages,
        }
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
