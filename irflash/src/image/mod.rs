//! Firmware image formats.

pub mod hex;

pub use hex::{FlashGeometry, FlashPageMap, HexRecord, LoadOptions, MemoryImage, load_flash_pages};
