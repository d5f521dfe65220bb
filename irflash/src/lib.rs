//! # irflash
//!
//! Firmware upload engine for microcontrollers with an infrared bootloader.
//!
//! A TCP client hands over an Intel HEX image; this crate turns it into IR
//! bursts the bootloader understands and paces them so the target can
//! program each flash page. The pieces are:
//!
//! - Intel HEX loading into a sparse page map (erased pages are skipped)
//! - Page packets with CRC-8, line coded with a 4b/6b constant-weight code
//! - Run-length pulse encoding for the IR transmitter
//! - Pulse-distance wake messages that start the bootloader
//! - A one-client-at-a-time TCP upload server with observable state
//!
//! The link is one-way. The target never acknowledges anything, so every
//! step is followed by a fixed delay instead of a handshake.
//!
//! ## Example
//!
//! ```rust,no_run
//! use irflash::{DumpTransmitter, UploadConfig, UploadServer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = UploadServer::new(UploadConfig::default(), DumpTransmitter::new(std::io::stdout()))
//!         .on_progress(|event| println!("{event:?}"));
//!
//!     let handle = server.start()?;
//!     println!("{}", handle.state());
//!     handle.wait();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `serde`: Serialization support for data types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod host;
pub mod image;
pub mod protocol;
pub mod server;
pub mod transmit;

// Re-exports for convenience
pub use {
    cancel::CancelToken,
    error::{Error, Result},
    host::local_ipv4_address,
    image::hex::{FlashGeometry, FlashPageMap, HexRecord, LoadOptions, MemoryImage, load_flash_pages},
    protocol::{
        BootloaderPacket, EncodedFrame, FirmwareSender, FrameConfig, PageFrame, PulsePattern,
        WakeSignaler, WakeTiming, encode_flash, encode_pulses,
    },
    server::{
        ServerHandle, ServerState, ServerStatus, ServerStopper, StateCell, UploadConfig,
        UploadProgress, UploadServer,
    },
    transmit::{CARRIER_FREQUENCY_HZ, DumpTransmitter, IrTransmitter, LircTransmitter},
};
