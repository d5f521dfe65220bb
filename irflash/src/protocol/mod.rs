//! Protocol implementations.

pub mod crc;
pub mod frame;
pub mod line_code;
pub mod pulse;
pub mod wake;

// Re-export common types
pub use frame::{BootloaderPacket, EncodedFrame, FirmwareSender, FrameConfig, PageFrame, encode_flash};
pub use pulse::{PulsePattern, encode_pulses};
pub use wake::{WakeSignaler, WakeTiming};
