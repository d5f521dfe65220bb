//! IR transmission backends.
//!
//! Protocol code never touches hardware directly. It hands a carrier
//! frequency and a [`PulsePattern`] to an [`IrTransmitter`], which emits the
//! burst and returns once it is on its way. Nothing comes back from the
//! target, so a successful return only means the backend accepted the
//! pattern.
//!
//! ```text
//! +-----------------------------+
//! |    Frame / wake encoders    |
//! +--------------+--------------+
//!                |  (Hz, [us, us, ...])
//!                v
//! +--------------+--------------+
//! |     IrTransmitter trait     |
//! +------+---------------+------+
//!        |               |
//!        v               v
//! +------+-------+ +-----+--------+
//! |    LIRC      | |    Dump      |
//! |  /dev/lircN  | |  any Write   |
//! +--------------+ +--------------+
//! ```

pub mod dump;
pub mod lirc;

use crate::error::Result;
use crate::protocol::pulse::PulsePattern;

pub use dump::DumpTransmitter;
pub use lirc::LircTransmitter;

/// Carrier frequency used by both the bootloader and the wake protocol.
pub const CARRIER_FREQUENCY_HZ: u32 = 38_000;

/// A device that can emit a modulated IR burst.
///
/// Only one transfer may drive a transmitter at a time; the upload server
/// guarantees this by owning it on a single task.
pub trait IrTransmitter: Send {
    /// Emit `pattern` (alternating mark/space durations in microseconds,
    /// starting with a mark) on a carrier of `frequency_hz`.
    fn transmit(&mut self, frequency_hz: u32, pattern: &PulsePattern) -> Result<()>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}

impl<T: IrTransmitter + ?Sized> IrTransmitter for Box<T> {
    fn transmit(&mut self, frequency_hz: u32, pattern: &PulsePattern) -> Result<()> {
        (**self).transmit(frequency_hz, pattern)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: IrTransmitter + ?Sized> IrTransmitter for &mut T {
    fn transmit(&mut self, frequency_hz: u32, pattern: &PulsePattern) -> Result<()> {
        (**self).transmit(frequency_hz, pattern)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
