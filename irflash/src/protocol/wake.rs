//! Pulse-distance messages used to wake the bootloader.
//!
//! The application firmware on the target listens for short ASCII commands
//! in a NEC-like framing, unrelated to the line-coded page protocol. Each
//! bit is a fixed start mark followed by a space whose length carries the
//! value; bits go out LSB first.
//!
//! ```text
//!   bit 0:  |~~|__|            start 1u, space 1u
//!   bit 1:  |~~|________|      start 1u, space 4u
//!   end:    |~~~~~~|__|        mark 3u, space 1u
//! ```
//!
//! The receiver times itself off the start marks, so the base unit only has
//! to be roughly right.

use crate::error::{Error, Result};
use crate::protocol::pulse::PulsePattern;
use crate::transmit::{CARRIER_FREQUENCY_HZ, IrTransmitter};
use log::debug;

/// Base pulse length in microseconds.
pub const PULSE_UNIT_US: u32 = 400;

/// Command that switches the target into its bootloader.
pub const BOOT_COMMAND: &str = "BOOT";

/// Durations of the message symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeTiming {
    /// Mark preceding every bit.
    pub bit_start: u32,
    /// Space for a 0 bit.
    pub bit_zero: u32,
    /// Space for a 1 bit.
    pub bit_one: u32,
    /// Closing mark.
    pub end_mark: u32,
    /// Closing space.
    pub end_done: u32,
}

impl WakeTiming {
    /// Derive all symbol lengths from a base unit.
    pub fn from_unit(unit: u32) -> Self {
        Self {
            bit_start: unit,
            bit_zero: unit,
            bit_one: unit * 4,
            end_mark: unit * 3,
            end_done: unit,
        }
    }
}

impl Default for WakeTiming {
    fn default() -> Self {
        Self::from_unit(PULSE_UNIT_US)
    }
}

/// Encodes and transmits wake messages.
#[derive(Debug, Clone, Copy)]
pub struct WakeSignaler {
    timing: WakeTiming,
    frequency_hz: u32,
}

impl Default for WakeSignaler {
    fn default() -> Self {
        Self::new(WakeTiming::default())
    }
}

impl WakeSignaler {
    /// Create a signaler with the given timing on the standard carrier.
    pub fn new(timing: WakeTiming) -> Self {
        Self {
            timing,
            frequency_hz: CARRIER_FREQUENCY_HZ,
        }
    }

    /// Use a different carrier frequency.
    #[must_use]
    pub fn with_frequency(mut self, frequency_hz: u32) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    /// Build the pulse pattern for an ASCII message.
    pub fn encode(&self, message: &str) -> Result<PulsePattern> {
        if !message.is_ascii() {
            return Err(Error::InvalidMessage(format!(
                "{message:?} contains non-ASCII characters"
            )));
        }

        let t = &self.timing;
        let mut durations = Vec::with_capacity(message.len() * 16 + 2);
        for byte in message.bytes() {
            for bit in 0..8 {
                durations.push(t.bit_start);
                durations.push(if (byte >> bit) & 1 == 1 {
                    t.bit_one
                } else {
                    t.bit_zero
                });
            }
        }
        durations.push(t.end_mark);
        durations.push(t.end_done);

        Ok(PulsePattern::new(durations))
    }

    /// Encode `message` and hand it to the transmitter.
    pub fn send<T: IrTransmitter + ?Sized>(&self, transmitter: &mut T, message: &str) -> Result<()> {
        let pattern = self.encode(message)?;
        debug!(
            "Sending message {message:?} ({} durations, {} us)",
            pattern.len(),
            pattern.total_duration_us()
        );
        transmitter.transmit(self.frequency_hz, &pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_command_layout() {
        let pattern = WakeSignaler::default().encode(BOOT_COMMAND).unwrap();
        let d = pattern.as_slice();

        assert_eq!(pattern.len(), 4 * 8 * 2 + 2);
        // 'B' = 0x42 = 0b0100_0010, LSB first: 0,1,0,0,0,0,1,0
        assert_eq!(
            &d[..16],
            &[400, 400, 400, 1600, 400, 400, 400, 400, 400, 400, 400, 400, 400, 1600, 400, 400]
        );
        assert_eq!(&d[d.len() - 2..], &[1200, 400]);
        assert_eq!(pattern.total_duration_us(), 45_200);
    }

    #[test]
    fn test_every_bit_starts_with_start_mark() {
        let pattern = WakeSignaler::default().encode("\u{7f}A").unwrap();
        let d = pattern.as_slice();
        for pair in d[..d.len() - 2].chunks(2) {
            assert_eq!(pair[0], PULSE_UNIT_US);
            assert!(pair[1] == PULSE_UNIT_US || pair[1] == 4 * PULSE_UNIT_US);
        }
    }

    #[test]
    fn test_empty_message_is_just_terminator() {
        let pattern = WakeSignaler::default().encode("").unwrap();
        assert_eq!(pattern.as_slice(), &[1200, 400]);
    }

    #[test]
    fn test_non_ascii_rejected() {
        let err = WakeSignaler::default().encode("BÖÖT").unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn test_custom_unit() {
        let signaler = WakeSignaler::new(WakeTiming::from_unit(100));
        let pattern = signaler.encode("\u{1}").unwrap();
        let d = pattern.as_slice();
        assert_eq!(&d[..4], &[100, 400, 100, 100]);
        assert_eq!(&d[16..], &[300, 100]);
    }
}
