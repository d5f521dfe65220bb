//! Linux LIRC transmitter.
//!
//! Writes pulse/space durations to a `/dev/lircN` character device in
//! `LIRC_MODE_PULSE` format: an odd number of native-endian `u32`
//! microsecond values, starting and ending with a pulse.

use {
    crate::{
        error::{Error, Result},
        protocol::pulse::PulsePattern,
        transmit::{CARRIER_FREQUENCY_HZ, IrTransmitter},
    },
    byteorder::{NativeEndian, WriteBytesExt},
    log::{debug, trace, warn},
    std::{
        fs::{File, OpenOptions},
        io::Write,
        path::Path,
    },
};

/// Default LIRC transmit device.
pub const DEFAULT_LIRC_DEVICE: &str = "/dev/lirc0";

/// Transmitter backed by a LIRC character device.
pub struct LircTransmitter {
    device: File,
    name: String,
}

impl LircTransmitter {
    /// Open a LIRC device for writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let device = OpenOptions::new().write(true).open(path)?;
        debug!("Opened LIRC device {}", path.display());

        Ok(Self {
            device,
            name: path.display().to_string(),
        })
    }
}

/// Serialise a pattern into the byte layout LIRC expects.
///
/// A trailing space carries no information and would make the count even,
/// which the driver rejects, so it is dropped.
pub(crate) fn lirc_buffer(pattern: &PulsePattern) -> Vec<u8> {
    let durations = pattern.as_slice();
    let usable = if durations.len() % 2 == 0 {
        durations.len().saturating_sub(1)
    } else {
        durations.len()
    };

    let mut buf = Vec::with_capacity(usable * 4);
    for &d in &durations[..usable] {
        // Writing into a Vec cannot fail
        let _ = buf.write_u32::<NativeEndian>(d);
    }
    buf
}

impl IrTransmitter for LircTransmitter {
    fn transmit(&mut self, frequency_hz: u32, pattern: &PulsePattern) -> Result<()> {
        if frequency_hz != CARRIER_FREQUENCY_HZ {
            warn!(
                "LIRC backend transmits on the driver's configured carrier; requested {frequency_hz} Hz"
            );
        }

        let buf = lirc_buffer(pattern);
        if buf.is_empty() {
            trace!("Nothing to transmit");
            return Ok(());
        }

        // The driver consumes one write() per burst
        let written = self.device.write(&buf)?;
        if written != buf.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("LIRC accepted {written} of {} bytes", buf.len()),
            )));
        }

        trace!(
            "Transmitted {} durations ({} us) via {}",
            buf.len() / 4,
            pattern.total_duration_us(),
            self.name
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
