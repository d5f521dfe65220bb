//! Transmitter that writes bursts to a text sink instead of hardware.

use {
    crate::{error::Result, protocol::pulse::PulsePattern, transmit::IrTransmitter},
    std::io::Write,
};

/// Writes each burst as one line: `<frequency> <d0> <d1> ...`.
pub struct DumpTransmitter<W: Write + Send> {
    sink: W,
    bursts: usize,
}

impl<W: Write + Send> DumpTransmitter<W> {
    /// Dump into `sink`.
    pub fn new(sink: W) -> Self {
        Self { sink, bursts: 0 }
    }

    /// Number of bursts written so far.
    pub fn bursts(&self) -> usize {
        self.bursts
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write + Send> IrTransmitter for DumpTransmitter<W> {
    fn transmit(&mut self, frequency_hz: u32, pattern: &PulsePattern) -> Result<()> {
        write!(self.sink, "{frequency_hz}")?;
        for d in pattern.as_slice() {
            write!(self.sink, " {d}")?;
        }
        writeln!(self.sink)?;
        self.sink.flush()?;
        self.bursts += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "dump"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_lines() {
        let mut tx = DumpTransmitter::new(Vec::new());
        tx.transmit(38_000, &PulsePattern::new(vec![490, 980]))
            .unwrap();
        tx.transmit(38_000, &PulsePattern::default())
            .unwrap();

        assert_eq!(tx.bursts(), 2);
        let text = String::from_utf8(tx.into_inner()).unwrap();
        assert_eq!(text, "38000 490 980\n38000\n");
    }
}
