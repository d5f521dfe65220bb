//! Bootloader page frames.
//!
//! Each non-erased flash page travels as one IR burst. The page is first
//! wrapped in a packet:
//!
//! ```text
//! +---------+---------+-------+------------------+-----+-----+
//! | ADDR_HI | ADDR_LO | COUNT |  PAYLOAD (page)  | CRC | PAD |
//! +---------+---------+-------+------------------+-----+-----+
//! |    1    |    1    |   1   |    page_size     |  1  |  1  |
//! +---------+---------+-------+------------------+-----+-----+
//! ```
//!
//! `COUNT` is the number of pages still to come including this one, so the
//! target knows when the upload is complete. `CRC` is CRC-8 over address,
//! count and payload. The packet is then line coded and prefixed with the
//! receiver sync preamble and the `FU` start marker:
//!
//! ```text
//! +---------------------+------+---------------------------+
//! | 0xCC x 14 (sync)    | "FU" | line_code(packet)         |
//! +---------------------+------+---------------------------+
//! ```
//!
//! There is no acknowledgement. After each burst the sender waits a fixed
//! time for the target to finish programming the page.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::image::hex::{DEFAULT_PAGE_SIZE, FlashPageMap};
use crate::protocol::crc::crc8_update;
use crate::protocol::line_code;
use crate::protocol::pulse::{BIT_UNIT_US, PulsePattern, encode_pulses};
use crate::transmit::{CARRIER_FREQUENCY_HZ, IrTransmitter};
use log::{debug, info, trace};
use std::fmt::Write as _;
use std::time::Duration;

/// Receiver synchronisation byte (alternating bit pairs).
pub const SYNC_BYTE: u8 = 0xCC;

/// Number of sync bytes in front of every frame.
pub const SYNC_LEN: usize = 14;

/// Literal marker announcing a bootloader packet.
pub const START_MARKER: [u8; 2] = *b"FU";

/// Packet bytes beyond the page payload (address, counter, CRC, pad).
pub const PACKET_OVERHEAD: usize = 5;

/// Largest page counter a packet can carry.
pub const MAX_PAGES: usize = u8::MAX as usize;

/// Time the target needs to program one page.
pub const PAGE_WRITE_DELAY: Duration = Duration::from_millis(300);

/// Length of an encoded frame for a packet of `packet_len` bytes.
#[must_use]
pub fn encoded_frame_len(packet_len: usize) -> usize {
    SYNC_LEN + START_MARKER.len() + line_code::encoded_len(packet_len)
}

/// One page wrapped for the bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderPacket {
    bytes: Vec<u8>,
}

impl BootloaderPacket {
    /// Build the packet for the page at `address`.
    ///
    /// `page` may be shorter than `page_size`; the rest of the payload is
    /// zero-filled.
    pub fn new(address: u32, pages_remaining: usize, page: &[u8], page_size: usize) -> Result<Self> {
        let address = u16::try_from(address).map_err(|_| {
            Error::ProtocolInvariantViolation(format!(
                "page address 0x{address:X} does not fit in 16 bits"
            ))
        })?;
        let counter = u8::try_from(pages_remaining)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| {
                Error::ProtocolInvariantViolation(format!(
                    "page counter {pages_remaining} outside 1..={MAX_PAGES}"
                ))
            })?;
        if page.len() > page_size {
            return Err(Error::ProtocolInvariantViolation(format!(
                "page of {} bytes exceeds page size {page_size}",
                page.len()
            )));
        }

        let mut bytes = Vec::with_capacity(page_size + PACKET_OVERHEAD);
        let mut crc = 0u8;
        let mut put = |bytes: &mut Vec<u8>, b: u8| {
            crc = crc8_update(crc, b);
            bytes.push(b);
        };

        let [addr_hi, addr_lo] = address.to_be_bytes();
        put(&mut bytes, addr_hi);
        put(&mut bytes, addr_lo);
        put(&mut bytes, counter);
        for i in 0..page_size {
            put(&mut bytes, page.get(i).copied().unwrap_or(0));
        }

        bytes.push(crc);
        bytes.push(0);

        Ok(Self { bytes })
    }

    /// Page address.
    pub fn address(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    /// Pages remaining including this one.
    pub fn counter(&self) -> u8 {
        self.bytes[2]
    }

    /// Page payload.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[3..self.bytes.len() - 2]
    }

    /// CRC-8 over address, counter and payload.
    pub fn crc(&self) -> u8 {
        self.bytes[self.bytes.len() - 2]
    }

    /// Raw packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Packet length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a packet carries at least its header.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Sync preamble, start marker and line-coded packet, ready for pulse encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    bytes: Vec<u8>,
}

impl EncodedFrame {
    /// Frame a packet.
    pub fn from_packet(packet: &BootloaderPacket) -> Result<Self> {
        let expected = encoded_frame_len(packet.len());
        let mut bytes = Vec::with_capacity(expected);
        bytes.resize(SYNC_LEN, SYNC_BYTE);
        bytes.extend_from_slice(&START_MARKER);
        line_code::encode_into(packet.as_bytes(), &mut bytes);

        if bytes.len() != expected {
            return Err(Error::ProtocolInvariantViolation(format!(
                "frame is {} bytes, expected {expected}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a frame carries at least the preamble.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Convert to mark/space durations.
    pub fn to_pulses(&self, bit_unit: u32) -> PulsePattern {
        encode_pulses(&self.bytes, bit_unit)
    }
}

/// A page ready to go on air.
#[derive(Debug, Clone)]
pub struct PageFrame {
    /// Page start address.
    pub address: u32,
    /// The framed packet.
    pub packet: BootloaderPacket,
    /// Preamble, marker and coded packet.
    pub frame: EncodedFrame,
}

/// Build frames for every page, in ascending address order.
///
/// Fails before producing anything if the page count does not fit in the
/// packet counter, so an oversized image never results in a partial upload.
pub fn encode_flash(flash: &FlashPageMap, page_size: usize) -> Result<Vec<PageFrame>> {
    let total = flash.len();
    if total > MAX_PAGES {
        return Err(Error::ProtocolInvariantViolation(format!(
            "{total} pages exceed the {MAX_PAGES}-page counter limit"
        )));
    }

    flash
        .iter()
        .enumerate()
        .map(|(index, (address, page))| {
            let packet = BootloaderPacket::new(address, total - index, page, page_size)?;
            let frame = EncodedFrame::from_packet(&packet)?;
            Ok(PageFrame {
                address,
                packet,
                frame,
            })
        })
        .collect()
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        let _ = write!(out, "{b:02x} ");
    }
    out.trim_end().to_string()
}

/// Frame sender settings.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Payload bytes per page.
    pub page_size: usize,
    /// Duration of one bit in microseconds.
    pub bit_unit_us: u32,
    /// Carrier frequency.
    pub frequency_hz: u32,
    /// Wait after each page burst.
    pub page_delay: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            bit_unit_us: BIT_UNIT_US,
            frequency_hz: CARRIER_FREQUENCY_HZ,
            page_delay: PAGE_WRITE_DELAY,
        }
    }
}

/// Sends a flash page map to the bootloader, one burst per page.
pub struct FirmwareSender<'a, T: IrTransmitter + ?Sized> {
    transmitter: &'a mut T,
    config: FrameConfig,
}

impl<'a, T: IrTransmitter + ?Sized> FirmwareSender<'a, T> {
    /// Create a sender with default settings.
    pub fn new(transmitter: &'a mut T) -> Self {
        Self {
            transmitter,
            config: FrameConfig::default(),
        }
    }

    /// Create a sender with custom settings.
    pub fn with_config(transmitter: &'a mut T, config: FrameConfig) -> Self {
        Self {
            transmitter,
            config,
        }
    }

    /// Transmit every page, waiting `page_delay` after each one.
    ///
    /// # Arguments
    ///
    /// * `flash` - Pages to send
    /// * `cancel` - Aborts the pacing delay and any remaining pages
    /// * `progress` - Called after each page with (pages sent, total, address)
    pub fn send_flash<F>(&mut self, flash: &FlashPageMap, cancel: &CancelToken, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize, u32),
    {
        let frames = encode_flash(flash, self.config.page_size)?;
        let total = frames.len();
        info!("Sending {total} pages via {}", self.transmitter.name());

        for (index, page) in frames.iter().enumerate() {
            cancel.check()?;

            debug!(
                "Page {}/{total} @ 0x{:04X} (counter {}, crc 0x{:02X})",
                index + 1,
                page.address,
                page.packet.counter(),
                page.packet.crc()
            );
            trace!("Packet: {}", hex_dump(page.packet.as_bytes()));
            trace!("Frame: {}", hex_dump(page.frame.as_bytes()));

            let pattern = page.frame.to_pulses(self.config.bit_unit_us);
            trace!("Pattern: {:?}", pattern.as_slice());
            self.transmitter
                .transmit(self.config.frequency_hz, &pattern)?;

            progress(index + 1, total, page.address);

            cancel.sleep(self.config.page_delay)?;
        }

        debug!("All {total} pages sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::crc8;

    struct MockTransmitter {
        bursts: Vec<(u32, Vec<u32>)>,
    }

    impl IrTransmitter for MockTransmitter {
        fn transmit(&mut self, frequency_hz: u32, pattern: &PulsePattern) -> Result<()> {
            self.bursts
                .push((frequency_hz, pattern.as_slice().to_vec()));
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn fast_config() -> FrameConfig {
        FrameConfig {
            page_delay: Duration::from_millis(1),
            ..FrameConfig::default()
        }
    }

    fn page_with_first_byte(b: u8) -> Vec<u8> {
        let mut page = vec![0xFF; 64];
        page[0] = b;
        page
    }

    #[test]
    fn test_packet_layout() {
        let page = page_with_first_byte(0x00);
        let packet = BootloaderPacket::new(0x0000, 1, &page, 64).unwrap();

        assert_eq!(packet.len(), 64 + PACKET_OVERHEAD);
        assert_eq!(&packet.as_bytes()[..3], &[0x00, 0x00, 0x01]);
        assert_eq!(packet.payload(), page.as_slice());
        assert_eq!(packet.crc(), 0xE3);
        assert_eq!(*packet.as_bytes().last().unwrap(), 0x00);
    }

    #[test]
    fn test_packet_crc_covers_header_and_payload() {
        let packet = BootloaderPacket::new(0x0040, 2, &[0x11; 64], 64).unwrap();

        assert_eq!(packet.address(), 0x0040);
        assert_eq!(packet.counter(), 2);
        assert_eq!(packet.crc(), 0x90);
        assert_eq!(packet.crc(), crc8(&packet.as_bytes()[..67]));
    }

    #[test]
    fn test_short_page_zero_padded() {
        let packet = BootloaderPacket::new(0x0100, 1, &[1, 2, 3], 64).unwrap();

        assert_eq!(&packet.as_bytes()[..6], &[0x01, 0x00, 0x01, 1, 2, 3]);
        assert!(packet.payload()[3..].iter().all(|&b| b == 0));
        assert_eq!(packet.crc(), 0xEB);
    }

    #[test]
    fn test_packet_rejects_bad_counter() {
        assert!(matches!(
            BootloaderPacket::new(0, 256, &[0], 64),
            Err(Error::ProtocolInvariantViolation(_))
        ));
        assert!(matches!(
            BootloaderPacket::new(0, 0, &[0], 64),
            Err(Error::ProtocolInvariantViolation(_))
        ));
    }

    #[test]
    fn test_packet_rejects_wide_address() {
        assert!(matches!(
            BootloaderPacket::new(0x1_0000, 1, &[0], 64),
            Err(Error::ProtocolInvariantViolation(_))
        ));
    }

    #[test]
    fn test_frame_layout() {
        let packet = BootloaderPacket::new(0x0000, 1, &page_with_first_byte(0x00), 64).unwrap();
        let frame = EncodedFrame::from_packet(&packet).unwrap();

        assert_eq!(frame.len(), 14 + 2 + 105);
        assert!(frame.as_bytes()[..SYNC_LEN].iter().all(|&b| b == 0xCC));
        assert_eq!(&frame.as_bytes()[SYNC_LEN..SYNC_LEN + 2], b"FU");

        let decoded = line_code::decode(&frame.as_bytes()[SYNC_LEN + 2..]).unwrap();
        assert_eq!(&decoded[..packet.len()], packet.as_bytes());
    }

    #[test]
    fn test_odd_packet_tail_uses_zero_symbol() {
        // 69 bytes: the pad byte 0x00 is completed with symbol(0), not literal zeros
        let packet = BootloaderPacket::new(0x0000, 1, &page_with_first_byte(0x00), 64).unwrap();
        let frame = EncodedFrame::from_packet(&packet).unwrap();

        assert_eq!(packet.len() % 2, 1);
        assert_eq!(&frame.as_bytes()[frame.len() - 3..], &[0x34, 0xD3, 0x4D]);
    }

    #[test]
    fn test_encode_flash_counts_down() {
        let flash: FlashPageMap = [
            (0x0080, vec![3; 64]),
            (0x0000, vec![1; 64]),
            (0x0040, vec![2; 64]),
        ]
        .into_iter()
        .collect();

        let frames = encode_flash(&flash, 64).unwrap();
        let summary: Vec<(u32, u8)> = frames
            .iter()
            .map(|f| (f.address, f.packet.counter()))
            .collect();
        assert_eq!(summary, vec![(0x0000, 3), (0x0040, 2), (0x0080, 1)]);
    }

    #[test]
    fn test_encode_flash_rejects_too_many_pages() {
        let flash: FlashPageMap = (0..256u32).map(|i| (i * 64, vec![0; 64])).collect();
        assert!(matches!(
            encode_flash(&flash, 64),
            Err(Error::ProtocolInvariantViolation(_))
        ));
    }

    #[test]
    fn test_send_flash_one_burst_per_page() {
        let flash: FlashPageMap = [(0x0000, vec![0x12; 64]), (0x0040, vec![0x34; 64])]
            .into_iter()
            .collect();
        let mut tx = MockTransmitter { bursts: Vec::new() };
        let mut seen = Vec::new();

        FirmwareSender::with_config(&mut tx, fast_config())
            .send_flash(&flash, &CancelToken::new(), |sent, total, addr| {
                seen.push((sent, total, addr));
            })
            .unwrap();

        assert_eq!(seen, vec![(1, 2, 0x0000), (2, 2, 0x0040)]);
        assert_eq!(tx.bursts.len(), 2);
        for (freq, pattern) in &tx.bursts {
            assert_eq!(*freq, 38_000);
            assert!(!pattern.is_empty());
            assert!(pattern.iter().all(|d| d % BIT_UNIT_US == 0));
        }
    }

    #[test]
    fn test_send_flash_oversized_sends_nothing() {
        let flash: FlashPageMap = (0..300u32).map(|i| (i * 64, vec![0; 64])).collect();
        let mut tx = MockTransmitter { bursts: Vec::new() };

        let result = FirmwareSender::with_config(&mut tx, fast_config()).send_flash(
            &flash,
            &CancelToken::new(),
            |_, _, _| {},
        );

        assert!(result.is_err());
        assert!(tx.bursts.is_empty());
    }

    #[test]
    fn test_send_flash_stops_when_cancelled() {
        let flash: FlashPageMap = [(0x0000, vec![0; 64]), (0x0040, vec![0; 64])]
            .into_iter()
            .collect();
        let mut tx = MockTransmitter { bursts: Vec::new() };
        let cancel = CancelToken::new();

        let result = FirmwareSender::with_config(&mut tx, fast_config()).send_flash(
            &flash,
            &cancel,
            |_, _, _| cancel.cancel(),
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(tx.bursts.len(), 1);
    }
}
