//! Intel HEX loader.
//!
//! Turns a textual record stream into the sparse set of flash pages that
//! actually need programming.
//!
//! ## Record Format
//!
//! ```text
//! +---+-----+---------+------+-----------------+-----+
//! | : | LEN | ADDRESS | TYPE |  DATA (LEN)     | SUM |
//! +---+-----+---------+------+-----------------+-----+
//! | 1 |  2  |    4    |  2   |  2 * LEN        |  2  |
//! +---+-----+---------+------+-----------------+-----+
//! ```
//!
//! All fields are ASCII hex digits. Only data records (type `00`) place
//! bytes in memory; extended-address, start-address and end-of-file records
//! are accepted and skipped, so images above the 64 KiB window cannot be
//! expressed. Lines that do not start with `:` are ignored.

use crate::error::{Error, Result};
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use std::io::BufRead;

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Default number of flash pages on the target.
pub const DEFAULT_PAGE_COUNT: usize = 512;

/// Default flash page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Largest flash a bootloader packet can address (16-bit addresses).
pub const MAX_FLASH_SIZE: usize = 0x1_0000;

/// Flash layout of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashGeometry {
    /// Number of pages.
    pub page_count: usize,
    /// Bytes per page.
    pub page_size: usize,
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self {
            page_count: DEFAULT_PAGE_COUNT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl FlashGeometry {
    /// Create a geometry from page count and page size.
    pub fn new(page_count: usize, page_size: usize) -> Self {
        Self {
            page_count,
            page_size,
        }
    }

    /// Total flash size in bytes.
    #[must_use]
    pub fn flash_size(&self) -> usize {
        self.page_count.saturating_mul(self.page_size)
    }

    /// Reject geometries the loader cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.page_count == 0 || self.page_size == 0 {
            return Err(Error::Config(format!(
                "flash geometry must be non-empty (got {} x {})",
                self.page_count, self.page_size
            )));
        }
        match self.page_count.checked_mul(self.page_size) {
            Some(size) if size <= MAX_FLASH_SIZE => Ok(()),
            _ => Err(Error::Config(format!(
                "flash geometry {} x {} exceeds the 0x{MAX_FLASH_SIZE:X}-byte address space",
                self.page_count, self.page_size
            ))),
        }
    }
}

/// Options controlling how strictly records are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Reject records whose checksum byte is missing or wrong.
    ///
    /// Off by default: the bootloader toolchain this talks to has always
    /// accepted records without looking at the checksum.
    pub strict_checksum: bool,
}

/// A single parsed record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Load offset of the first data byte.
    pub address: u16,
    /// Record type.
    pub record_type: u8,
    /// Data bytes.
    pub data: Vec<u8>,
    /// Checksum byte as stored in the record, if present.
    pub checksum: Option<u8>,
}

impl HexRecord {
    /// Data record type.
    pub const DATA: u8 = 0x00;
    /// End-of-file record type.
    pub const END_OF_FILE: u8 = 0x01;

    /// Parse a record line (including the leading `:`).
    ///
    /// `line_no` is only used for error reporting.
    pub fn parse(line: &[u8], line_no: usize) -> Result<Self> {
        let malformed = |reason: &str| Error::MalformedImage {
            line: line_no,
            reason: reason.to_string(),
        };

        let body = line
            .strip_prefix(b":")
            .ok_or_else(|| malformed("record does not start with ':'"))?;

        let length = hex_byte(body, 0).ok_or_else(|| malformed("bad length field"))?;
        let addr_hi = hex_byte(body, 2).ok_or_else(|| malformed("bad address field"))?;
        let addr_lo = hex_byte(body, 4).ok_or_else(|| malformed("bad address field"))?;
        let record_type = hex_byte(body, 6).ok_or_else(|| malformed("bad record type"))?;

        let data = (0..usize::from(length))
            .map(|i| hex_byte(body, 8 + i * 2))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| {
                malformed(&format!("record declares {length} data bytes but is too short"))
            })?;

        let checksum = hex_byte(body, 8 + data.len() * 2);

        Ok(Self {
            address: u16::from_be_bytes([addr_hi, addr_lo]),
            record_type,
            data,
            checksum,
        })
    }

    /// Two's-complement checksum over length, address, type and data.
    #[must_use]
    pub fn computed_checksum(&self) -> u8 {
        let [hi, lo] = self.address.to_be_bytes();
        let sum = [self.data.len() as u8, hi, lo, self.record_type]
            .iter()
            .chain(self.data.iter())
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        sum.wrapping_neg()
    }

    /// Whether this record places bytes in memory.
    #[must_use]
    pub fn is_data(&self) -> bool {
        self.record_type == Self::DATA
    }
}

/// Decode the two ASCII hex digits at `pos`.
fn hex_byte(s: &[u8], pos: usize) -> Option<u8> {
    let pair = s.get(pos..pos + 2)?;
    let hi = char::from(pair[0]).to_digit(16)?;
    let lo = char::from(pair[1]).to_digit(16)?;
    Some((hi << 4 | lo) as u8)
}

/// Flat image of the whole flash, initialised to the erased value.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    data: Vec<u8>,
    geometry: FlashGeometry,
}

impl MemoryImage {
    /// Create an erased image for the given geometry.
    pub fn new(geometry: FlashGeometry) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            data: vec![ERASED_BYTE; geometry.flash_size()],
            geometry,
        })
    }

    /// Copy `bytes` to `address`, rejecting anything that falls outside flash.
    pub fn write(&mut self, address: usize, bytes: &[u8], line_no: usize) -> Result<()> {
        let end = address + bytes.len();
        let target = self
            .data
            .get_mut(address..end)
            .ok_or_else(|| Error::MalformedImage {
                line: line_no,
                reason: format!(
                    "data at 0x{address:04X}..0x{end:04X} exceeds flash size 0x{:04X}",
                    self.geometry.flash_size()
                ),
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Raw image contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Split into pages, dropping the ones that are still fully erased.
    pub fn into_pages(self) -> FlashPageMap {
        self.data
            .chunks(self.geometry.page_size)
            .enumerate()
            .filter(|(_, page)| page.iter().any(|&b| b != ERASED_BYTE))
            .map(|(index, page)| ((index * self.geometry.page_size) as u32, page.to_vec()))
            .collect()
    }
}

/// Non-erased flash pages keyed by their start address.
///
/// Iteration is always in ascending address order, which is the order the
/// bootloader expects pages to arrive in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashPageMap {
    pages: BTreeMap<u32, Vec<u8>>,
}

impl FlashPageMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a page, returning the previous contents at that address.
    pub fn insert(&mut self, address: u32, page: Vec<u8>) -> Option<Vec<u8>> {
        self.pages.insert(address, page)
    }

    /// Page contents at `address`.
    pub fn get(&self, address: u32) -> Option<&[u8]> {
        self.pages.get(&address).map(Vec::as_slice)
    }

    /// Number of pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether there is nothing to program.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Pages in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.pages
            .iter()
            .map(|(address, page)| (*address, page.as_slice()))
    }

    /// Page addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.keys().copied()
    }
}

impl FromIterator<(u32, Vec<u8>)> for FlashPageMap {
    fn from_iter<I: IntoIterator<Item = (u32, Vec<u8>)>>(iter: I) -> Self {
        Self {
            pages: iter.into_iter().collect(),
        }
    }
}

/// Read a hex record stream and return the pages that must be programmed.
///
/// Reads until end of stream. Non-record lines are skipped, as are all
/// record types other than data.
pub fn load_flash_pages<R: BufRead>(
    mut reader: R,
    geometry: FlashGeometry,
    options: LoadOptions,
) -> Result<FlashPageMap> {
    let mut image = MemoryImage::new(geometry)?;
    let mut line = Vec::new();
    let mut line_no = 0;
    let mut data_records = 0usize;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_no += 1;

        let trimmed = line.trim_ascii();
        if !trimmed.starts_with(b":") {
            continue;
        }

        let record = HexRecord::parse(trimmed, line_no)?;

        if options.strict_checksum {
            let expected = record.computed_checksum();
            match record.checksum {
                Some(actual) if actual == expected => {},
                Some(actual) => {
                    return Err(Error::ChecksumMismatch {
                        line: line_no,
                        expected,
                        actual,
                    });
                },
                None => {
                    return Err(Error::MalformedImage {
                        line: line_no,
                        reason: "missing checksum byte".into(),
                    });
                },
            }
        }

        if record.is_data() {
            image.write(usize::from(record.address), &record.data, line_no)?;
            data_records += 1;
        } else if record.record_type == HexRecord::END_OF_FILE {
            trace!("End of file record at line {line_no}");
        } else {
            warn!(
                "Ignoring record type 0x{:02X} at line {line_no}",
                record.record_type
            );
        }
    }

    let pages = image.into_pages();
    debug!(
        "Loaded {data_records} data records from {line_no} lines into {} pages",
        pages.len()
    );
    Ok(pages)
}
