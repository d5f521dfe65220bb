//! CRC-8 checksum used by the IR bootloader.
//!
//! Reflected polynomial `0x8C` (normal form `0x31`), initial value `0x00`,
//! no final XOR. This is the Dallas/Maxim 1-Wire CRC.

/// Reflected CRC-8 polynomial.
pub const CRC8_POLY: u8 = 0x8C;

/// Feed one byte into a running CRC.
#[must_use]
pub fn crc8_update(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        crc = if crc & 0x01 != 0 {
            (crc >> 1) ^ CRC8_POLY
        } else {
            crc >> 1
        };
    }
    crc
}

/// CRC-8 of a whole buffer.
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &b| crc8_update(crc, b))
}
