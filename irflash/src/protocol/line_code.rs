//! 4b/6b line code for bootloader frames.
//!
//! Every nibble is replaced by a 6-bit symbol with a bounded run length, so
//! the receiver never sees long stretches of identical bits and can keep
//! its bit clock locked. Two source bytes (four symbols, 24 bits) pack into
//! three output bytes:
//!
//! ```text
//!  src:  [ n0 | n1 ] [ n2 | n3 ]
//!  out:  s0<<2 | s1>>4   s1<<4 | s2>>2   s2<<6 | s3
//! ```
//!
//! An odd trailing byte is completed with the symbol for nibble `0`.

/// Symbol for each nibble value `0..=15`. The target decodes against this table.
pub const NIBBLE_SYMBOLS: [u8; 16] = [
    0x0D, 0x0E, 0x13, 0x15, 0x16, 0x19, 0x1A, 0x1C, 0x23, 0x25, 0x26, 0x29, 0x2A, 0x2C, 0x32, 0x34,
];

/// Number of coded bytes produced for `len` source bytes.
#[must_use]
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(2) * 3
}

/// Symbol for the low four bits of `nibble`.
#[must_use]
pub fn symbol(nibble: u8) -> u8 {
    NIBBLE_SYMBOLS[usize::from(nibble & 0x0F)]
}

/// Nibble value for a 6-bit symbol, or `None` if it is not a codeword.
#[must_use]
pub fn decode_symbol(symbol: u8) -> Option<u8> {
    NIBBLE_SYMBOLS
        .iter()
        .position(|&s| s == symbol)
        .map(|n| n as u8)
}

/// Pack up to two source bytes into three coded bytes.
fn pack(first: u8, second: Option<u8>) -> [u8; 3] {
    let a = symbol(first >> 4);
    let b = symbol(first);
    let (c, d) = second.map_or((symbol(0), symbol(0)), |byte| (symbol(byte >> 4), symbol(byte)));

    [a << 2 | b >> 4, b << 4 | c >> 2, c << 6 | d]
}

/// Append the line-coded form of `src` to `dest`.
pub fn encode_into(src: &[u8], dest: &mut Vec<u8>) {
    dest.reserve(encoded_len(src.len()));
    for pair in src.chunks(2) {
        dest.extend_from_slice(&pack(pair[0], pair.get(1).copied()));
    }
}

/// Line-code `src` into a new buffer.
#[must_use]
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(src.len()));
    encode_into(src, &mut out);
    out
}

/// Recover the two source bytes from a coded triple.
///
/// Returns `None` if any of the four 6-bit fields is not a valid symbol.
#[must_use]
pub fn unpack(coded: [u8; 3]) -> Option<[u8; 2]> {
    let bits = u32::from(coded[0]) << 16 | u32::from(coded[1]) << 8 | u32::from(coded[2]);
    let field = |shift: u32| decode_symbol(((bits >> shift) & 0x3F) as u8);

    let n0 = field(18)?;
    let n1 = field(12)?;
    let n2 = field(6)?;
    let n3 = field(0)?;
    Some([n0 << 4 | n1, n2 << 4 | n3])
}

/// Decode a whole coded buffer. The length must be a multiple of three.
#[must_use]
pub fn decode(coded: &[u8]) -> Option<Vec<u8>> {
    if coded.len() % 3 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(coded.len() / 3 * 2);
    for chunk in coded.chunks_exact(3) {
        out.extend_from_slice(&unpack([chunk[0], chunk[1], chunk[2]])?);
    }
    Some(out)
}
