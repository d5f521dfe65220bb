//! Run-length pulse encoding for IR transmission.
//!
//! The transmitter takes a list of alternating mark/space durations rather
//! than raw bits, so the bit stream (MSB first) is collapsed into runs of
//! equal bits, each run becoming `run_length * bit_unit` microseconds.
//!
//! The line idles at zero. Leading one bits before the first zero therefore
//! produce nothing, and the first emitted duration is always a zero run.
//! Every frame starts with the `0xCC` preamble, so in practice only the first
//! two bits are swallowed. A buffer of nothing but ones is the exception: it
//! still comes out as a single run, where the bare run/flip rule would emit
//! nothing at all.
//!
//! Durations saturate at `u32::MAX` rather than wrapping, so a run longer
//! than about 8.7 million bits is clamped.

/// Duration of one bit in the bootloader protocol, in microseconds.
pub const BIT_UNIT_US: u32 = 490;

/// Ordered mark/space durations in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PulsePattern {
    durations: Vec<u32>,
}

impl PulsePattern {
    /// Wrap a list of durations.
    pub fn new(durations: Vec<u32>) -> Self {
        Self { durations }
    }

    /// The durations, first mark first.
    pub fn as_slice(&self) -> &[u32] {
        &self.durations
    }

    /// Number of durations.
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    /// Whether there is nothing to transmit.
    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// Total on-air time in microseconds.
    #[must_use]
    pub fn total_duration_us(&self) -> u64 {
        self.durations.iter().map(|&d| u64::from(d)).sum()
    }

    /// Consume into the raw durations.
    pub fn into_vec(self) -> Vec<u32> {
        self.durations
    }

    pub(crate) fn push(&mut self, duration: u32) {
        self.durations.push(duration);
    }
}

impl From<Vec<u32>> for PulsePattern {
    fn from(durations: Vec<u32>) -> Self {
        Self::new(durations)
    }
}

/// Run-length encode `bytes` (MSB first) into durations of `bit_unit` multiples.
#[must_use]
pub fn encode_pulses(bytes: &[u8], bit_unit: u32) -> PulsePattern {
    let mut pattern = PulsePattern::default();
    let mut current_bit = 0u8;
    let mut run_length = 0u32;
    let mut leading_ones = 0u32;

    for &byte in bytes {
        for shift in (0..8).rev() {
            let bit = (byte >> shift) & 1;
            if bit == current_bit {
                run_length = run_length.saturating_add(1);
            } else if run_length > 0 {
                pattern.push(run_length.saturating_mul(bit_unit));
                current_bit = bit;
                run_length = 1;
            } else {
                leading_ones = leading_ones.saturating_add(1);
            }
        }
    }

    if run_length > 0 {
        pattern.push(run_length.saturating_mul(bit_unit));
    } else if leading_ones > 0 {
        // Every bit was a one
        pattern.push(leading_ones.saturating_mul(bit_unit));
    }

    pattern
}
