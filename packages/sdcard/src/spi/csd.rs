use super::SdCardVersion;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct SdProbeStatus {
    pub(super) version: SdCardVersion,
    pub(super) high_capacity: bool,
    pub(super) capacity_bytes: u64,
}

/// Raw 128-bit CSD register, most significant byte first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct Csd(pub(super) [u8; 16]);

impl Csd {
    /// Bits `msb..=lsb` as numbered in the SD physical layer spec.
    pub(super) fn bits(&self, msb: u8, lsb: u8) -> u32 {
        let width = u32::from(msb - lsb) + 1;
        let raw = u128::from_be_bytes(self.0) >> lsb;
        (raw & ((1u128 << width) - 1)) as u32
    }

    pub(super) fn structure(&self) -> u32 {
        self.bits(127, 126)
    }

    /// Card capacity, or `None` for an unknown CSD structure.
    pub(super) fn capacity_bytes(&self) -> Option<u64> {
        match self.structure() {
            // SDSC: (C_SIZE + 1) * 2^(C_SIZE_MULT + 2) * 2^READ_BL_LEN
            0 => {
                let c_size = u64::from(self.bits(73, 62));
                let shift = self.bits(49, 47) + 2 + self.bits(83, 80);
                (c_size + 1).checked_mul(1u64.checked_shl(shift)?)
            }
            // SDHC/SDXC: (C_SIZE + 1) * 512 KiB
            1 => (u64::from(self.bits(69, 48)) + 1).checked_mul(512 * 1024),
            _ => None,
        }
    }

    /// Inverse of [`Csd::bits`]; used to build registers in tests.
    #[cfg(test)]
    pub(super) fn set_bits(&mut self, msb: u8, lsb: u8, value: u32) {
        let width = u32::from(msb - lsb) + 1;
        let mask = ((1u128 << width) - 1) << lsb;
        let raw = u128::from_be_bytes(self.0);
        let raw = (raw & !mask) | ((u128::from(value) << lsb) & mask);
        self.0 = raw.to_be_bytes();
    }
}
