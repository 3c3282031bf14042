//! Board-support contract consumed by the block device adapter.

/// Card classification reported by the board driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CardType {
    /// Standard capacity, byte addressed (up to 2 GB).
    Sdsc,
    /// High or extended capacity, block addressed.
    SdhcSdxc,
    Secured,
    #[default]
    Unknown,
}

impl CardType {
    pub fn label(self) -> &'static str {
        match self {
            CardType::Sdsc => "sdsc",
            CardType::SdhcSdxc => "sdhc_sdxc",
            CardType::Secured => "secured",
            CardType::Unknown => "unknown",
        }
    }
}

/// Identity and geometry of an initialized card.
///
/// `version` is packed: high byte is the major number, low byte the minor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CardInfo {
    pub card_type: CardType,
    pub version: u16,
    pub block_size: u32,
    pub block_count: u64,
}

impl CardInfo {
    pub const fn version_major(&self) -> u8 {
        (self.version >> 8) as u8
    }

    pub const fn version_minor(&self) -> u8 {
        (self.version & 0xFF) as u8
    }

    pub const fn capacity_bytes(&self) -> u64 {
        self.block_count.saturating_mul(self.block_size as u64)
    }
}

/// Primitives a board driver exposes for one card slot.
///
/// Transfers are all-or-nothing: an `Err` means the caller must treat the
/// whole buffer as undefined.
pub trait CardDriver {
    type Error: core::fmt::Debug;

    /// Card-detect. Must not block longer than a pin read.
    fn is_present(&mut self) -> bool;

    fn is_write_protected(&mut self) -> bool {
        false
    }

    /// Power-on, bus reset and identification.
    fn init(&mut self) -> Result<CardInfo, Self::Error>;

    /// Identity cached by the last successful [`CardDriver::init`].
    fn card_info(&self) -> CardInfo;

    fn read_blocks(
        &mut self,
        lba: u64,
        out: &mut [u8],
        count: u32,
        timeout_ms: u32,
    ) -> Result<(), Self::Error>;

    #[cfg(feature = "write")]
    fn write_blocks(
        &mut self,
        lba: u64,
        data: &[u8],
        count: u32,
        timeout_ms: u32,
    ) -> Result<(), Self::Error>;
}
