//! SD card driver in SPI mode over blocking `embedded-hal` 1.0 traits.
//!
//! The bus must be clocked at or below [`SD_INIT_SPI_RATE_KHZ`] during card
//! identification and may run up to [`SD_DATA_SPI_RATE_MHZ`] afterwards. A
//! HAL that can retune its bus hands [`SpiCard::with_rate_control`] a setter
//! and the driver switches rates itself.

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiBus,
};

use crate::card::{CardDriver, CardInfo, CardType};

mod csd;
mod init;
mod io;
#[cfg(test)]
mod tests;

const SD_CMD0: u8 = 0;
const SD_CMD8: u8 = 8;
const SD_CMD9: u8 = 9;
const SD_CMD16: u8 = 16;
const SD_CMD17: u8 = 17;
#[cfg(feature = "write")]
const SD_CMD24: u8 = 24;
const SD_CMD55: u8 = 55;
const SD_ACMD41: u8 = 41;
const SD_CMD58: u8 = 58;
const SD_CMD0_ATTEMPTS: usize = 16;
const SD_ACMD41_ATTEMPTS: usize = 200;
const SD_RETRY_DELAY_MS: u32 = 1;
const SD_POLL_DELAY_US: u32 = 10;
const SD_CSD_TOKEN_POLLS: usize = 50_000;
pub const SD_INIT_SPI_RATE_KHZ: u32 = 400;
pub const SD_DATA_SPI_RATE_MHZ: u32 = 24;
pub const SD_SECTOR_SIZE: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

impl SdCardVersion {
    /// Packed major/minor as reported in [`CardInfo::version`].
    pub const fn packed(self) -> u16 {
        match self {
            SdCardVersion::V1 => 0x0100,
            SdCardVersion::V2 => 0x0200,
        }
    }
}

#[derive(Debug)]
pub enum SpiCardError<E> {
    Spi(E),
    ChipSelect,
    NotPresent,
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd16Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
    AddressOutOfRange(u64),
    BufferSize { expected: usize, actual: usize },
}

/// Card-detect source for [`SpiCard`].
pub trait CardDetect {
    fn is_present(&mut self) -> bool;
}

/// Slot without a detect switch; the card is assumed inserted.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCardDetect;

impl CardDetect for NoCardDetect {
    fn is_present(&mut self) -> bool {
        true
    }
}

/// Detect switch pulled low while a card is inserted.
#[derive(Debug)]
pub struct DetectActiveLow<P>(pub P);

impl<P: InputPin> CardDetect for DetectActiveLow<P> {
    fn is_present(&mut self) -> bool {
        self.0.is_low().unwrap_or(false)
    }
}

/// Retunes the SPI bus clock, in Hz.
pub type RateControl<SPI> = fn(&mut SPI, u32);

pub struct SpiCard<SPI, CS, D, CD = NoCardDetect> {
    spi: SPI,
    cs: CS,
    delay: D,
    detect: CD,
    set_rate: Option<RateControl<SPI>>,
    high_capacity: Option<bool>,
    info: CardInfo,
}

impl<SPI, CS, D> SpiCard<SPI, CS, D, NoCardDetect>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
        Self::with_detect(spi, cs, delay, NoCardDetect)
    }
}

impl<SPI, CS, D, CD> SpiCard<SPI, CS, D, CD>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    CD: CardDetect,
{
    pub fn with_detect(spi: SPI, mut cs: CS, delay: D, detect: CD) -> Self {
        let _ = cs.set_high();
        Self {
            spi,
            cs,
            delay,
            detect,
            set_rate: None,
            high_capacity: None,
            info: CardInfo::default(),
        }
    }

    pub fn with_rate_control(mut self, set_rate: RateControl<SPI>) -> Self {
        self.set_rate = Some(set_rate);
        self
    }

    pub(super) fn apply_init_clock(&mut self) {
        self.apply_rate(SD_INIT_SPI_RATE_KHZ * 1_000);
    }

    pub(super) fn apply_data_clock(&mut self) {
        self.apply_rate(SD_DATA_SPI_RATE_MHZ * 1_000_000);
    }

    fn apply_rate(&mut self, hz: u32) {
        if let Some(set_rate) = self.set_rate {
            log::debug!("sdcard: spi_rate hz={}", hz);
            set_rate(&mut self.spi, hz);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.high_capacity.is_some()
    }

    pub fn invalidate(&mut self) {
        self.high_capacity = None;
        self.info = CardInfo::default();
    }

    pub fn bus_mut(&mut self) -> &mut SPI {
        &mut self.spi
    }

    pub fn release(self) -> (SPI, CS, D, CD) {
        (self.spi, self.cs, self.delay, self.detect)
    }

    fn block_arg(&self, lba: u64, high_capacity: bool) -> Result<u32, SpiCardError<SPI::Error>> {
        let addr = if high_capacity {
            lba
        } else {
            lba.saturating_mul(SD_SECTOR_SIZE as u64)
        };
        u32::try_from(addr).map_err(|_| SpiCardError::AddressOutOfRange(lba))
    }
}

fn check_buffer<E>(len: usize, count: u32) -> Result<(), SpiCardError<E>> {
    let expected = count as usize * SD_SECTOR_SIZE;
    if len != expected {
        return Err(SpiCardError::BufferSize {
            expected,
            actual: len,
        });
    }
    Ok(())
}

/// Number of [`SD_POLL_DELAY_US`] waits that fit in `timeout_ms`. One budget
/// covers a whole multi-block transfer.
fn poll_budget(timeout_ms: u32) -> u32 {
    let budget = timeout_ms.saturating_mul(1_000 / SD_POLL_DELAY_US);
    budget.max(1)
}

impl<SPI, CS, D, CD> CardDriver for SpiCard<SPI, CS, D, CD>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    CD: CardDetect,
{
    type Error = SpiCardError<SPI::Error>;

    fn is_present(&mut self) -> bool {
        self.detect.is_present()
    }

    fn init(&mut self) -> Result<CardInfo, Self::Error> {
        self.invalidate();
        if !self.detect.is_present() {
            return Err(SpiCardError::NotPresent);
        }
        let status = self.probe()?;
        let block_count = status.capacity_bytes / SD_SECTOR_SIZE as u64;
        self.info = CardInfo {
            card_type: if status.high_capacity {
                CardType::SdhcSdxc
            } else {
                CardType::Sdsc
            },
            version: status.version.packed(),
            block_size: SD_SECTOR_SIZE as u32,
            block_count,
        };
        self.high_capacity = Some(status.high_capacity);
        Ok(self.info)
    }

    fn card_info(&self) -> CardInfo {
        self.info
    }

    fn read_blocks(
        &mut self,
        lba: u64,
        out: &mut [u8],
        count: u32,
        timeout_ms: u32,
    ) -> Result<(), Self::Error> {
        check_buffer::<SPI::Error>(out.len(), count)?;
        let high_capacity = self
            .high_capacity
            .ok_or(SpiCardError::<SPI::Error>::NotInitialized)?;
        let mut budget = poll_budget(timeout_ms);
        for (idx, block) in out.chunks_exact_mut(SD_SECTOR_SIZE).enumerate() {
            let arg = self.block_arg(lba + idx as u64, high_capacity)?;
            self.read_data_sector(arg, block, &mut budget)?;
        }
        Ok(())
    }

    #[cfg(feature = "write")]
    fn write_blocks(
        &mut self,
        lba: u64,
        data: &[u8],
        count: u32,
        timeout_ms: u32,
    ) -> Result<(), Self::Error> {
        check_buffer::<SPI::Error>(data.len(), count)?;
        let high_capacity = self
            .high_capacity
            .ok_or(SpiCardError::<SPI::Error>::NotInitialized)?;
        let mut budget = poll_budget(timeout_ms);
        for (idx, block) in data.chunks_exact(SD_SECTOR_SIZE).enumerate() {
            let arg = self.block_arg(lba + idx as u64, high_capacity)?;
            self.write_data_sector(arg, block, &mut budget)?;
        }
        Ok(())
    }
}
