use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

use super::{
    csd::{Csd, SdProbeStatus},
    CardDetect, SdCardVersion, SpiCard, SpiCardError, SD_ACMD41, SD_ACMD41_ATTEMPTS, SD_CMD0,
    SD_CMD0_ATTEMPTS, SD_CMD16, SD_CMD55, SD_CMD58, SD_CMD8, SD_CMD9, SD_RETRY_DELAY_MS,
    SD_SECTOR_SIZE,
};

const R1_IDLE: u8 = 0x01;
const R1_READY: u8 = 0x00;
const R1_ILLEGAL_COMMAND: u8 = 0x04;
/// CMD8 argument: 2.7-3.6 V supply, check pattern 0xAA.
const CMD8_VOLTAGE_CHECK: u32 = 0x0000_01AA;
/// ACMD41 HCS bit, set when the host accepts high-capacity cards.
const ACMD41_HCS: u32 = 0x4000_0000;
/// OCR byte 0 CCS bit.
const OCR_CCS: u8 = 0x40;
const WAKE_UP_BYTES: usize = 10;

impl<SPI, CS, D, CD> SpiCard<SPI, CS, D, CD>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    CD: CardDetect,
{
    /// Identification sequence. Leaves the bus at the data clock on success.
    pub(super) fn probe(&mut self) -> Result<SdProbeStatus, SpiCardError<SPI::Error>> {
        self.apply_init_clock();
        self.cs_high()?;
        self.send_dummy_clocks(WAKE_UP_BYTES)?;

        self.enter_idle()?;
        let version = self.check_interface()?;
        self.wait_until_ready(version)?;
        if version == SdCardVersion::V1 {
            self.set_block_length()?;
        }
        self.apply_data_clock();

        let high_capacity = self.read_ocr()?;
        let capacity_bytes = self.read_capacity()?;

        log::info!(
            "sdcard: init_ok version={:?} high_capacity={} capacity_bytes={}",
            version,
            high_capacity as u8,
            capacity_bytes
        );
        Ok(SdProbeStatus {
            version,
            high_capacity,
            capacity_bytes,
        })
    }

    /// CMD0 until the card reports idle.
    fn enter_idle(&mut self) -> Result<(), SpiCardError<SPI::Error>> {
        let mut r1 = 0xFF;
        for _ in 0..SD_CMD0_ATTEMPTS {
            r1 = self.send_command(SD_CMD0, 0, 0x95, &mut [])?;
            if r1 == R1_IDLE {
                return Ok(());
            }
        }
        log::warn!("sdcard: cmd0_failed r1=0x{:02x}", r1);
        Err(SpiCardError::Cmd0Failed(r1))
    }

    /// CMD8 tells v2 cards (echoed pattern) from v1 cards (illegal command).
    fn check_interface(&mut self) -> Result<SdCardVersion, SpiCardError<SPI::Error>> {
        let mut r7 = [0u8; 4];
        let r1 = self.send_command(SD_CMD8, CMD8_VOLTAGE_CHECK, 0x87, &mut r7)?;
        if r1 == R1_IDLE {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                log::warn!("sdcard: cmd8_echo_mismatch r7={:02x?}", r7);
                return Err(SpiCardError::Cmd8EchoMismatch(r7));
            }
            return Ok(SdCardVersion::V2);
        }
        if (r1 & R1_ILLEGAL_COMMAND) != 0 {
            return Ok(SdCardVersion::V1);
        }
        log::warn!("sdcard: cmd8_unexpected r1=0x{:02x}", r1);
        Err(SpiCardError::Cmd8Unexpected(r1))
    }

    /// CMD55 + ACMD41 until the card leaves idle, 1 ms apart.
    fn wait_until_ready(&mut self, version: SdCardVersion) -> Result<(), SpiCardError<SPI::Error>> {
        let arg = match version {
            SdCardVersion::V2 => ACMD41_HCS,
            SdCardVersion::V1 => 0,
        };
        let mut r1 = 0xFF;
        for attempt in 0..SD_ACMD41_ATTEMPTS {
            let _ = self.send_command(SD_CMD55, 0, 0x65, &mut [])?;
            r1 = self.send_command(SD_ACMD41, arg, 0x77, &mut [])?;
            if r1 == R1_READY {
                log::debug!("sdcard: acmd41_ready attempts={}", attempt + 1);
                return Ok(());
            }
            self.delay.delay_ms(SD_RETRY_DELAY_MS);
        }
        log::warn!("sdcard: acmd41_timeout r1=0x{:02x}", r1);
        Err(SpiCardError::Acmd41Timeout(r1))
    }

    fn set_block_length(&mut self) -> Result<(), SpiCardError<SPI::Error>> {
        let r1 = self.send_command(SD_CMD16, SD_SECTOR_SIZE as u32, 0xFF, &mut [])?;
        if r1 != R1_READY {
            log::warn!("sdcard: cmd16_unexpected r1=0x{:02x}", r1);
            return Err(SpiCardError::Cmd16Unexpected(r1));
        }
        Ok(())
    }

    /// CMD58; returns the CCS bit.
    fn read_ocr(&mut self) -> Result<bool, SpiCardError<SPI::Error>> {
        let mut ocr = [0u8; 4];
        let r1 = self.send_command(SD_CMD58, 0, 0xFD, &mut ocr)?;
        if r1 != R1_READY {
            log::warn!("sdcard: cmd58_unexpected r1=0x{:02x}", r1);
            return Err(SpiCardError::Cmd58Unexpected(r1));
        }
        Ok((ocr[0] & OCR_CCS) != 0)
    }

    /// CMD9 and CSD capacity decode.
    fn read_capacity(&mut self) -> Result<u64, SpiCardError<SPI::Error>> {
        let r1 = self.send_command_hold_cs(SD_CMD9, 0, 0xAF, &mut [])?;
        if r1 != R1_READY {
            self.end_transaction();
            log::warn!("sdcard: cmd9_unexpected r1=0x{:02x}", r1);
            return Err(SpiCardError::Cmd9Unexpected(r1));
        }
        let register = self.read_register_block();
        self.end_transaction();

        let csd = Csd(register?);
        csd.capacity_bytes().ok_or_else(|| {
            log::warn!("sdcard: csd_unsupported structure={}", csd.structure());
            SpiCardError::<SPI::Error>::CapacityDecodeFailed
        })
    }
}
