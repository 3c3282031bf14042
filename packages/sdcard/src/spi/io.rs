use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

#[cfg(feature = "write")]
use super::SD_CMD24;
use super::{
    CardDetect, SpiCard, SpiCardError, SD_CMD17, SD_CMD9, SD_CSD_TOKEN_POLLS, SD_POLL_DELAY_US,
};

const DATA_START_TOKEN: u8 = 0xFE;
/// Bytes clocked while waiting for R1 after a command frame.
const R1_POLLS: usize = 16;

impl<SPI, CS, D, CD> SpiCard<SPI, CS, D, CD>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    CD: CardDetect,
{
    pub(super) fn read_data_sector(
        &mut self,
        arg: u32,
        out: &mut [u8],
        budget: &mut u32,
    ) -> Result<(), SpiCardError<SPI::Error>> {
        let cmd17_r1 = self.send_command_hold_cs(SD_CMD17, arg, 0xFF, &mut [])?;
        if cmd17_r1 != 0x00 {
            self.end_transaction();
            return Err(SpiCardError::Cmd17Unexpected(cmd17_r1));
        }

        let result = self.read_data_payload(out, budget);
        self.end_transaction();
        result
    }

    fn read_data_payload(
        &mut self,
        out: &mut [u8],
        budget: &mut u32,
    ) -> Result<(), SpiCardError<SPI::Error>> {
        let token = loop {
            let byte = self.transfer_byte(0xFF)?;
            if byte != 0xFF {
                break byte;
            }
            if !self.spend_poll(budget) {
                log::warn!("sdcard: read_token_timeout cmd={}", SD_CMD17);
                return Err(SpiCardError::DataTokenTimeout(SD_CMD17));
            }
        };
        if token != DATA_START_TOKEN {
            return Err(SpiCardError::DataTokenUnexpected(SD_CMD17, token));
        }

        out.fill(0xFF);
        self.spi.transfer_in_place(out).map_err(SpiCardError::Spi)?;
        // Discard data CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        Ok(())
    }

    #[cfg(feature = "write")]
    pub(super) fn write_data_sector(
        &mut self,
        arg: u32,
        data: &[u8],
        budget: &mut u32,
    ) -> Result<(), SpiCardError<SPI::Error>> {
        let cmd24_r1 = self.send_command_hold_cs(SD_CMD24, arg, 0xFF, &mut [])?;
        if cmd24_r1 != 0x00 {
            self.end_transaction();
            return Err(SpiCardError::Cmd24Unexpected(cmd24_r1));
        }

        let result = self.write_data_payload(data, budget);
        self.end_transaction();
        result
    }

    #[cfg(feature = "write")]
    fn write_data_payload(
        &mut self,
        data: &[u8],
        budget: &mut u32,
    ) -> Result<(), SpiCardError<SPI::Error>> {
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(DATA_START_TOKEN)?;
        self.spi.write(data).map_err(SpiCardError::Spi)?;
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;

        let response = self.transfer_byte(0xFF)? & 0x1F;
        if response != 0x05 {
            log::warn!("sdcard: write_rejected response=0x{:02x}", response);
            return Err(SpiCardError::WriteDataRejected(response));
        }

        while self.transfer_byte(0xFF)? != 0xFF {
            if !self.spend_poll(budget) {
                log::warn!("sdcard: write_busy_timeout");
                return Err(SpiCardError::WriteBusyTimeout);
            }
        }
        Ok(())
    }

    /// Takes one wait out of the transfer budget. `false` once it is spent.
    fn spend_poll(&mut self, budget: &mut u32) -> bool {
        if *budget == 0 {
            return false;
        }
        *budget -= 1;
        self.delay.delay_us(SD_POLL_DELAY_US);
        true
    }

    pub(super) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SpiCardError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, true)
    }

    pub(super) fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SpiCardError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, false)
    }

    fn send_command_inner(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
        release_cs_after: bool,
    ) -> Result<u8, SpiCardError<SPI::Error>> {
        let frame = [
            0x40 | cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            crc,
        ];

        self.cs
            .set_low()
            .map_err(|_| SpiCardError::<SPI::Error>::ChipSelect)?;
        let result = self.exchange_command(cmd, &frame, extra_response);
        if result.is_err() || release_cs_after {
            self.end_transaction();
        }
        result
    }

    /// Clocks out `frame` and collects R1 plus any trailing response bytes.
    /// Chip select is left as is.
    fn exchange_command(
        &mut self,
        cmd: u8,
        frame: &[u8; 6],
        extra_response: &mut [u8],
    ) -> Result<u8, SpiCardError<SPI::Error>> {
        self.spi.write(frame).map_err(SpiCardError::Spi)?;

        let mut r1 = None;
        for _ in 0..R1_POLLS {
            let byte = self.transfer_byte(0xFF)?;
            if (byte & 0x80) == 0 {
                r1 = Some(byte);
                break;
            }
        }
        let r1 = r1.ok_or(SpiCardError::<SPI::Error>::NoResponse(cmd))?;

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF)?;
        }
        Ok(r1)
    }

    pub(super) fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SpiCardError<SPI::Error>> {
        for _ in 0..bytes {
            let _ = self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    /// Reads the 16-byte CSD block that follows CMD9.
    pub(super) fn read_register_block(&mut self) -> Result<[u8; 16], SpiCardError<SPI::Error>> {
        let mut token = 0xFFu8;
        let mut got_token = false;
        for _ in 0..SD_CSD_TOKEN_POLLS {
            token = self.transfer_byte(0xFF)?;
            if token != 0xFF {
                got_token = true;
                break;
            }
        }
        if !got_token {
            return Err(SpiCardError::DataTokenTimeout(SD_CMD9));
        }
        if token != DATA_START_TOKEN {
            return Err(SpiCardError::DataTokenUnexpected(SD_CMD9, token));
        }

        let mut block = [0xFFu8; 16];
        self.spi
            .transfer_in_place(&mut block)
            .map_err(SpiCardError::Spi)?;
        // Read and discard CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        Ok(block)
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SpiCardError<SPI::Error>> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .map_err(SpiCardError::Spi)?;
        Ok(frame[0])
    }

    pub(super) fn cs_high(&mut self) -> Result<(), SpiCardError<SPI::Error>> {
        self.cs.set_high().map_err(|_| SpiCardError::ChipSelect)
    }

    pub(super) fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF);
    }
}
