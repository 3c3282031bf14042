use crate::card::{CardDriver, CardInfo};

use super::{
    ControlCommand, ControlReply, DiskError, DiskIo, StatusFlags, ERASE_BLOCK_SECTORS,
    TRANSFER_TIMEOUT_MS,
};

/// [`DiskIo`] adapter over one card slot.
pub struct SdDisk<C> {
    card: C,
    initialized: bool,
    timeout_ms: u32,
}

impl<C: CardDriver> SdDisk<C> {
    pub fn new(card: C) -> Self {
        Self {
            card,
            initialized: false,
            timeout_ms: TRANSFER_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Identity reported by the board driver; all zero before bring-up.
    pub fn card_info(&self) -> CardInfo {
        self.card.card_info()
    }

    pub fn card_mut(&mut self) -> &mut C {
        &mut self.card
    }

    pub fn into_inner(self) -> C {
        self.card
    }

    /// Validates a transfer request against the cached geometry.
    fn check_range(&self, buf_len: usize, start_lba: u64, count: u32) -> Result<(), DiskError> {
        if !self.initialized {
            return Err(DiskError::NotReady);
        }
        if count == 0 {
            return Err(DiskError::Parameter);
        }
        let info = self.card.card_info();
        let expected = (count as u64).saturating_mul(info.block_size as u64);
        if buf_len as u64 != expected {
            return Err(DiskError::Parameter);
        }
        match start_lba.checked_add(count as u64) {
            Some(end) if end <= info.block_count => Ok(()),
            _ => Err(DiskError::Parameter),
        }
    }
}

impl<C: CardDriver> DiskIo for SdDisk<C> {
    fn status(&mut self) -> StatusFlags {
        if !self.card.is_present() {
            self.initialized = false;
            return StatusFlags::NO_DISK | StatusFlags::NOT_INITIALIZED;
        }
        let mut status = StatusFlags::OK;
        if !self.initialized {
            status |= StatusFlags::NOT_INITIALIZED;
        }
        if self.card.is_write_protected() {
            status |= StatusFlags::WRITE_PROTECTED;
        }
        status
    }

    fn initialize(&mut self) -> Result<(), StatusFlags> {
        self.initialized = false;
        if !self.card.is_present() {
            log::warn!("sdcard: init_skipped reason=no_disk");
            return Err(StatusFlags::NO_DISK | StatusFlags::NOT_INITIALIZED);
        }
        match self.card.init() {
            Ok(info) => {
                self.initialized = true;
                log::info!(
                    "sdcard: disk_ready type={} block_size={} blocks={}",
                    info.card_type.label(),
                    info.block_size,
                    info.block_count
                );
                Ok(())
            }
            Err(err) => {
                log::warn!("sdcard: init_error err={:?}", err);
                Err(StatusFlags::NOT_INITIALIZED)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], start_lba: u64, count: u32) -> Result<(), DiskError> {
        self.check_range(buf.len(), start_lba, count)?;
        self.card
            .read_blocks(start_lba, buf, count, self.timeout_ms)
            .map_err(|err| {
                log::warn!(
                    "sdcard: read_error lba={} count={} err={:?}",
                    start_lba,
                    count,
                    err
                );
                DiskError::Io
            })?;
        log::debug!("sdcard: read_ok lba={} count={}", start_lba, count);
        Ok(())
    }

    #[cfg(feature = "write")]
    fn write(&mut self, buf: &[u8], start_lba: u64, count: u32) -> Result<(), DiskError> {
        self.check_range(buf.len(), start_lba, count)?;
        if self.card.is_write_protected() {
            return Err(DiskError::WriteProtected);
        }
        self.card
            .write_blocks(start_lba, buf, count, self.timeout_ms)
            .map_err(|err| {
                log::warn!(
                    "sdcard: write_error lba={} count={} err={:?}",
                    start_lba,
                    count,
                    err
                );
                DiskError::Io
            })?;
        log::debug!("sdcard: write_ok lba={} count={}", start_lba, count);
        Ok(())
    }

    fn control(&mut self, command: ControlCommand) -> Result<ControlReply, DiskError> {
        let reply = match command {
            // Transfers complete before returning; nothing is buffered here.
            ControlCommand::Sync => ControlReply::Done,
            ControlCommand::GetSectorCount => {
                ControlReply::SectorCount(self.card.card_info().block_count)
            }
            ControlCommand::GetSectorSize => {
                ControlReply::SectorSize(self.card.card_info().block_size)
            }
            ControlCommand::GetEraseBlockSize => ControlReply::EraseBlockSize(ERASE_BLOCK_SECTORS),
        };
        Ok(reply)
    }
}
