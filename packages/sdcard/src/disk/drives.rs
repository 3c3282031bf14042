use super::{ControlCommand, ControlReply, DiskError, DiskIo, StatusFlags};

/// Number of drive slots, matching FatFs `FF_VOLUMES` defaults.
pub const MAX_DRIVES: usize = 4;

/// Physical drive table: drive index to adapter.
///
/// Every operation on an empty or out-of-range slot fails with
/// [`DiskError::NoSuchDevice`].
pub struct Drives<'a> {
    slots: [Option<&'a mut dyn DiskIo>; MAX_DRIVES],
}

impl Default for Drives<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Drives<'a> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Registers `disk` at `drive`, replacing any previous adapter.
    pub fn attach(&mut self, drive: u8, disk: &'a mut dyn DiskIo) -> Result<(), DiskError> {
        let slot = self
            .slots
            .get_mut(drive as usize)
            .ok_or(DiskError::NoSuchDevice(drive))?;
        *slot = Some(disk);
        Ok(())
    }

    pub fn detach(&mut self, drive: u8) -> Option<&'a mut dyn DiskIo> {
        self.slots.get_mut(drive as usize).and_then(Option::take)
    }

    pub fn get(&mut self, drive: u8) -> Result<&mut (dyn DiskIo + 'a), DiskError> {
        match self.slots.get_mut(drive as usize) {
            Some(Some(disk)) => Ok(&mut **disk),
            _ => Err(DiskError::NoSuchDevice(drive)),
        }
    }

    pub fn status(&mut self, drive: u8) -> Result<StatusFlags, DiskError> {
        Ok(self.get(drive)?.status())
    }

    pub fn initialize(&mut self, drive: u8) -> Result<(), DiskError> {
        self.get(drive)?.initialize().map_err(DiskError::Init)
    }

    pub fn read(
        &mut self,
        drive: u8,
        buf: &mut [u8],
        start_lba: u64,
        count: u32,
    ) -> Result<(), DiskError> {
        self.get(drive)?.read(buf, start_lba, count)
    }

    #[cfg(feature = "write")]
    pub fn write(
        &mut self,
        drive: u8,
        buf: &[u8],
        start_lba: u64,
        count: u32,
    ) -> Result<(), DiskError> {
        self.get(drive)?.write(buf, start_lba, count)
    }

    pub fn control(&mut self, drive: u8, command: ControlCommand) -> Result<ControlReply, DiskError> {
        self.get(drive)?.control(command)
    }

    /// Raw-code variant of [`Drives::control`] for FatFs-style callers.
    pub fn control_code(&mut self, drive: u8, code: u8) -> Result<ControlReply, DiskError> {
        let disk = self.get(drive)?;
        disk.control(ControlCommand::try_from(code)?)
    }
}
