use super::DiskError;

/// Miscellaneous drive commands, numbered as FatFs `disk_ioctl` codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Sync,
    GetSectorCount,
    GetSectorSize,
    GetEraseBlockSize,
}

impl ControlCommand {
    pub const fn code(self) -> u8 {
        match self {
            ControlCommand::Sync => 0,
            ControlCommand::GetSectorCount => 1,
            ControlCommand::GetSectorSize => 2,
            ControlCommand::GetEraseBlockSize => 3,
        }
    }
}

impl TryFrom<u8> for ControlCommand {
    type Error = DiskError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ControlCommand::Sync),
            1 => Ok(ControlCommand::GetSectorCount),
            2 => Ok(ControlCommand::GetSectorSize),
            3 => Ok(ControlCommand::GetEraseBlockSize),
            _ => Err(DiskError::Parameter),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    SectorCount(u64),
    /// Logical sector size in bytes.
    SectorSize(u32),
    /// Erase block size in units of sectors.
    EraseBlockSize(u32),
}
