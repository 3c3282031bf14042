use core::fmt;

bitflags::bitflags! {
    /// Drive status as seen by a filesystem layer. An empty set means ready.
    ///
    /// Bit values match the FatFs `DSTATUS` encoding.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const NOT_INITIALIZED = 0x01;
        const NO_DISK = 0x02;
        const WRITE_PROTECTED = 0x04;
    }
}

impl StatusFlags {
    pub const OK: Self = Self::empty();

    pub fn is_ready(self) -> bool {
        !self.intersects(Self::NOT_INITIALIZED | Self::NO_DISK)
    }
}

/// Failure of a sector operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskError {
    /// No adapter registered at this drive index.
    NoSuchDevice(u8),
    /// Bring-up failed; carries the status at the time of failure.
    Init(StatusFlags),
    /// Card absent or not initialized.
    NotReady,
    WriteProtected,
    /// Bad sector range, buffer size or control code.
    Parameter,
    /// Transfer failure or timeout. Buffer contents are undefined.
    Io,
}

impl DiskError {
    /// FatFs `DRESULT` code.
    pub const fn code(self) -> u8 {
        match self {
            DiskError::Io => 1,
            DiskError::WriteProtected => 2,
            DiskError::NotReady | DiskError::Init(_) => 3,
            DiskError::Parameter | DiskError::NoSuchDevice(_) => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            DiskError::NoSuchDevice(_) => "no_such_device",
            DiskError::Init(_) => "init_failed",
            DiskError::NotReady => "not_ready",
            DiskError::WriteProtected => "write_protected",
            DiskError::Parameter => "parameter",
            DiskError::Io => "io",
        }
    }
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.label())
    }
}
