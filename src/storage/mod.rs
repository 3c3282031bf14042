use core::fmt;

use sdcard::{CardDriver, CardInfo, DiskIo, SdDisk, StatusFlags};

use crate::{
    config::{MOUNT_FORCE, ROOT_VOLUME},
    fs::{Filesystem, FsError},
    report::{self, ReportBuffer},
};


/// Outcome of the last mount attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MountState {
    #[default]
    Unmounted,
    Mounted,
    Failed(FsError),
}

impl MountState {
    pub const fn label(self) -> &'static str {
        match self {
            MountState::Unmounted => "unmounted",
            MountState::Mounted => "mounted",
            MountState::Failed(_) => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageInitError {
    /// Block device bring-up failed with these status bits.
    Device(StatusFlags),
}

impl StorageInitError {
    pub const fn label(self) -> &'static str {
        match self {
            StorageInitError::Device(_) => "device",
        }
    }
}

impl fmt::Display for StorageInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageInitError::Device(flags) => {
                write!(f, "device init failed status=0x{:02x}", flags.bits())
            }
        }
    }
}

/// Mount state and report buffer for one card, owned by the caller.
#[derive(Default)]
pub struct StorageContext {
    mount: MountState,
    report: ReportBuffer,
}

impl StorageContext {
    pub const fn new() -> Self {
        Self {
            mount: MountState::Unmounted,
            report: ReportBuffer::new(),
        }
    }

    pub fn mount_state(&self) -> MountState {
        self.mount
    }

    pub fn is_mounted(&self) -> bool {
        self.mount == MountState::Mounted
    }

    /// Brings up `disk` and mounts the root volume.
    ///
    /// Only a device failure is an error; it leaves the volume unmounted
    /// without trying to mount. A failed mount is kept in
    /// [`StorageContext::mount_state`] and shows up in the report.
    pub fn initialize_storage<D, F>(&mut self, disk: &mut D, fs: &mut F) -> Result<(), StorageInitError>
    where
        D: DiskIo + ?Sized,
        F: Filesystem,
    {
        if let Err(flags) = disk.initialize() {
            log::warn!("sdview: storage_init_error status=0x{:02x}", flags.bits());
            self.mount = MountState::Unmounted;
            return Err(StorageInitError::Device(flags));
        }

        self.mount = match fs.mount(ROOT_VOLUME, MOUNT_FORCE) {
            Ok(()) => {
                log::info!("sdview: mount_ok volume={}", ROOT_VOLUME);
                MountState::Mounted
            }
            Err(err) => {
                log::warn!(
                    "sdview: mount_error volume={} code={}",
                    ROOT_VOLUME,
                    err.label()
                );
                MountState::Failed(err)
            }
        };
        Ok(())
    }

    /// Rebuilds the report from scratch and returns it.
    pub fn build_report<F: Filesystem>(&mut self, card: &CardInfo, fs: &mut F) -> &str {
        report::build(&mut self.report, &self.mount, card, fs);
        self.report.as_str()
    }

    /// Report for the card behind `disk`.
    pub fn refresh<C: CardDriver, F: Filesystem>(&mut self, disk: &SdDisk<C>, fs: &mut F) -> &str {
        let info = disk.card_info();
        self.build_report(&info, fs)
    }

    /// Text of the last built report.
    pub fn report(&self) -> &str {
        self.report.as_str()
    }
}
