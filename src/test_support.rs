extern crate std;

use std::{string::String, vec::Vec};

use sdcard::{CardInfo, CardType, ControlCommand, ControlReply, DiskError, DiskIo, StatusFlags};

use crate::fs::{DirEntry, Filesystem, FreeSpace, FsError, Label};

/// In-memory root directory with scripted failures and call accounting.
pub(crate) struct FakeFs {
    pub entries: Vec<DirEntry>,
    pub label: Result<Label, FsError>,
    pub free: Result<FreeSpace, FsError>,
    pub mount_result: Result<(), FsError>,
    pub open_error: Option<FsError>,
    pub read_error_at: Option<(usize, FsError)>,
    pub mounts: Vec<(String, bool)>,
    pub opened_paths: Vec<String>,
    pub calls: usize,
    pub open_dirs: usize,
    pub closed_dirs: usize,
}

impl FakeFs {
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self {
            entries,
            label: Ok(Label::new()),
            free: Ok(FreeSpace {
                free_clusters: 1000,
                total_clusters: 4000,
                sectors_per_cluster: 8,
            }),
            mount_result: Ok(()),
            open_error: None,
            read_error_at: None,
            mounts: Vec::new(),
            opened_paths: Vec::new(),
            calls: 0,
            open_dirs: 0,
            closed_dirs: 0,
        }
    }
}

impl Filesystem for FakeFs {
    type Dir = usize;

    fn mount(&mut self, volume: &str, force: bool) -> Result<(), FsError> {
        self.calls += 1;
        self.mounts.push((String::from(volume), force));
        self.mount_result
    }

    fn open_dir(&mut self, path: &str) -> Result<usize, FsError> {
        self.calls += 1;
        self.opened_paths.push(String::from(path));
        if let Some(err) = self.open_error {
            return Err(err);
        }
        self.open_dirs += 1;
        Ok(0)
    }

    fn read_dir(&mut self, dir: &mut usize) -> Result<Option<DirEntry>, FsError> {
        self.calls += 1;
        if let Some((at, err)) = self.read_error_at {
            if *dir == at {
                return Err(err);
            }
        }
        let entry = self.entries.get(*dir).cloned();
        *dir += 1;
        Ok(entry)
    }

    fn close_dir(&mut self, _dir: usize) -> Result<(), FsError> {
        self.calls += 1;
        self.closed_dirs += 1;
        Ok(())
    }

    fn label(&mut self, _volume: &str) -> Result<Label, FsError> {
        self.calls += 1;
        self.label.clone()
    }

    fn free_space(&mut self, _volume: &str) -> Result<FreeSpace, FsError> {
        self.calls += 1;
        self.free
    }
}

/// Block device whose bring-up result is fixed by the test.
pub(crate) struct FakeDisk {
    pub init_result: Result<(), StatusFlags>,
    pub init_calls: usize,
}

impl FakeDisk {
    pub fn ready() -> Self {
        Self {
            init_result: Ok(()),
            init_calls: 0,
        }
    }

    pub fn failing(flags: StatusFlags) -> Self {
        Self {
            init_result: Err(flags),
            init_calls: 0,
        }
    }
}

impl DiskIo for FakeDisk {
    fn status(&mut self) -> StatusFlags {
        match self.init_result {
            Ok(()) if self.init_calls > 0 => StatusFlags::OK,
            Ok(()) => StatusFlags::NOT_INITIALIZED,
            Err(flags) => flags,
        }
    }

    fn initialize(&mut self) -> Result<(), StatusFlags> {
        self.init_calls += 1;
        self.init_result
    }

    fn read(&mut self, _buf: &mut [u8], _start_lba: u64, _count: u32) -> Result<(), DiskError> {
        Err(DiskError::Io)
    }

    #[cfg(feature = "write")]
    fn write(&mut self, _buf: &[u8], _start_lba: u64, _count: u32) -> Result<(), DiskError> {
        Err(DiskError::Io)
    }

    fn control(&mut self, _command: ControlCommand) -> Result<ControlReply, DiskError> {
        Ok(ControlReply::Done)
    }
}

pub(crate) fn card(block_count: u64) -> CardInfo {
    CardInfo {
        card_type: CardType::SdhcSdxc,
        version: 0x0200,
        block_size: 512,
        block_count,
    }
}
