//! Filesystem contract consumed by the report builder.
//!
//! Allocation tables and directory encoding live in whichever FAT library
//! implements [`Filesystem`]; this module only fixes the surface.

use core::fmt;

/// Longest entry name the report accepts (FatFs `FF_MAX_LFN`).
pub const NAME_MAX: usize = 255;
/// Volume label buffer size; FAT labels are at most 11 bytes, exFAT 11 UTF-16 units.
pub const LABEL_MAX: usize = 23;

pub type EntryName = heapless::String<NAME_MAX>;
pub type Label = heapless::String<LABEL_MAX>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub name: EntryName,
    pub is_dir: bool,
    pub size: u64,
}

impl DirEntry {
    /// Builds an entry, cutting `name` at [`NAME_MAX`] bytes on a char boundary.
    pub fn new(name: &str, is_dir: bool, size: u64) -> Self {
        let mut entry_name = EntryName::new();
        for ch in name.chars() {
            if entry_name.push(ch).is_err() {
                break;
            }
        }
        Self {
            name: entry_name,
            is_dir,
            size,
        }
    }

    pub fn file(name: &str, size: u64) -> Self {
        Self::new(name, false, size)
    }

    pub fn dir(name: &str) -> Self {
        Self::new(name, true, 0)
    }

    /// FatFs marks end-of-directory with an entry whose name is empty.
    pub fn is_end_marker(&self) -> bool {
        self.name.is_empty()
    }
}

/// Cluster accounting for one volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeSpace {
    pub free_clusters: u32,
    pub total_clusters: u32,
    pub sectors_per_cluster: u32,
}

/// Filesystem failure, numbered as FatFs `FRESULT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    DiskErr,
    IntErr,
    NotReady,
    NoFile,
    NoPath,
    InvalidName,
    Denied,
    Exist,
    InvalidObject,
    WriteProtected,
    InvalidDrive,
    NotEnabled,
    NoFilesystem,
    MkfsAborted,
    Timeout,
    Locked,
    NotEnoughCore,
    TooManyOpenFiles,
    InvalidParameter,
}

impl FsError {
    pub const fn code(self) -> u8 {
        match self {
            FsError::DiskErr => 1,
            FsError::IntErr => 2,
            FsError::NotReady => 3,
            FsError::NoFile => 4,
            FsError::NoPath => 5,
            FsError::InvalidName => 6,
            FsError::Denied => 7,
            FsError::Exist => 8,
            FsError::InvalidObject => 9,
            FsError::WriteProtected => 10,
            FsError::InvalidDrive => 11,
            FsError::NotEnabled => 12,
            FsError::NoFilesystem => 13,
            FsError::MkfsAborted => 14,
            FsError::Timeout => 15,
            FsError::Locked => 16,
            FsError::NotEnoughCore => 17,
            FsError::TooManyOpenFiles => 18,
            FsError::InvalidParameter => 19,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            FsError::DiskErr => "disk_err",
            FsError::IntErr => "int_err",
            FsError::NotReady => "not_ready",
            FsError::NoFile => "no_file",
            FsError::NoPath => "no_path",
            FsError::InvalidName => "invalid_name",
            FsError::Denied => "denied",
            FsError::Exist => "exist",
            FsError::InvalidObject => "invalid_object",
            FsError::WriteProtected => "write_protected",
            FsError::InvalidDrive => "invalid_drive",
            FsError::NotEnabled => "not_enabled",
            FsError::NoFilesystem => "no_filesystem",
            FsError::MkfsAborted => "mkfs_aborted",
            FsError::Timeout => "timeout",
            FsError::Locked => "locked",
            FsError::NotEnoughCore => "not_enough_core",
            FsError::TooManyOpenFiles => "too_many_open_files",
            FsError::InvalidParameter => "invalid_parameter",
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.label())
    }
}

impl From<sdcard::DiskError> for FsError {
    fn from(value: sdcard::DiskError) -> Self {
        match value {
            sdcard::DiskError::NoSuchDevice(_) => FsError::InvalidDrive,
            sdcard::DiskError::Init(_) | sdcard::DiskError::NotReady => FsError::NotReady,
            sdcard::DiskError::WriteProtected => FsError::WriteProtected,
            sdcard::DiskError::Parameter => FsError::InvalidParameter,
            sdcard::DiskError::Io => FsError::DiskErr,
        }
    }
}

/// Directory and volume queries a mounted FAT library provides.
pub trait Filesystem {
    /// Open directory handle.
    type Dir;

    fn mount(&mut self, volume: &str, force: bool) -> Result<(), FsError>;

    fn open_dir(&mut self, path: &str) -> Result<Self::Dir, FsError>;

    /// Next entry, or `None` at end of directory.
    fn read_dir(&mut self, dir: &mut Self::Dir) -> Result<Option<DirEntry>, FsError>;

    fn close_dir(&mut self, dir: Self::Dir) -> Result<(), FsError>;

    /// Volume label; empty when the volume has none.
    fn label(&mut self, volume: &str) -> Result<Label, FsError>;

    fn free_space(&mut self, volume: &str) -> Result<FreeSpace, FsError>;
}
