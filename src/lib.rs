#![no_std]

pub mod config;
pub mod fs;
pub mod report;
pub mod storage;

pub use fs::{DirEntry, Filesystem, FreeSpace, FsError, Label};
pub use report::{ListingSummary, ReportBuffer};
pub use storage::{MountState, StorageContext, StorageInitError};

#[cfg(test)]
mod test_support;
