//! Sector-addressed drive contract for a FAT filesystem layer.
//!
//! [`DiskIo`] is the uniform interface; [`SdDisk`] adapts any
//! [`CardDriver`](crate::card::CardDriver) to it and [`Drives`] maps drive
//! indices to adapters.

mod control;
mod drives;
mod sd_disk;
mod status;

pub use control::{ControlCommand, ControlReply};
pub use drives::{Drives, MAX_DRIVES};
pub use sd_disk::SdDisk;
pub use status::{DiskError, StatusFlags};

/// Transfer timeout handed to the board driver for every read and write.
pub const TRANSFER_TIMEOUT_MS: u32 = 10_000;

/// Erase granularity reported by [`ControlCommand::GetEraseBlockSize`];
/// 1 means no larger erase unit is exposed.
pub const ERASE_BLOCK_SECTORS: u32 = 1;

pub trait DiskIo {
    /// Current drive status. Never blocks longer than card detect.
    fn status(&mut self) -> StatusFlags;

    /// Runs device bring-up. Every call re-initializes the card.
    fn initialize(&mut self) -> Result<(), StatusFlags>;

    /// Reads `count` sectors starting at `start_lba` into `buf`, which must be
    /// exactly `count * sector_size` bytes. All-or-nothing.
    fn read(&mut self, buf: &mut [u8], start_lba: u64, count: u32) -> Result<(), DiskError>;

    #[cfg(feature = "write")]
    fn write(&mut self, buf: &[u8], start_lba: u64, count: u32) -> Result<(), DiskError>;

    fn control(&mut self, command: ControlCommand) -> Result<ControlReply, DiskError>;
}
