#![no_std]

pub mod card;
pub mod disk;
pub mod spi;

pub use card::{CardDriver, CardInfo, CardType};
pub use disk::{
    ControlCommand, ControlReply, DiskError, DiskIo, Drives, SdDisk, StatusFlags,
    TRANSFER_TIMEOUT_MS,
};
pub use spi::{RateControl, SpiCard, SpiCardError, SD_SECTOR_SIZE};
