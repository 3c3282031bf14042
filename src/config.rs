pub const REPORT_CAPACITY: usize = 4096;
/// Headroom kept free for the truncation notice and the summary line.
pub const REPORT_SAFETY_MARGIN: usize = 300;
pub const ROOT_VOLUME: &str = "0:";
pub const ROOT_DIR: &str = "0:";
pub const MOUNT_FORCE: bool = true;
pub const BYTES_PER_MB: u64 = 1024 * 1024;
/// Sectors per MB in the free-space section, assuming 512-byte sectors.
pub const FS_SECTORS_PER_MB: u64 = 2048;
