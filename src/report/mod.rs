//! Bounded text report describing the card, the volume and its root directory.

use core::fmt::Write as _;

use sdcard::{CardInfo, CardType};

use crate::{
    config::{BYTES_PER_MB, FS_SECTORS_PER_MB, ROOT_DIR, ROOT_VOLUME},
    fs::{DirEntry, Filesystem, FsError, NAME_MAX},
    storage::MountState,
};

mod buffer;

pub use buffer::ReportBuffer;

/// One listing line: indent, name, size suffix and newline.
const LINE_MAX: usize = NAME_MAX + 40;
const TRUNCATION_NOTICE: &str = "\n... (truncated, buffer full)\n";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListingSummary {
    pub files: u32,
    pub dirs: u32,
    pub truncated: bool,
}

/// Fills `out` with a fresh report. Never fails; problems become report lines.
///
/// With `mount` anything but [`MountState::Mounted`], `fs` is not touched.
pub fn build<F: Filesystem>(
    out: &mut ReportBuffer,
    mount: &MountState,
    card: &CardInfo,
    fs: &mut F,
) -> Option<ListingSummary> {
    out.clear();
    device_section(out, card);

    let summary = match mount {
        MountState::Mounted => {
            filesystem_section(out, fs);
            Some(directory_listing(out, fs))
        }
        MountState::Unmounted | MountState::Failed(_) => {
            not_mounted_section(out, mount);
            None
        }
    };

    log::debug!(
        "sdview: report_built bytes={} mounted={} files={} dirs={} truncated={}",
        out.len(),
        matches!(mount, MountState::Mounted) as u8,
        summary.map_or(0, |s| s.files),
        summary.map_or(0, |s| s.dirs),
        summary.is_some_and(|s| s.truncated) as u8
    );
    summary
}

fn card_type_text(card_type: CardType) -> &'static str {
    match card_type {
        CardType::Sdsc => "SDSC (Standard Capacity)",
        CardType::SdhcSdxc => "SDHC/SDXC (High/Extended Capacity)",
        CardType::Secured => "Secured Card",
        CardType::Unknown => "Unknown",
    }
}

fn device_section(out: &mut ReportBuffer, card: &CardInfo) {
    out.push("SD CARD INFORMATION\n===================\n\n");
    let _ = writeln!(out, "Card Type: {}", card_type_text(card.card_type));
    let _ = writeln!(
        out,
        "Card Version: {}.{}",
        card.version_major(),
        card.version_minor()
    );
    let _ = writeln!(out, "\nCapacity: {} MB", card.capacity_bytes() / BYTES_PER_MB);
    let _ = writeln!(out, "Block Size: {} bytes", card.block_size);
    let _ = writeln!(out, "Block Count: {}", card.block_count);
}

/// Cluster count to whole megabytes. Assumes 512-byte sectors regardless of
/// the card's reported sector size.
fn clusters_to_mb(clusters: u32, sectors_per_cluster: u32) -> u64 {
    clusters as u64 * sectors_per_cluster as u64 / FS_SECTORS_PER_MB
}

fn filesystem_section<F: Filesystem>(out: &mut ReportBuffer, fs: &mut F) {
    out.push("\nFILE SYSTEM\n===========\n");

    match fs.label(ROOT_VOLUME) {
        Ok(label) if label.is_empty() => out.push("Label: (none)\n"),
        Ok(label) => {
            let _ = writeln!(out, "Label: {}", label);
        }
        Err(err) => {
            log::warn!("sdview: label_error code={}", err.label());
            let _ = writeln!(out, "Label: error {}", err);
        }
    }

    match fs.free_space(ROOT_VOLUME) {
        Ok(space) => {
            let total = clusters_to_mb(space.total_clusters, space.sectors_per_cluster);
            let free = clusters_to_mb(space.free_clusters, space.sectors_per_cluster);
            let _ = writeln!(out, "Total: {} MB", total);
            let _ = writeln!(out, "Free: {} MB", free);
        }
        Err(err) => {
            log::warn!("sdview: free_space_error code={}", err.label());
            let _ = writeln!(out, "Free space: error {}", err);
        }
    }
}

fn not_mounted_section(out: &mut ReportBuffer, mount: &MountState) {
    out.push("\n\nFILE SYSTEM NOT MOUNTED\n");
    out.push("=======================\n");
    out.push("Unable to read file system.\n");
    out.push("Card may not be formatted with FAT.\n");
    if let MountState::Failed(err) = mount {
        let _ = writeln!(out, "Mount result: {}", err);
    }
}

fn format_entry(line: &mut heapless::String<LINE_MAX>, entry: &DirEntry) {
    line.clear();
    let _ = if entry.is_dir {
        writeln!(line, "[DIR]  {}", entry.name)
    } else {
        writeln!(line, "       {} ({} bytes)", entry.name, entry.size)
    };
}

fn directory_listing<F: Filesystem>(out: &mut ReportBuffer, fs: &mut F) -> ListingSummary {
    let mut summary = ListingSummary::default();
    out.push("\n\nFILES AND DIRECTORIES\n");
    out.push("=====================\n\n");

    let mut dir = match fs.open_dir(ROOT_DIR) {
        Ok(dir) => dir,
        Err(err) => {
            log::warn!("sdview: opendir_error path={} code={}", ROOT_DIR, err.label());
            let _ = writeln!(out, "Error opening directory: {}", err);
            return summary;
        }
    };

    let mut read_error: Option<FsError> = None;
    let mut line = heapless::String::<LINE_MAX>::new();
    loop {
        let entry = match fs.read_dir(&mut dir) {
            Ok(Some(entry)) if !entry.is_end_marker() => entry,
            Ok(_) => break,
            Err(err) => {
                read_error = Some(err);
                break;
            }
        };

        format_entry(&mut line, &entry);
        if !out.try_append(&line) {
            out.push(TRUNCATION_NOTICE);
            summary.truncated = true;
            break;
        }
        if entry.is_dir {
            summary.dirs += 1;
        } else {
            summary.files += 1;
        }
    }

    if let Err(err) = fs.close_dir(dir) {
        log::warn!("sdview: closedir_error code={}", err.label());
    }
    if let Some(err) = read_error {
        log::warn!("sdview: readdir_error code={}", err.label());
        let _ = writeln!(out, "Error reading directory: {}", err);
    }

    let _ = writeln!(
        out,
        "\nTotal: {} files, {} directories",
        summary.files, summary.dirs
    );
    summary
}
