use core::fmt;

use crate::config::{REPORT_CAPACITY, REPORT_SAFETY_MARGIN};

/// Append-only text accumulator with a hard capacity of [`REPORT_CAPACITY`]
/// bytes.
///
/// Listing entries go through [`ReportBuffer::try_append`], which refuses
/// anything that would reach into the last [`REPORT_SAFETY_MARGIN`] bytes.
/// Fixed text goes through [`ReportBuffer::push`], which may use the margin
/// and is clipped at the hard capacity.
pub struct ReportBuffer {
    text: heapless::String<REPORT_CAPACITY>,
}

impl Default for ReportBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportBuffer {
    pub const fn new() -> Self {
        Self {
            text: heapless::String::new(),
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        REPORT_CAPACITY
    }

    /// Highest length an entry appended through `try_append` may reach.
    pub const fn entry_limit(&self) -> usize {
        REPORT_CAPACITY - REPORT_SAFETY_MARGIN
    }

    /// Appends `s` only if the margin stays intact. Returns whether it did.
    pub fn try_append(&mut self, s: &str) -> bool {
        if self.text.len() + s.len() > self.entry_limit() {
            return false;
        }
        self.text.push_str(s).is_ok()
    }

    pub fn push(&mut self, s: &str) {
        if self.text.push_str(s).is_ok() {
            return;
        }
        for ch in s.chars() {
            if self.text.push(ch).is_err() {
                log::warn!("sdview: report_clipped len={}", self.text.len());
                break;
            }
        }
    }
}

impl fmt::Write for ReportBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s);
        Ok(())
    }
}
