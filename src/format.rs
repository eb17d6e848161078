//! Per-level record format masks.
//!
//! Each severity level owns a bitmask selecting which metadata fields the
//! encoder renders into a record. The mask byte travels in the record header,
//! so a reader never needs the table that produced it.

use bitflags::bitflags;

use crate::record::LogLevel;

bitflags! {
    /// Field-selection mask stored in every record header.
    ///
    /// Bits 0..=5 are configurable per level. `TRUNCATED` is set by the
    /// encoder when a field had to be clipped; it is never accepted from a
    /// user-supplied mask.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FmtFlags: u8 {
        /// Render the severity level (mirror text prefix).
        const LVL = 1 << 0;
        /// Render the tag string.
        const TAG = 1 << 1;
        /// Render the timestamp.
        const TIME = 1 << 2;
        /// Render process/task info. Carries no payload on this target.
        const P_INFO = 1 << 3;
        /// Render the function name.
        const FUNC = 1 << 4;
        /// Render the source line number.
        const LINE = 1 << 5;
        /// Encoder marker: at least one field was clipped to fit.
        const TRUNCATED = 1 << 6;
    }
}

impl FmtFlags {
    /// Every renderable field (excludes the truncation marker).
    pub const FULL: FmtFlags = FmtFlags::LVL
        .union(FmtFlags::TAG)
        .union(FmtFlags::TIME)
        .union(FmtFlags::P_INFO)
        .union(FmtFlags::FUNC)
        .union(FmtFlags::LINE);

    /// Mask used for levels that were never configured.
    pub const DEFAULT: FmtFlags = FmtFlags::LVL.union(FmtFlags::TAG);
}

/// Format registry: one mask per severity level.
///
/// Read-only once the engine has started; record layout must stay stable for
/// whatever reads the region back after a crash.
pub struct FormatTable {
    masks: [FmtFlags; LogLevel::COUNT],
}

impl FormatTable {
    pub const fn new() -> Self {
        Self {
            masks: [FmtFlags::DEFAULT; LogLevel::COUNT],
        }
    }

    /// Store a mask for `level`, stripping the encoder-owned marker bit.
    pub fn set(&mut self, level: LogLevel, mask: FmtFlags) {
        self.masks[level as usize] = mask.difference(FmtFlags::TRUNCATED);
    }

    /// Look up the mask for `level`.
    #[inline]
    pub fn get(&self, level: LogLevel) -> FmtFlags {
        self.masks[level as usize]
    }
}

impl Default for FormatTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mask_is_level_and_tag() {
        let table = FormatTable::new();
        assert_eq!(table.get(LogLevel::Info), FmtFlags::LVL | FmtFlags::TAG);
    }

    #[test]
    fn test_set_strips_truncated_bit() {
        let mut table = FormatTable::new();
        table.set(LogLevel::Error, FmtFlags::FULL | FmtFlags::TRUNCATED);
        assert_eq!(table.get(LogLevel::Error), FmtFlags::FULL);
    }

    #[test]
    fn test_full_excludes_truncated() {
        assert!(!FmtFlags::FULL.contains(FmtFlags::TRUNCATED));
    }
}
