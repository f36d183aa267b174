//! Page-table and page-directory entries in i386 encoding.
//!
//! Low bits carry the protection flags, the high 20 bits the frame number.

use core::fmt;

use bitflags::bitflags;

use crate::mm::layout::{FrameId, PAGE_SHIFT};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in the low bits of an entry.
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}

/// Flags given to page-table links in the directory and to ordinary user pages.
pub const USER_RW: PteFlags = PteFlags::PRESENT
    .union(PteFlags::WRITABLE)
    .union(PteFlags::USER);

const FRAME_MASK: u32 = 0xffff_f000;

/// One 32-bit directory or table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// The absent entry.
    pub const EMPTY: Self = Self(0);

    /// Builds an entry pointing at `frame`.
    pub const fn new(frame: FrameId, flags: PteFlags) -> Self {
        Self((frame.0 << PAGE_SHIFT) | flags.bits())
    }

    /// Decodes a raw word read from a table.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw word as stored in the table.
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn frame(self) -> FrameId {
        FrameId((self.0 & FRAME_MASK) >> PAGE_SHIFT)
    }

    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & PteFlags::WRITABLE.bits() != 0
    }

    pub const fn is_user(self) -> bool {
        self.0 & PteFlags::USER.bits() != 0
    }

    /// Same entry with the writable bit cleared.
    #[must_use]
    pub const fn write_protected(self) -> Self {
        Self(self.0 & !PteFlags::WRITABLE.bits())
    }

    /// Same entry with the writable bit set.
    #[must_use]
    pub const fn made_writable(self) -> Self {
        Self(self.0 | PteFlags::WRITABLE.bits())
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("frame", &self.frame().0)
            .field("flags", &self.flags())
            .finish()
    }
}
