/*
    Planar

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Region descriptors, access widths and region identifiers for the address router.

use std::fmt;

use serde_derive::Deserialize;
use strum_macros::{Display, EnumIter, EnumString};

use crate::registry::DeviceHandle;

/// One past the highest byte address of the memory space (32-bit physical).
pub const MEMORY_ADDRESS_LIMIT: u64 = 0x1_0000_0000;
/// One past the highest port of the I/O space (16-bit).
pub const IO_ADDRESS_LIMIT: u64 = 0x1_0000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display)]
pub enum AddressSpace {
    #[strum(serialize = "memory")]
    Memory,
    #[strum(serialize = "io")]
    Io,
}

impl AddressSpace {
    pub fn limit(&self) -> u64 {
        match self {
            AddressSpace::Memory => MEMORY_ADDRESS_LIMIT,
            AddressSpace::Io => IO_ADDRESS_LIMIT,
        }
    }
}

/// The kind of a mapped region. The kind determines the priority tier of the region.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegionKind {
    Ram,
    Rom,
    Mmio,
    Io,
}

impl RegionKind {
    /// Priority tier. When regions overlap, the highest tier wins.
    pub fn tier(&self) -> u8 {
        match self {
            RegionKind::Ram => 0,
            RegionKind::Rom => 1,
            RegionKind::Mmio | RegionKind::Io => 2,
        }
    }

    pub fn space(&self) -> AddressSpace {
        match self {
            RegionKind::Io => AddressSpace::Io,
            _ => AddressSpace::Memory,
        }
    }

    /// Whether a region of this kind may be registered over an existing region of another
    /// device with the `shadow` flag set. ROM may never shadow.
    pub fn may_shadow(&self) -> bool {
        matches!(self, RegionKind::Mmio | RegionKind::Io)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AccessWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
    Qword = 8,
}

impl AccessWidth {
    pub const fn bytes(self) -> u8 {
        self as u8
    }

    pub fn from_bytes(bytes: usize) -> Option<AccessWidth> {
        match bytes {
            1 => Some(AccessWidth::Byte),
            2 => Some(AccessWidth::Word),
            4 => Some(AccessWidth::Dword),
            8 => Some(AccessWidth::Qword),
            _ => None,
        }
    }

    /// The width an access is split into when the full width cannot be delivered at once.
    pub fn half(self) -> Option<AccessWidth> {
        match self {
            AccessWidth::Byte => None,
            AccessWidth::Word => Some(AccessWidth::Byte),
            AccessWidth::Dword => Some(AccessWidth::Word),
            AccessWidth::Qword => Some(AccessWidth::Dword),
        }
    }

    pub fn mask(self) -> u64 {
        match self {
            AccessWidth::Qword => u64::MAX,
            _ => (1u64 << (self.bytes() as u32 * 8)) - 1,
        }
    }
}

impl fmt::Display for AccessWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bytes() as u32 * 8)
    }
}

/// The set of access widths a region accepts in a single dispatch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AccessWidths(u8);

impl AccessWidths {
    pub const BYTE: AccessWidths = AccessWidths(1);
    pub const WORD: AccessWidths = AccessWidths(2);
    pub const DWORD: AccessWidths = AccessWidths(4);
    pub const QWORD: AccessWidths = AccessWidths(8);
    pub const UP_TO_WORD: AccessWidths = AccessWidths(0x3);
    pub const UP_TO_DWORD: AccessWidths = AccessWidths(0x7);
    pub const ALL: AccessWidths = AccessWidths(0xF);

    pub const fn union(self, other: AccessWidths) -> AccessWidths {
        AccessWidths(self.0 | other.0)
    }

    pub const fn accepts(self, width: AccessWidth) -> bool {
        self.0 & width.bytes() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for AccessWidths {
    fn default() -> Self {
        AccessWidths::ALL
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RegionId(pub(crate) u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{:04}", self.0)
    }
}

/// A request to map a range of addresses to a device.
///
/// `device_offset` is added to the offset within the region before the device sees it, so two
/// regions can present different windows onto the same device storage. `tag` is passed through
/// to the device on every access so it can tell its regions apart.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionDescriptor {
    pub kind: RegionKind,
    pub base: u64,
    pub size: u64,
    pub widths: AccessWidths,
    pub tag: u16,
    pub device_offset: u64,
    pub shadow: bool,
}

impl RegionDescriptor {
    pub fn new(kind: RegionKind, base: u64, size: u64) -> Self {
        let widths = match kind {
            RegionKind::Io => AccessWidths::UP_TO_DWORD,
            _ => AccessWidths::ALL,
        };
        Self {
            kind,
            base,
            size,
            widths,
            tag: 0,
            device_offset: 0,
            shadow: false,
        }
    }

    pub fn ports(base: u16, count: u16) -> Self {
        Self::new(RegionKind::Io, base as u64, count as u64)
    }

    pub fn with_tag(mut self, tag: u16) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_widths(mut self, widths: AccessWidths) -> Self {
        self.widths = widths;
        self
    }

    pub fn with_device_offset(mut self, offset: u64) -> Self {
        self.device_offset = offset;
        self
    }

    pub fn with_shadow(mut self, shadow: bool) -> Self {
        self.shadow = shadow;
        self
    }

    /// Exclusive end address.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn space(&self) -> AddressSpace {
        self.kind.space()
    }

    pub fn overlaps(&self, base: u64, end: u64) -> bool {
        self.base < end && base < self.end()
    }
}

/// A live mapping in the router.
#[derive(Clone, Debug)]
pub struct Region {
    pub id: RegionId,
    pub owner: DeviceHandle,
    pub desc: RegionDescriptor,
    pub(crate) seq: u64,
}

impl Region {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.desc.base && address < self.desc.end()
    }

    pub fn base(&self) -> u64 {
        self.desc.base
    }

    pub fn end(&self) -> u64 {
        self.desc.end()
    }

    pub fn kind(&self) -> RegionKind {
        self.desc.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_halving() {
        assert_eq!(AccessWidth::Qword.half(), Some(AccessWidth::Dword));
        assert_eq!(AccessWidth::Word.half(), Some(AccessWidth::Byte));
        assert_eq!(AccessWidth::Byte.half(), None);
        assert_eq!(AccessWidth::Word.mask(), 0xFFFF);
        assert_eq!(AccessWidth::Qword.mask(), u64::MAX);
    }

    #[test]
    fn test_width_sets() {
        let widths = AccessWidths::BYTE.union(AccessWidths::DWORD);
        assert!(widths.accepts(AccessWidth::Byte));
        assert!(!widths.accepts(AccessWidth::Word));
        assert!(widths.accepts(AccessWidth::Dword));
        assert!(!widths.accepts(AccessWidth::Qword));
        assert!(!RegionDescriptor::ports(0x60, 1).widths.accepts(AccessWidth::Qword));
    }

    #[test]
    fn test_tiers() {
        assert!(RegionKind::Mmio.tier() > RegionKind::Rom.tier());
        assert!(RegionKind::Rom.tier() > RegionKind::Ram.tier());
        assert!(!RegionKind::Rom.may_shadow());
    }
}
