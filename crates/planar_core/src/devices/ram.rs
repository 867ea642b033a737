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

//! System RAM.
//!
//! One backing store covers all installed memory. It is mapped as conventional memory below
//! 640K and as extended memory from 1MB up. The 384K of backing that sits under the adapter
//! area can be mapped again above the top of extended memory, as chipsets with a "remap"
//! option do.

use std::any::Any;

use crate::bus::{BusAccess, BusInterface, Device, IoDevice, MemoryMappedDevice, RegionDescriptor, RegionKind};

pub const CONVENTIONAL_LIMIT: u64 = 0xA0000;
pub const EXTENDED_BASE: u64 = 0x10_0000;
/// Largest RAM size that still leaves room for firmware below 4GB.
pub const MAX_RAM_SIZE: u64 = 0xC000_0000;
pub const ADAPTER_AREA_SIZE: u64 = EXTENDED_BASE - CONVENTIONAL_LIMIT;

pub const RAM_TAG_CONVENTIONAL: u16 = 0;
pub const RAM_TAG_EXTENDED: u16 = 1;
pub const RAM_TAG_REMAPPED: u16 = 2;

pub struct SystemRam {
    data: Vec<u8>,
}

impl SystemRam {
    pub fn new(size: usize) -> Self {
        Self { data: vec![0; size] }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Region mapping up to `kb` kilobytes of the backing under the adapter area directly above
    /// extended memory. Returns `None` when there is no such backing.
    pub fn remap_top_descriptor(&self, kb: u32) -> Option<RegionDescriptor> {
        let available = self.size().saturating_sub(CONVENTIONAL_LIMIT).min(ADAPTER_AREA_SIZE);
        let size = (kb as u64 * 1024).min(available);
        if size == 0 {
            return None;
        }
        let base = self.size().max(EXTENDED_BASE);
        Some(
            RegionDescriptor::new(RegionKind::Ram, base, size)
                .with_tag(RAM_TAG_REMAPPED)
                .with_device_offset(CONVENTIONAL_LIMIT),
        )
    }

    fn read_le(&self, offset: u64, bytes: u8) -> Option<u64> {
        let start = offset as usize;
        let slice = self.data.get(start..start + bytes as usize)?;
        let mut buf = [0u8; 8];
        buf[..slice.len()].copy_from_slice(slice);
        Some(u64::from_le_bytes(buf))
    }
}

impl IoDevice for SystemRam {}

impl MemoryMappedDevice for SystemRam {
    fn mmio_read(&mut self, access: &BusAccess, bus: &mut BusInterface) -> u64 {
        self.read_le(access.offset, access.width.bytes())
            .unwrap_or_else(|| bus.open_bus_value(access.width))
    }

    fn mmio_write(&mut self, access: &BusAccess, value: u64, _bus: &mut BusInterface) {
        let start = access.offset as usize;
        let len = access.width.bytes() as usize;
        if let Some(slice) = self.data.get_mut(start..start + len) {
            slice.copy_from_slice(&value.to_le_bytes()[..len]);
        }
    }

    fn mmio_peek(&self, access: &BusAccess) -> Option<u64> {
        self.read_le(access.offset, access.width.bytes())
    }
}

impl Device for SystemRam {
    fn name(&self) -> String {
        String::from("System RAM")
    }

    fn mapping(&self) -> Vec<RegionDescriptor> {
        let mut regions = vec![RegionDescriptor::new(
            RegionKind::Ram,
            0,
            self.size().min(CONVENTIONAL_LIMIT),
        )
        .with_tag(RAM_TAG_CONVENTIONAL)];

        if self.size() > EXTENDED_BASE {
            regions.push(
                RegionDescriptor::new(RegionKind::Ram, EXTENDED_BASE, self.size() - EXTENDED_BASE)
                    .with_tag(RAM_TAG_EXTENDED)
                    .with_device_offset(EXTENDED_BASE),
            );
        }
        regions
    }

    /// Memory contents survive a reset.
    fn reset(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceConfig;

    #[test]
    fn test_mapping_640k() {
        let ram = SystemRam::new(640 * 1024);
        let mapping = ram.mapping();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].end(), CONVENTIONAL_LIMIT);
        assert!(ram.remap_top_descriptor(384).is_none());
    }

    #[test]
    fn test_mapping_4m() {
        let ram = SystemRam::new(4 * 1024 * 1024);
        let mapping = ram.mapping();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping[1].base, EXTENDED_BASE);
        assert_eq!(mapping[1].end(), 0x40_0000);

        let remap = ram.remap_top_descriptor(384).unwrap();
        assert_eq!(remap.base, 0x40_0000);
        assert_eq!(remap.size, ADAPTER_AREA_SIZE);
        assert_eq!(remap.device_offset, CONVENTIONAL_LIMIT);
    }

    #[test]
    fn test_read_write_through_bus() {
        let mut bus = BusInterface::default();
        bus.attach_device(Box::new(SystemRam::new(2 * 1024 * 1024)), DeviceConfig::new())
            .unwrap();
        bus.write_u32(0x500, 0x1234_5678);
        assert_eq!(bus.read_u16(0x502), 0x1234);
        bus.write_u64(0x10_0000, 0x0102_0304_0506_0708);
        assert_eq!(bus.read_u8(0x10_0007), 0x01);
        // Adapter area is not RAM.
        assert_eq!(bus.read_u8(0xB8000), 0xFF);
        assert_eq!(bus.peek_u8(0x503), 0x12);
    }
}
