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

//! A mapped firmware ROM.

use std::any::Any;

use crate::bus::{
    BusAccess,
    BusInterface,
    Device,
    IoDevice,
    MemoryMappedDevice,
    RegionDescriptor,
    RegionKind,
    MEMORY_ADDRESS_LIMIT,
};

pub const ROM_TAG_PRIMARY: u16 = 0;
pub const ROM_TAG_TOP_ALIAS: u16 = 1;

pub struct RomDevice {
    name: String,
    base: u64,
    data: Vec<u8>,
    alias_top: bool,
}

impl RomDevice {
    pub fn new(name: &str, base: u64, data: Vec<u8>, alias_top: bool) -> Self {
        Self {
            name: name.to_string(),
            base,
            data,
            alias_top,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn read_le(&self, offset: u64, bytes: u8) -> Option<u64> {
        let start = offset as usize;
        let slice = self.data.get(start..start + bytes as usize)?;
        let mut buf = [0u8; 8];
        buf[..slice.len()].copy_from_slice(slice);
        Some(u64::from_le_bytes(buf))
    }
}

impl IoDevice for RomDevice {}

impl MemoryMappedDevice for RomDevice {
    fn mmio_read(&mut self, access: &BusAccess, bus: &mut BusInterface) -> u64 {
        self.read_le(access.offset, access.width.bytes())
            .unwrap_or_else(|| bus.open_bus_value(access.width))
    }

    fn mmio_write(&mut self, access: &BusAccess, value: u64, _bus: &mut BusInterface) {
        log::trace!("Write of {:#X} to ROM at {:#X} ignored", value, access.address);
    }

    fn mmio_peek(&self, access: &BusAccess) -> Option<u64> {
        self.read_le(access.offset, access.width.bytes())
    }
}

impl Device for RomDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn mapping(&self) -> Vec<RegionDescriptor> {
        let len = self.data.len() as u64;
        let mut regions = vec![RegionDescriptor::new(RegionKind::Rom, self.base, len).with_tag(ROM_TAG_PRIMARY)];
        if self.alias_top {
            match MEMORY_ADDRESS_LIMIT.checked_sub(len) {
                Some(top) if top != self.base => {
                    regions.push(RegionDescriptor::new(RegionKind::Rom, top, len).with_tag(ROM_TAG_TOP_ALIAS));
                }
                Some(_) => {}
                None => log::warn!("{} is too large to alias below 4GB", self.name),
            }
        }
        regions
    }

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
    fn test_rom_is_read_only_and_aliased() {
        let mut bus = BusInterface::default();
        let mut image = vec![0u8; 0x10000];
        image[0xFFF0] = 0xEA;
        bus.attach_device(Box::new(RomDevice::new("BIOS", 0xF0000, image, true)), DeviceConfig::new())
            .unwrap();

        assert_eq!(bus.read_u8(0xFFFF0), 0xEA);
        assert_eq!(bus.read_u8(0xFFFF_FFF0), 0xEA);
        bus.write_u8(0xFFFF0, 0x90);
        assert_eq!(bus.read_u8(0xFFFF0), 0xEA);
    }

    #[test]
    fn test_overlapping_roms_rejected() {
        let mut bus = BusInterface::default();
        bus.attach_device(Box::new(RomDevice::new("BIOS", 0xF0000, vec![0; 0x10000], false)), DeviceConfig::new())
            .unwrap();
        let result = bus.attach_device(
            Box::new(RomDevice::new("Option ROM", 0xF8000, vec![0; 0x8000], false)),
            DeviceConfig::new(),
        );
        assert!(result.is_err());
    }
}
