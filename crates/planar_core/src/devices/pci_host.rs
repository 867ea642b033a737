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

//! PCI host bridge with configuration mechanism #1.
//!
//! Software selects a function and register by writing a dword to CONFIG_ADDRESS (0xCF8) and
//! then reads or writes CONFIG_DATA (0xCFC-0xCFF). Bit 31 of the address enables the cycle;
//! with it clear, or for a bus other than 0, data reads return all ones.

use std::any::Any;

use crate::{
    bus::{
        AccessWidths,
        BusAccess,
        BusInterface,
        Device,
        IoDevice,
        MemoryMappedDevice,
        RegionDescriptor,
    },
    pci::{PciAddress, PciFunctionDescriptor},
};

pub const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
pub const PCI_CONFIG_DATA: u16 = 0xCFC;

const TAG_ADDRESS: u16 = 0;
const TAG_DATA: u16 = 1;

const CONFIG_ENABLE: u32 = 0x8000_0000;

pub struct PciHostBridge {
    address: u32,
    vendor_id: u16,
    device_id: u16,
}

impl PciHostBridge {
    pub fn new(vendor_id: u16, device_id: u16) -> Self {
        Self {
            address: 0,
            vendor_id,
            device_id,
        }
    }

    pub fn config_address(&self) -> u32 {
        self.address
    }

    /// The function and register selected by CONFIG_ADDRESS, if a bus 0 cycle is enabled.
    fn selected(&self, byte: u64) -> Option<(PciAddress, u8)> {
        if self.address & CONFIG_ENABLE == 0 || (self.address >> 16) & 0xFF != 0 {
            return None;
        }
        let slot = ((self.address >> 11) & 0x1F) as u8;
        let function = ((self.address >> 8) & 0x07) as u8;
        let register = (self.address & 0xFC) as u8 + byte as u8;
        Some((PciAddress::new(slot, function), register))
    }
}

impl IoDevice for PciHostBridge {
    fn io_read(&mut self, access: &BusAccess, bus: &mut BusInterface) -> u64 {
        match access.tag {
            TAG_ADDRESS => self.address as u64,
            _ => match self.selected(access.offset) {
                Some((address, register)) => bus.pci_config_read(address, register, access.width) as u64,
                None => access.width.mask(),
            },
        }
    }

    fn io_write(&mut self, access: &BusAccess, value: u64, bus: &mut BusInterface) {
        match access.tag {
            TAG_ADDRESS => self.address = value as u32,
            _ => {
                if let Some((address, register)) = self.selected(access.offset) {
                    bus.pci_config_write(address, register, access.width, value as u32);
                }
            }
        }
    }
}

impl MemoryMappedDevice for PciHostBridge {}

impl Device for PciHostBridge {
    fn name(&self) -> String {
        String::from("PCI Host Bridge")
    }

    fn mapping(&self) -> Vec<RegionDescriptor> {
        vec![
            RegionDescriptor::ports(PCI_CONFIG_ADDRESS, 4)
                .with_tag(TAG_ADDRESS)
                .with_widths(AccessWidths::DWORD),
            RegionDescriptor::ports(PCI_CONFIG_DATA, 4).with_tag(TAG_DATA),
        ]
    }

    fn reset(&mut self) {
        self.address = 0;
    }

    fn pci_functions(&self) -> Vec<PciFunctionDescriptor> {
        vec![PciFunctionDescriptor::new(0, self.vendor_id, self.device_id).with_class(0x06, 0x00, 0x00)]
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
    use crate::{
        pci::{PciSlot, PciSlotKind},
        registry::DeviceConfig,
    };

    fn config_address(slot: u8, function: u8, register: u8) -> u32 {
        CONFIG_ENABLE | (slot as u32) << 11 | (function as u32) << 8 | (register as u32 & 0xFC)
    }

    fn setup() -> BusInterface {
        let mut bus = BusInterface::default();
        bus.register_pci_slot(PciSlot::new(0, PciSlotKind::Northbridge, [0; 4]))
            .unwrap();
        bus.attach_device(
            Box::new(PciHostBridge::new(0x8086, 0x122D)),
            DeviceConfig::new().with_pci_slot(0),
        )
        .unwrap();
        bus
    }

    #[test]
    fn test_mechanism_one_reads_own_function() {
        let mut bus = setup();
        bus.io_write_u32(PCI_CONFIG_ADDRESS, config_address(0, 0, 0));
        assert_eq!(bus.io_read_u32(PCI_CONFIG_ADDRESS), config_address(0, 0, 0));
        assert_eq!(bus.io_read_u32(PCI_CONFIG_DATA), 0x122D_8086);
        assert_eq!(bus.io_read_u16(PCI_CONFIG_DATA + 2), 0x122D);

        bus.io_write_u32(PCI_CONFIG_ADDRESS, config_address(0, 0, 0x08));
        assert_eq!(bus.io_read_u8(PCI_CONFIG_DATA + 3), 0x06);
    }

    #[test]
    fn test_disabled_or_absent_reads_all_ones() {
        let mut bus = setup();
        bus.io_write_u32(PCI_CONFIG_ADDRESS, config_address(0, 0, 0) & !CONFIG_ENABLE);
        assert_eq!(bus.io_read_u32(PCI_CONFIG_DATA), 0xFFFF_FFFF);

        bus.io_write_u32(PCI_CONFIG_ADDRESS, config_address(5, 0, 0));
        assert_eq!(bus.io_read_u32(PCI_CONFIG_DATA), 0xFFFF_FFFF);

        // Bus 1 does not exist.
        bus.io_write_u32(PCI_CONFIG_ADDRESS, config_address(0, 0, 0) | 0x1_0000);
        assert_eq!(bus.io_read_u16(PCI_CONFIG_DATA), 0xFFFF);
    }

    #[test]
    fn test_address_register_is_dword_only() {
        let mut bus = setup();
        bus.io_write_u32(PCI_CONFIG_ADDRESS, config_address(0, 0, 0));
        bus.io_write_u8(PCI_CONFIG_ADDRESS, 0x00);
        assert_eq!(bus.io_read_u32(PCI_CONFIG_ADDRESS), config_address(0, 0, 0));
        assert_eq!(bus.io_read_u8(PCI_CONFIG_ADDRESS), 0xFF);
    }

    #[test]
    fn test_config_write_through_data_port() {
        let mut bus = setup();
        bus.io_write_u32(PCI_CONFIG_ADDRESS, config_address(0, 0, 0x40));
        bus.io_write_u8(PCI_CONFIG_DATA + 1, 0x5A);
        assert_eq!(bus.pci_config_read(PciAddress::new(0, 0), 0x41, crate::bus::AccessWidth::Byte), 0x5A);
    }
}
