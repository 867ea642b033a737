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

//! PCI-to-ISA bridge.
//!
//! Presents the southbridge function and its PIRQ route control registers (0x60-0x63, one per
//! PIRQ line). Bit 7 of a route register disconnects the line; otherwise the low nibble names
//! the ISA IRQ the line is steered to. The registers power up holding the board's default
//! steering.

use std::any::Any;

use crate::{
    bus::{AccessWidth, BusInterface, Device, IoDevice, MemoryMappedDevice, RegionDescriptor},
    pci::{decode_pirq_route, PciAddress, PciFunctionDescriptor, PIRQ_ROUTE_DISABLE},
};

pub const PIRQ_ROUTE_BASE: u8 = 0x60;
pub const PIRQ_ROUTE_COUNT: u8 = 4;

pub struct PciIsaBridge {
    slot: u8,
    vendor_id: u16,
    device_id: u16,
}

impl PciIsaBridge {
    pub fn new(slot: u8, vendor_id: u16, device_id: u16) -> Self {
        Self {
            slot,
            vendor_id,
            device_id,
        }
    }
}

impl IoDevice for PciIsaBridge {}
impl MemoryMappedDevice for PciIsaBridge {}

impl Device for PciIsaBridge {
    fn name(&self) -> String {
        String::from("PCI-ISA Bridge")
    }

    fn mapping(&self) -> Vec<RegionDescriptor> {
        Vec::new()
    }

    fn pci_functions(&self) -> Vec<PciFunctionDescriptor> {
        let mut function = PciFunctionDescriptor::new(0, self.vendor_id, self.device_id)
            .with_class(0x06, 0x01, 0x00)
            .with_pirq_route_registers(PIRQ_ROUTE_BASE, PIRQ_ROUTE_COUNT);
        for i in 0..PIRQ_ROUTE_COUNT {
            function = function.with_default(PIRQ_ROUTE_BASE + i, PIRQ_ROUTE_DISABLE);
        }
        vec![function]
    }

    fn pci_config_write(&mut self, function: u8, offset: u8, width: AccessWidth, _value: u32, bus: &mut BusInterface) {
        if function != 0 {
            return;
        }
        let end = offset as u16 + width.bytes() as u16;
        let routes = PIRQ_ROUTE_BASE as u16..(PIRQ_ROUTE_BASE + PIRQ_ROUTE_COUNT) as u16;
        for register in (offset as u16..end).filter(|r| routes.contains(r)) {
            let address = PciAddress::new(self.slot, 0);
            let value = bus.pci_config_read(address, register as u8, AccessWidth::Byte) as u8;
            let line = (register - PIRQ_ROUTE_BASE as u16) as u8 + 1;
            let irq = decode_pirq_route(value);
            if line > bus.pci().routing().lines() {
                continue;
            }
            log::debug!("PIRQ line {} steered to {:?}", line, irq);
            if let Err(e) = bus.set_pirq_route(line, irq) {
                log::warn!("Ignoring PIRQ route write: {}", e);
            }
        }
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
        pci::{PciInterruptPin, PciSlot, PciSlotKind, PCI_INTERRUPT_LINE},
        registry::DeviceConfig,
    };

    #[test]
    fn test_decode_route() {
        assert_eq!(decode_pirq_route(0x80), None);
        assert_eq!(decode_pirq_route(0x0B), Some(11));
        assert_eq!(decode_pirq_route(0x08), None);
        assert_eq!(decode_pirq_route(0x02), None);
    }

    #[test]
    fn test_route_register_steers_line() {
        let mut bus = BusInterface::default();
        bus.register_pci_slot(PciSlot::new(7, PciSlotKind::Southbridge, [0; 4]))
            .unwrap();
        bus.register_pci_slot(PciSlot::new(0x0D, PciSlotKind::Normal, [1, 2, 3, 4]))
            .unwrap();
        bus.attach_device(Box::new(PciIsaBridge::new(7, 0x8086, 0x122E)), DeviceConfig::new().with_pci_slot(7))
            .unwrap();

        let sb = PciAddress::new(7, 0);
        assert_eq!(bus.pci_config_read(sb, 0x60, AccessWidth::Dword), 0x8080_8080);

        // Steer PIRQ1 to IRQ 11 and PIRQ2 to IRQ 10 with one dword write.
        bus.pci_config_write(sb, 0x60, AccessWidth::Dword, 0x8080_0A0B);
        assert_eq!(bus.pci().routing().pirq_route(1), Some(11));
        assert_eq!(bus.pci().routing().pirq_route(2), Some(10));
        assert_eq!(bus.pci().isa_irq_for(0x0D, PciInterruptPin::IntB), Some(10));

        bus.pci_config_write(sb, 0x60, AccessWidth::Byte, 0x80);
        assert_eq!(bus.pci().routing().pirq_route(1), None);
        assert_eq!(bus.pci_config_read(sb, PCI_INTERRUPT_LINE, AccessWidth::Byte), 0xFF);
    }

    fn board_with_default_routes() -> (BusInterface, PciAddress) {
        let mut bus = BusInterface::default();
        bus.register_pci_slot(PciSlot::new(7, PciSlotKind::Southbridge, [0; 4]))
            .unwrap();
        bus.pci_mut().set_default_pirq_route(1, Some(11)).unwrap();
        bus.attach_device(Box::new(PciIsaBridge::new(7, 0x8086, 0x122E)), DeviceConfig::new().with_pci_slot(7))
            .unwrap();
        bus.pci_mut().set_default_pirq_route(2, Some(10)).unwrap();
        (bus, PciAddress::new(7, 0))
    }

    #[test]
    fn test_route_registers_hold_default_steering() {
        // Defaults set both before and after the bridge is attached show up in its registers.
        let (bus, sb) = board_with_default_routes();
        assert_eq!(bus.pci_config_read(sb, 0x60, AccessWidth::Dword), 0x8080_0A0B);
        for line in 1..=PIRQ_ROUTE_COUNT {
            let register = bus.pci_config_read(sb, PIRQ_ROUTE_BASE + line - 1, AccessWidth::Byte) as u8;
            assert_eq!(decode_pirq_route(register), bus.pci().routing().pirq_route(line));
        }
    }

    #[test]
    fn test_read_modify_write_keeps_other_lines() {
        let (mut bus, sb) = board_with_default_routes();

        // Move PIRQ2 to IRQ 9 without touching the other route registers.
        let reg = bus.pci_config_read(sb, 0x60, AccessWidth::Dword);
        bus.pci_config_write(sb, 0x60, AccessWidth::Dword, (reg & 0xFFFF_00FF) | 0x0900);
        assert_eq!(bus.pci().routing().pirq_route(1), Some(11));
        assert_eq!(bus.pci().routing().pirq_route(2), Some(9));
        assert_eq!(bus.pci_config_read(sb, 0x61, AccessWidth::Byte), 0x09);
    }

    #[test]
    fn test_reset_restores_registers_and_steering() {
        let (mut bus, sb) = board_with_default_routes();
        bus.pci_config_write(sb, 0x60, AccessWidth::Word, 0x8080);
        assert_eq!(bus.pci().routing().pirq_route(1), None);

        bus.reset();
        assert_eq!(bus.pci().routing().pirq_route(1), Some(11));
        assert_eq!(bus.pci().routing().pirq_route(2), Some(10));
        assert_eq!(bus.pci_config_read(sb, 0x60, AccessWidth::Word), 0x0A0B);
    }

    #[test]
    fn test_runtime_steering_updates_register() {
        let (mut bus, sb) = board_with_default_routes();
        bus.set_pirq_route(3, Some(5)).unwrap();
        assert_eq!(bus.pci_config_read(sb, 0x62, AccessWidth::Byte), 0x05);

        // A value that decodes to the current steering is left as written.
        bus.pci_config_write(sb, 0x63, AccessWidth::Byte, 0x88);
        assert_eq!(bus.pci().routing().pirq_route(4), None);
        assert_eq!(bus.pci_config_read(sb, 0x63, AccessWidth::Byte), 0x88);
    }
}
