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

//! PCI configuration access for [BusInterface].
//!
//! Configuration writes are applied to the function's registers first. If they moved a BAR or
//! changed which address spaces the function decodes, the function's BAR regions are brought
//! in line with the registers, and finally the owning device is told about the write.

use crate::{
    bus::{AccessWidth, BusInterface},
    error::BusError,
    pci::{PciAddress, PciInterruptPin, PciSlot, PCI_MAX_BARS},
};

impl BusInterface {
    pub fn pci_config_read(&self, address: PciAddress, offset: u8, width: AccessWidth) -> u32 {
        self.pci.read_config(address, offset, width)
    }

    pub fn pci_config_write(&mut self, address: PciAddress, offset: u8, width: AccessWidth, value: u32) {
        let Some((owner, effects)) = self.pci.write_config(address, offset, width, value)
        else {
            return;
        };

        if effects.command.is_some() {
            for index in 0..PCI_MAX_BARS {
                self.sync_bar(address, index);
            }
        }
        else {
            for relocation in &effects.bars {
                self.sync_bar(address, relocation.index as usize);
            }
        }

        match self.devices.checkout(owner) {
            Some(mut device) => {
                device.pci_config_write(address.function, offset, width, value, self);
                self.devices.checkin(owner, device);
            }
            None => {
                log::warn!(
                    "Re-entrant PCI config write of {:#X} to {} offset {:#04X} by {}: device not notified",
                    value,
                    address,
                    offset,
                    self.devices.name_of(owner)
                );
            }
        }
    }

    pub fn register_pci_slot(&mut self, slot: PciSlot) -> Result<(), BusError> {
        self.pci.register_slot(slot)
    }

    pub fn set_pirq_route(&mut self, line: u8, irq: Option<u8>) -> Result<(), BusError> {
        self.pci.set_pirq_route(line, irq)
    }

    pub fn pci_irq_for(&self, slot: u8, pin: PciInterruptPin) -> Option<u8> {
        self.pci.irq_for(slot, pin)
    }

    /// Bring the router in line with what BAR `index` of `address` should decode.
    fn sync_bar(&mut self, address: PciAddress, index: usize) {
        let Some(function) = self.pci.function(address)
        else {
            return;
        };
        let owner = function.owner;
        let current = function.bar_region(index);
        let desired = function.desired_bar_region(index);

        let mapped = match (current, desired) {
            (None, None) => return,
            (Some(id), None) => {
                _ = self.router.unregister(id);
                None
            }
            (None, Some(desc)) => match self.router.register(owner, desc) {
                Ok(id) => Some(id),
                Err(e) => {
                    log::error!("PCI {} BAR{} could not be mapped: {}", address, index, e);
                    None
                }
            },
            (Some(id), Some(desc)) => {
                let moved = self.router.region(id).map(|r| r.base()) != Some(desc.base);
                if moved {
                    if let Err(e) = self.router.remap(id, desc.base) {
                        log::error!("PCI {} BAR{} could not be relocated: {}", address, index, e);
                    }
                }
                Some(id)
            }
        };

        if let Some(function) = self.pci.function_mut(address) {
            function.set_bar_region(index, mapped);
        }
    }
}
