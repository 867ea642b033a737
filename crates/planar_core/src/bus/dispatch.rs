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

//! Width-aware dispatch of bus accesses to devices.
//!
//! An access is delivered to a device in one call when every byte of it falls in a single
//! span of the address map and the owning region accepts the access width. Otherwise it is
//! split in half, low half first, until each piece can be delivered or has shrunk to a single
//! unmapped byte, which reads as open bus. Results are assembled little-endian. Bytes past the
//! end of the address space read as open bus and ignore writes.

use crate::{
    bus::{AccessWidth, AddressSpace, BusAccess, BusInterface},
    registry::DeviceHandle,
};

impl BusInterface {
    pub(crate) fn dispatch_read(&mut self, space: AddressSpace, address: u64, width: AccessWidth) -> u64 {
        if let Some((owner, access)) = self.route(space, address, width) {
            return self.call_read(space, owner, &access);
        }
        match width.half() {
            Some(half) => {
                let lo = self.dispatch_read(space, address, half);
                let hi = match address.checked_add(half.bytes() as u64) {
                    Some(next) => self.dispatch_read(space, next, half),
                    None => self.open_bus_value(half),
                };
                lo | (hi << (half.bytes() as u32 * 8))
            }
            None => self.open_bus_value(width),
        }
    }

    pub(crate) fn dispatch_write(&mut self, space: AddressSpace, address: u64, width: AccessWidth, value: u64) {
        if let Some((owner, access)) = self.route(space, address, width) {
            self.call_write(space, owner, &access, value & width.mask());
            return;
        }
        if let Some(half) = width.half() {
            let shift = half.bytes() as u32 * 8;
            self.dispatch_write(space, address, half, value & half.mask());
            if let Some(next) = address.checked_add(half.bytes() as u64) {
                self.dispatch_write(space, next, half, (value >> shift) & half.mask());
            }
        }
    }

    /// Side-effect free read for debug views. Devices that cannot peek read as open bus.
    pub(crate) fn dispatch_peek(&self, space: AddressSpace, address: u64, width: AccessWidth) -> u64 {
        if let Some((owner, access)) = self.route(space, address, width) {
            return self
                .devices
                .resolve(owner)
                .and_then(|d| d.mmio_peek(&access))
                .map(|v| v & width.mask())
                .unwrap_or_else(|| self.open_bus_value(width));
        }
        match width.half() {
            Some(half) => {
                let lo = self.dispatch_peek(space, address, half);
                let hi = match address.checked_add(half.bytes() as u64) {
                    Some(next) => self.dispatch_peek(space, next, half),
                    None => self.open_bus_value(half),
                };
                lo | (hi << (half.bytes() as u32 * 8))
            }
            None => self.open_bus_value(width),
        }
    }

    /// Resolve an access that can be delivered in a single call.
    fn route(&self, space: AddressSpace, address: u64, width: AccessWidth) -> Option<(DeviceHandle, BusAccess)> {
        if address >= space.limit() {
            return None;
        }
        let (region, span_end) = self.router.resolve(space, address)?;
        let end = address.checked_add(width.bytes() as u64)?;
        if end > span_end || !region.desc.widths.accepts(width) {
            return None;
        }
        Some((
            region.owner,
            BusAccess {
                region: region.id,
                tag: region.desc.tag,
                address,
                offset: region.desc.device_offset + (address - region.desc.base),
                width,
            },
        ))
    }

    fn call_read(&mut self, space: AddressSpace, owner: DeviceHandle, access: &BusAccess) -> u64 {
        match self.devices.checkout(owner) {
            Some(mut device) => {
                let value = match space {
                    AddressSpace::Memory => device.mmio_read(access, self),
                    AddressSpace::Io => device.io_read(access, self),
                };
                self.devices.checkin(owner, device);
                value & access.width.mask()
            }
            None => {
                log::warn!(
                    "Re-entrant {} read of {:#X} by {}: returning open bus",
                    space,
                    access.address,
                    self.devices.name_of(owner)
                );
                self.open_bus_value(access.width)
            }
        }
    }

    fn call_write(&mut self, space: AddressSpace, owner: DeviceHandle, access: &BusAccess, value: u64) {
        match self.devices.checkout(owner) {
            Some(mut device) => {
                match space {
                    AddressSpace::Memory => device.mmio_write(access, value, self),
                    AddressSpace::Io => device.io_write(access, value, self),
                }
                self.devices.checkin(owner, device);
            }
            None => {
                log::warn!(
                    "Re-entrant {} write of {:#X} to {:#X} by {}: dropped",
                    space,
                    value,
                    access.address,
                    self.devices.name_of(owner)
                );
            }
        }
    }
}
