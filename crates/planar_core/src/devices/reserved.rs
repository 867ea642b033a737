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

//! Reserves a port or memory range for a peripheral that is not emulated.
//!
//! Reads float, writes are dropped. Holding the range keeps other devices from being attached
//! over hardware the machine is supposed to have.

use std::any::Any;

use crate::bus::{BusAccess, BusInterface, Device, IoDevice, MemoryMappedDevice, RegionDescriptor};

pub struct ReservedRange {
    name: String,
    region: RegionDescriptor,
}

impl ReservedRange {
    pub fn new(name: &str, region: RegionDescriptor) -> Self {
        Self {
            name: name.to_string(),
            region,
        }
    }
}

impl IoDevice for ReservedRange {
    fn io_write(&mut self, access: &BusAccess, value: u64, _bus: &mut BusInterface) {
        log::trace!("{}: write {:#X} to port {:#X} dropped", self.name, value, access.address);
    }
}

impl MemoryMappedDevice for ReservedRange {
    fn mmio_write(&mut self, access: &BusAccess, value: u64, _bus: &mut BusInterface) {
        log::trace!("{}: write {:#X} to {:#X} dropped", self.name, value, access.address);
    }
}

impl Device for ReservedRange {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn mapping(&self) -> Vec<RegionDescriptor> {
        vec![self.region.clone()]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
