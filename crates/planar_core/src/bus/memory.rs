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

//! Memory access routines for [BusInterface].

use crate::bus::{AccessWidth, AddressSpace, BusInterface};

impl BusInterface {
    /// Read `width` bytes at `address`. Unmapped bytes read as the open bus byte.
    pub fn read(&mut self, address: u64, width: AccessWidth) -> u64 {
        self.dispatch_read(AddressSpace::Memory, address, width)
    }

    pub fn write(&mut self, address: u64, width: AccessWidth, value: u64) {
        self.dispatch_write(AddressSpace::Memory, address, width, value)
    }

    pub fn read_u8(&mut self, address: u64) -> u8 {
        self.read(address, AccessWidth::Byte) as u8
    }

    pub fn read_u16(&mut self, address: u64) -> u16 {
        self.read(address, AccessWidth::Word) as u16
    }

    pub fn read_u32(&mut self, address: u64) -> u32 {
        self.read(address, AccessWidth::Dword) as u32
    }

    pub fn read_u64(&mut self, address: u64) -> u64 {
        self.read(address, AccessWidth::Qword)
    }

    pub fn write_u8(&mut self, address: u64, value: u8) {
        self.write(address, AccessWidth::Byte, value as u64)
    }

    pub fn write_u16(&mut self, address: u64, value: u16) {
        self.write(address, AccessWidth::Word, value as u64)
    }

    pub fn write_u32(&mut self, address: u64, value: u32) {
        self.write(address, AccessWidth::Dword, value as u64)
    }

    pub fn write_u64(&mut self, address: u64, value: u64) {
        self.write(address, AccessWidth::Qword, value)
    }

    /// Peek at a byte without side effects.
    pub fn peek_u8(&self, address: u64) -> u8 {
        self.dispatch_peek(AddressSpace::Memory, address, AccessWidth::Byte) as u8
    }

    /// Fill `buf` from memory starting at `address` without side effects.
    pub fn peek_range(&self, address: u64, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = match address.checked_add(i as u64) {
                Some(address) => self.peek_u8(address),
                None => self.open_bus_value(AccessWidth::Byte) as u8,
            };
        }
    }
}
