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

//! IO routines for [BusInterface].

use crate::bus::{AccessWidth, AddressSpace, BusInterface};

impl BusInterface {
    /// Read `width` bytes from an IO port. Unconnected ports read as [NO_IO_BYTE](crate::bus::NO_IO_BYTE).
    pub fn io_read(&mut self, port: u16, width: AccessWidth) -> u32 {
        self.dispatch_read(AddressSpace::Io, port as u64, width) as u32
    }

    pub fn io_write(&mut self, port: u16, width: AccessWidth, value: u32) {
        self.dispatch_write(AddressSpace::Io, port as u64, width, value as u64)
    }

    pub fn io_read_u8(&mut self, port: u16) -> u8 {
        self.io_read(port, AccessWidth::Byte) as u8
    }

    pub fn io_read_u16(&mut self, port: u16) -> u16 {
        self.io_read(port, AccessWidth::Word) as u16
    }

    pub fn io_read_u32(&mut self, port: u16) -> u32 {
        self.io_read(port, AccessWidth::Dword)
    }

    pub fn io_write_u8(&mut self, port: u16, value: u8) {
        self.io_write(port, AccessWidth::Byte, value as u32)
    }

    pub fn io_write_u16(&mut self, port: u16, value: u16) {
        self.io_write(port, AccessWidth::Word, value as u32)
    }

    pub fn io_write_u32(&mut self, port: u16, value: u32) {
        self.io_write(port, AccessWidth::Dword, value)
    }
}
