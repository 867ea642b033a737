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

//! A POST diagnostic card.
//!
//! Latches the last byte written to its port and keeps a short history of codes. BIOSes write
//! progress codes to port 0x80 during power-on self test.

use std::{any::Any, collections::VecDeque};

use crate::bus::{BusAccess, BusInterface, Device, IoDevice, MemoryMappedDevice, RegionDescriptor};

pub const POST_CARD_DEFAULT_PORT: u16 = 0x80;
const POST_HISTORY_LEN: usize = 64;

pub struct PostCard {
    port: u16,
    last: Option<u8>,
    history: VecDeque<u8>,
}

impl PostCard {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            last: None,
            history: VecDeque::with_capacity(POST_HISTORY_LEN),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn last_code(&self) -> Option<u8> {
        self.last
    }

    pub fn history(&self) -> impl Iterator<Item = &u8> {
        self.history.iter()
    }
}

impl IoDevice for PostCard {
    fn io_read(&mut self, access: &BusAccess, bus: &mut BusInterface) -> u64 {
        match self.last {
            Some(code) => code as u64,
            None => bus.open_bus_value(access.width),
        }
    }

    fn io_write(&mut self, _access: &BusAccess, value: u64, _bus: &mut BusInterface) {
        let code = value as u8;
        log::debug!("POST code [{:02X}]: {:02X}", self.port, code);
        self.last = Some(code);
        if self.history.len() == POST_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(code);
    }
}

impl MemoryMappedDevice for PostCard {}

impl Device for PostCard {
    fn name(&self) -> String {
        String::from("POST Card")
    }

    fn mapping(&self) -> Vec<RegionDescriptor> {
        vec![RegionDescriptor::ports(self.port, 1)]
    }

    fn reset(&mut self) {
        self.last = None;
        self.history.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
