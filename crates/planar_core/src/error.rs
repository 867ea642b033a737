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

//! Construction-time error taxonomy for the bus, device registry and PCI engine.
//!
//! None of these are raised by runtime dispatch. A read or write that cannot be routed simply
//! sees open bus.

use std::path::PathBuf;

use thiserror::Error;

use crate::{
    bus::{AddressSpace, RegionId},
    pci::{PciInterruptPin, PciSlotKind},
    registry::DeviceHandle,
};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("{space} region {base:#X}..{end:#X} overlaps region {existing} owned by {holder}")]
    Overlap {
        space: AddressSpace,
        base: u64,
        end: u64,
        existing: RegionId,
        holder: DeviceHandle,
    },
    #[error("device '{device}' cannot claim {space} {base:#X}..{end:#X}: already claimed by '{holder}'")]
    ResourceConflict {
        device: String,
        space: AddressSpace,
        base: u64,
        end: u64,
        holder: String,
    },
    #[error("PCI slot {0:#04X} is already registered")]
    DuplicateSlot(u8),
    #[error("a {kind} slot is already registered at slot {existing:#04X}")]
    DuplicateBridge { kind: PciSlotKind, existing: u8 },
    #[error("PCI slot {slot:#04X} pin {pin} routes to line {line}, but only {lines} lines are exposed")]
    InvalidRouting {
        slot: u8,
        pin: PciInterruptPin,
        line: u8,
        lines: u8,
    },
    #[error("PIRQ line {line} cannot be steered to IRQ {irq}")]
    InvalidPirqRoute { line: u8, irq: u8 },
    #[error("PCI slot number {0} is out of range")]
    InvalidSlot(u8),
    #[error("PCI slot {0:#04X} has not been registered")]
    SlotNotRegistered(u8),
    #[error("PCI function {slot:#04X}.{function} is already in use")]
    FunctionInUse { slot: u8, function: u8 },
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("invalid configuration for '{device}': {reason}")]
    InvalidConfig { device: String, reason: String },
    #[error("no such region: {0}")]
    UnknownRegion(RegionId),
    #[error("no such device: {0}")]
    UnknownDevice(DeviceHandle),
    #[error("failed to read ROM image '{path}': {source}")]
    RomLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid ROM image: {0}")]
    RomImage(String),
}
