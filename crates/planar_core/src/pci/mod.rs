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

//! PCI configuration-space engine.
//!
//! Planar models a single PCI bus. Slots are registered by the machine composer with their
//! interrupt wiring, devices present one or more functions in a slot, and the engine keeps each
//! function's 256-byte configuration space. Writes to Base Address Registers and the Command
//! register are turned into region changes on the address router by
//! [BusInterface::pci_config_write](crate::bus::BusInterface::pci_config_write).

use serde_derive::Deserialize;
use strum_macros::{Display, EnumIter, EnumString};

pub mod bus;
pub mod config;
pub mod routing;

pub use bus::{PciBus, PciFunction, PciFunctionState};
pub use config::*;
pub use routing::*;

pub const PCI_MAX_SLOTS: u8 = 32;
pub const PCI_MAX_FUNCTIONS: u8 = 8;
pub const PCI_MAX_BARS: usize = 6;
pub const PCI_CONFIG_SPACE_SIZE: usize = 256;

/// Slot/function address of a function on the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PciAddress {
    pub slot: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(slot: u8, function: u8) -> Self {
        Self { slot, function }
    }
}

impl std::fmt::Display for PciAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "00:{:02X}.{}", self.slot, self.function)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Display, EnumString, EnumIter)]
pub enum PciInterruptPin {
    #[serde(rename = "inta")]
    #[strum(serialize = "INTA#")]
    IntA,
    #[serde(rename = "intb")]
    #[strum(serialize = "INTB#")]
    IntB,
    #[serde(rename = "intc")]
    #[strum(serialize = "INTC#")]
    IntC,
    #[serde(rename = "intd")]
    #[strum(serialize = "INTD#")]
    IntD,
}

impl PciInterruptPin {
    pub const ALL: [PciInterruptPin; 4] = [
        PciInterruptPin::IntA,
        PciInterruptPin::IntB,
        PciInterruptPin::IntC,
        PciInterruptPin::IntD,
    ];

    pub fn index(self) -> usize {
        match self {
            PciInterruptPin::IntA => 0,
            PciInterruptPin::IntB => 1,
            PciInterruptPin::IntC => 2,
            PciInterruptPin::IntD => 3,
        }
    }

    /// Value of the Interrupt Pin register for this pin.
    pub fn to_config_u8(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn from_config_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PciInterruptPin::IntA),
            2 => Some(PciInterruptPin::IntB),
            3 => Some(PciInterruptPin::IntC),
            4 => Some(PciInterruptPin::IntD),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PciSlotKind {
    Northbridge,
    Southbridge,
    Normal,
    Video,
}

/// A registered slot and the interrupt line each of its pins is wired to. Line 0 means the pin
/// is not connected.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct PciSlot {
    pub slot: u8,
    pub kind: PciSlotKind,
    pub pins: [u8; 4],
}

impl PciSlot {
    pub fn new(slot: u8, kind: PciSlotKind, pins: [u8; 4]) -> Self {
        Self { slot, kind, pins }
    }

    pub fn line_for(&self, pin: PciInterruptPin) -> u8 {
        self.pins[pin.index()]
    }
}

/// Region tag used for BAR mappings: function in the high byte, BAR index in the low byte.
pub fn bar_tag(function: u8, bar: u8) -> u16 {
    ((function as u16) << 8) | bar as u16
}

pub fn split_bar_tag(tag: u16) -> (u8, u8) {
    ((tag >> 8) as u8, tag as u8)
}
