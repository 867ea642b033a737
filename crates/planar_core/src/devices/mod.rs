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

//! Device catalog.
//!
//! [DeviceKind] names the devices a machine definition can attach. Each kind is a
//! [DeviceFactory] that builds a fresh device from a [DeviceConfig].

use serde_derive::Deserialize;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    bus::{Device, RegionDescriptor, RegionKind, IO_ADDRESS_LIMIT},
    error::BusError,
    registry::{DeviceConfig, DeviceFactory, DeviceRole},
};

pub mod pci_host;
pub mod pci_isa;
pub mod post_card;
pub mod ram;
pub mod reserved;
pub mod rom;

pub const INTEL_VENDOR_ID: u16 = 0x8086;
pub const I430FX_TSC_DEVICE_ID: u16 = 0x122D;
pub const PIIX_ISA_DEVICE_ID: u16 = 0x122E;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    Ram,
    PostCard,
    PciHostBridge,
    PciIsaBridge,
    Reserved,
}

impl DeviceFactory for DeviceKind {
    fn name(&self) -> String {
        self.to_string()
    }

    fn default_role(&self) -> Option<DeviceRole> {
        match self {
            DeviceKind::Ram => Some(DeviceRole::Memory),
            DeviceKind::PostCard => Some(DeviceRole::Diagnostic),
            DeviceKind::PciHostBridge => Some(DeviceRole::HostBridge),
            DeviceKind::PciIsaBridge => Some(DeviceRole::IsaBridge),
            DeviceKind::Reserved => Some(DeviceRole::Reserved),
        }
    }

    fn create(&self, config: &DeviceConfig) -> Result<Box<dyn Device>, BusError> {
        let invalid = |reason: &str| BusError::InvalidConfig {
            device: self.to_string(),
            reason: reason.to_string(),
        };

        let device: Box<dyn Device> = match self {
            DeviceKind::Ram => {
                let size = config.size.ok_or_else(|| invalid("RAM size not specified"))?;
                if size == 0 || size > ram::MAX_RAM_SIZE {
                    return Err(invalid("RAM size out of range"));
                }
                Box::new(ram::SystemRam::new(size as usize))
            }
            DeviceKind::PostCard => Box::new(post_card::PostCard::new(
                config.io_base.unwrap_or(post_card::POST_CARD_DEFAULT_PORT),
            )),
            DeviceKind::PciHostBridge => Box::new(pci_host::PciHostBridge::new(INTEL_VENDOR_ID, I430FX_TSC_DEVICE_ID)),
            DeviceKind::PciIsaBridge => {
                let slot = config
                    .pci_slot
                    .ok_or_else(|| invalid("PCI-ISA bridge needs a PCI slot"))?;
                Box::new(pci_isa::PciIsaBridge::new(slot, INTEL_VENDOR_ID, PIIX_ISA_DEVICE_ID))
            }
            DeviceKind::Reserved => {
                let size = config.size.ok_or_else(|| invalid("reserved range needs a size"))?;
                let region = match (config.io_base, config.mem_base) {
                    (Some(_), None) if size > IO_ADDRESS_LIMIT => {
                        return Err(invalid("reserved I/O range is larger than the port space"))
                    }
                    (Some(port), None) => RegionDescriptor::new(RegionKind::Io, port as u64, size),
                    (None, Some(base)) => RegionDescriptor::new(RegionKind::Mmio, base, size),
                    _ => return Err(invalid("reserved range needs exactly one of io_base or mem_base")),
                };
                let name = config.label.clone().unwrap_or_else(|| String::from("Reserved"));
                Box::new(reserved::ReservedRange::new(&name, region))
            }
        };
        Ok(device)
    }
}
