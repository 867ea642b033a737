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

//! Data-driven machine definitions.
//!
//! A machine definition file holds one or more `[[machine]]` tables. Each machine lists its
//! construction steps in order as `[[machine.step]]` tables tagged by `op`:
//!
//! ```toml
//! [[machine]]
//! name = "example_at"
//! ram_kb = 1024
//!
//! [[machine.step]]
//! op = "attach"
//! device = "ram"
//!
//! [[machine.step]]
//! op = "rom"
//! files = ["bios_even.bin", "bios_odd.bin"]
//! layout = "interleaved"
//! base = 0xF0000
//! length = 0x10000
//! ```

use std::path::PathBuf;

use serde_derive::Deserialize;

use crate::{
    devices::DeviceKind,
    machine::{MachineTopology, TopologyOp},
    machine_types::{FdcMode, TopologyCondition, VideoSelection},
    pci::{PciSlot, PciSlotKind, SlotRotation, PCI_DEFAULT_PIRQ_LINES},
    registry::DeviceConfig,
    rom::RomLoad,
};

/// Options chosen when a machine is selected. These are not part of a machine's definition.
#[derive(Clone, Debug)]
pub struct MachineConfig {
    pub ram_kb: u32,
    pub video: VideoSelection,
    pub fdc: FdcMode,
    pub open_bus_byte: Option<u8>,
    pub rom_dir: PathBuf,
    pub load_roms: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_kb: 640,
            video: VideoSelection::Internal,
            fdc: FdcMode::Internal,
            open_bus_byte: None,
            rom_dir: PathBuf::from("."),
            load_roms: true,
        }
    }
}

impl MachineConfig {
    pub fn satisfies(&self, condition: TopologyCondition) -> bool {
        match condition {
            TopologyCondition::InternalVideo => self.video == VideoSelection::Internal,
            TopologyCondition::InternalFdc => self.fdc == FdcMode::Internal,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MachineDefinitionFile {
    #[serde(default)]
    pub machine: Vec<MachineDefinition>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MachineDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Default RAM size, used when the selection does not specify one.
    pub ram_kb: Option<u32>,
    #[serde(default = "default_pirq_lines")]
    pub pirq_lines: u8,
    pub open_bus_byte: Option<u8>,
    #[serde(default)]
    pub step: Vec<TopologyStep>,
}

fn default_pirq_lines() -> u8 {
    PCI_DEFAULT_PIRQ_LINES
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TopologyStep {
    Attach {
        device: DeviceKind,
        when: Option<TopologyCondition>,
        #[serde(default)]
        config: DeviceConfig,
    },
    Slot {
        slot: u8,
        kind: PciSlotKind,
        pins: [u8; 4],
    },
    SlotRotation(SlotRotation),
    Rom(RomLoad),
    RemapTop {
        kb: u32,
    },
    PirqRoute {
        line: u8,
        irq: u8,
    },
}

impl MachineDefinition {
    /// Turn the definition into a topology the builder can run.
    pub fn topology(&self) -> MachineTopology {
        let mut topology = MachineTopology::new(&self.name).with_pirq_lines(self.pirq_lines);
        if let Some(byte) = self.open_bus_byte {
            topology = topology.with_open_bus_byte(byte);
        }
        for step in &self.step {
            topology = match step {
                TopologyStep::Attach { device, when, config } => topology.push(TopologyOp::Attach {
                    factory: Box::new(*device),
                    config: config.clone(),
                    when: *when,
                }),
                TopologyStep::Slot { slot, kind, pins } => topology.slot(PciSlot::new(*slot, *kind, *pins)),
                TopologyStep::SlotRotation(rotation) => topology.slot_rotation(*rotation),
                TopologyStep::Rom(rom) => topology.rom(rom.clone()),
                TopologyStep::RemapTop { kb } => topology.remap_top(*kb),
                TopologyStep::PirqRoute { line, irq } => topology.pirq_route(*line, *irq),
            };
        }
        topology
    }
}
