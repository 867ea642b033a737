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

//! The machine composer.
//!
//! A [MachineTopology] is an ordered list of construction steps. [MachineBuilder] runs those
//! steps against a fresh [BusInterface]; the first failing step aborts the build and the
//! partially built bus is dropped, so a failed build leaves nothing behind. [MachineManager]
//! holds the known machine definitions and the currently running machine.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use thiserror::Error;

use crate::{
    bus::{AddressSpace, BusInterface, MapEntry, OPEN_BUS_BYTE},
    devices::{ram::SystemRam, rom::RomDevice},
    error::BusError,
    machine_config::{MachineConfig, MachineDefinition},
    machine_types::TopologyCondition,
    pci::{PciSlot, SlotRotation, PCI_DEFAULT_PIRQ_LINES},
    registry::{DeviceConfig, DeviceFactory, DeviceRole},
    rom::RomLoad,
};

pub enum TopologyOp {
    Attach {
        factory: Box<dyn DeviceFactory>,
        config: DeviceConfig,
        when: Option<TopologyCondition>,
    },
    RegisterSlot(PciSlot),
    LoadRom(RomLoad),
    RemapTop {
        kb: u32,
    },
    PirqRoute {
        line: u8,
        irq: u8,
    },
}

impl fmt::Display for TopologyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyOp::Attach { factory, config, .. } => {
                write!(f, "attach {}", factory.name())?;
                if config.instance > 0 {
                    write!(f, " #{}", config.instance)?;
                }
                Ok(())
            }
            TopologyOp::RegisterSlot(slot) => write!(f, "register {} slot {:02X}", slot.kind, slot.slot),
            TopologyOp::LoadRom(rom) => write!(f, "load {} ROM at {:#X}", rom.layout, rom.base),
            TopologyOp::RemapTop { kb } => write!(f, "remap {}K to top of memory", kb),
            TopologyOp::PirqRoute { line, irq } => write!(f, "route PIRQ{} to IRQ {}", line, irq),
        }
    }
}

/// A machine's construction steps, in the order they run.
pub struct MachineTopology {
    name: String,
    pirq_lines: u8,
    open_bus_byte: Option<u8>,
    ops: Vec<TopologyOp>,
}

impl MachineTopology {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pirq_lines: PCI_DEFAULT_PIRQ_LINES,
            open_bus_byte: None,
            ops: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ops(&self) -> &[TopologyOp] {
        &self.ops
    }

    pub fn with_pirq_lines(mut self, lines: u8) -> Self {
        self.pirq_lines = lines;
        self
    }

    pub fn with_open_bus_byte(mut self, byte: u8) -> Self {
        self.open_bus_byte = Some(byte);
        self
    }

    pub fn push(mut self, op: TopologyOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn attach(self, factory: impl DeviceFactory + 'static, config: DeviceConfig) -> Self {
        self.push(TopologyOp::Attach {
            factory: Box::new(factory),
            config,
            when: None,
        })
    }

    pub fn attach_when(self, condition: TopologyCondition, factory: impl DeviceFactory + 'static, config: DeviceConfig) -> Self {
        self.push(TopologyOp::Attach {
            factory: Box::new(factory),
            config,
            when: Some(condition),
        })
    }

    pub fn slot(self, slot: PciSlot) -> Self {
        self.push(TopologyOp::RegisterSlot(slot))
    }

    /// Register a run of slots with rotating interrupt wiring.
    pub fn slot_rotation(self, rotation: SlotRotation) -> Self {
        rotation.slots().into_iter().fold(self, |t, slot| t.slot(slot))
    }

    pub fn rom(self, rom: RomLoad) -> Self {
        self.push(TopologyOp::LoadRom(rom))
    }

    pub fn remap_top(self, kb: u32) -> Self {
        self.push(TopologyOp::RemapTop { kb })
    }

    pub fn pirq_route(self, line: u8, irq: u8) -> Self {
        self.push(TopologyOp::PirqRoute { line, irq })
    }
}

#[derive(Debug, Error)]
#[error("machine '{machine}' failed at step {step} ({op}): {source}")]
pub struct BuildError {
    pub machine: String,
    pub step: usize,
    pub op: String,
    #[source]
    pub source: BusError,
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("no machine definition named '{0}'")]
    UnknownMachine(String),
    #[error("duplicate machine name: {0}")]
    DuplicateMachine(String),
    #[error(transparent)]
    Build(#[from] BuildError),
}

pub struct MachineBuilder<'a> {
    topology: &'a MachineTopology,
    config: &'a MachineConfig,
}

impl<'a> MachineBuilder<'a> {
    pub fn new(topology: &'a MachineTopology, config: &'a MachineConfig) -> Self {
        Self { topology, config }
    }

    pub fn build(self) -> Result<Machine, BuildError> {
        let open_bus_byte = self
            .config
            .open_bus_byte
            .or(self.topology.open_bus_byte)
            .unwrap_or(OPEN_BUS_BYTE);
        let mut bus = BusInterface::new(open_bus_byte, self.topology.pirq_lines);
        let mut rom_count = 0;

        log::debug!(
            "Building machine '{}' ({} steps)",
            self.topology.name,
            self.topology.ops.len()
        );
        for (step, op) in self.topology.ops.iter().enumerate() {
            self.apply(&mut bus, op, &mut rom_count).map_err(|source| BuildError {
                machine: self.topology.name.clone(),
                step,
                op: op.to_string(),
                source,
            })?;
        }

        Ok(Machine {
            name: self.topology.name.clone(),
            config: self.config.clone(),
            bus,
        })
    }

    fn apply(&self, bus: &mut BusInterface, op: &TopologyOp, rom_count: &mut u8) -> Result<(), BusError> {
        match op {
            TopologyOp::Attach { factory, config, when } => {
                if let Some(condition) = when {
                    if !self.config.satisfies(*condition) {
                        log::debug!("Skipping {}: condition {} not met", op, condition);
                        return Ok(());
                    }
                }
                let mut config = config.clone();
                let role = config.role.or(factory.default_role());
                if role == Some(DeviceRole::Memory) && config.size.is_none() {
                    config.size = Some(self.config.ram_kb as u64 * 1024);
                }
                bus.attach(factory.as_ref(), config)?;
            }
            TopologyOp::RegisterSlot(slot) => bus.register_pci_slot(*slot)?,
            TopologyOp::LoadRom(rom) => {
                if !self.config.load_roms {
                    log::info!("ROM loading disabled, skipping ROM at {:#X}", rom.base);
                    return Ok(());
                }
                let image = rom.read_image(&self.config.rom_dir)?;
                let name = match rom.files.first() {
                    Some(file) if rom.files.len() == 1 => format!("ROM ({})", file.display()),
                    _ => String::from("ROM"),
                };
                bus.attach_device(
                    Box::new(RomDevice::new(&name, rom.base, image, rom.alias_top)),
                    DeviceConfig::new()
                        .with_role(DeviceRole::Firmware)
                        .with_instance(*rom_count),
                )?;
                *rom_count += 1;
            }
            TopologyOp::RemapTop { kb } => {
                let ram = bus
                    .devices()
                    .resolve_role(DeviceRole::Memory, 0)
                    .ok_or_else(|| BusError::InvalidConfig {
                        device: String::from("remap"),
                        reason: String::from("no system RAM attached"),
                    })?;
                let desc = bus
                    .devices()
                    .resolve_as::<SystemRam>(ram)
                    .and_then(|r| r.remap_top_descriptor(*kb));
                match desc {
                    Some(desc) => {
                        bus.register_region(ram, desc)?;
                    }
                    None => log::debug!("Nothing to remap for {}K", kb),
                }
            }
            TopologyOp::PirqRoute { line, irq } => bus.pci_mut().set_default_pirq_route(*line, Some(*irq))?,
        }
        Ok(())
    }
}

/// A composed machine.
pub struct Machine {
    name: String,
    config: MachineConfig,
    bus: BusInterface,
}

impl Machine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn bus(&self) -> &BusInterface {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut BusInterface {
        &mut self.bus
    }

    pub fn reset(&mut self) {
        log::debug!("Resetting machine '{}'", self.name);
        self.bus.reset();
    }

    pub fn memory_map(&self) -> Vec<MapEntry> {
        self.bus.router().map(AddressSpace::Memory)
    }

    pub fn io_map(&self) -> Vec<MapEntry> {
        self.bus.router().map(AddressSpace::Io)
    }
}

#[derive(Default)]
pub struct MachineManager {
    definitions: BTreeMap<String, MachineDefinition>,
    current: Option<Machine>,
}

impl MachineManager {
    pub fn new() -> Self {
        Default::default()
    }

    /// Add a batch of definitions. If any name is already known, or repeats within the batch,
    /// none of them are added.
    pub fn add_definitions(&mut self, definitions: Vec<MachineDefinition>) -> Result<(), MachineError> {
        let mut names = BTreeSet::new();
        for def in &definitions {
            if self.definitions.contains_key(&def.name) || !names.insert(def.name.clone()) {
                return Err(MachineError::DuplicateMachine(def.name.clone()));
            }
        }
        for def in definitions {
            self.definitions.insert(def.name.clone(), def);
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn definition(&self, name: &str) -> Option<&MachineDefinition> {
        self.definitions.get(name)
    }

    /// Build the named machine and make it current. If the build fails, the machine that was
    /// running before stays current.
    pub fn select(&mut self, name: &str, config: &MachineConfig) -> Result<&mut Machine, MachineError> {
        let def = self
            .definitions
            .get(name)
            .ok_or_else(|| MachineError::UnknownMachine(name.to_string()))?;
        let topology = def.topology();
        let machine = MachineBuilder::new(&topology, config).build()?;
        log::info!("Machine '{}' selected", name);
        Ok(self.current.insert(machine))
    }

    pub fn current(&self) -> Option<&Machine> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut Machine> {
        self.current.as_mut()
    }
}
