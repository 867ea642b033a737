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

//! The PCI bus: registered slots, attached functions and their configuration spaces.

use std::collections::BTreeMap;

use strum_macros::Display;

use crate::{
    bus::{AccessWidth, RegionDescriptor, RegionId},
    error::BusError,
    pci::{
        bar_tag,
        decode_pirq_route,
        encode_pirq_route,
        PciAddress,
        PciConfigSpace,
        PciConfigWriteEffects,
        PciFunctionDescriptor,
        PciInterruptPin,
        PciIrqRouting,
        PciSlot,
        PCI_HEADER_MULTIFUNCTION,
        PCI_INTERRUPT_LINE_NONE,
        PCI_MAX_BARS,
    },
    registry::DeviceHandle,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
pub enum PciFunctionState {
    Unconfigured,
    Configured,
    Relocated,
}

pub struct PciFunction {
    pub address: PciAddress,
    pub owner: DeviceHandle,
    config: PciConfigSpace,
    state: PciFunctionState,
    bar_regions: [Option<RegionId>; PCI_MAX_BARS],
    pirq_routes: Option<(u8, u8)>,
}

impl PciFunction {
    pub fn config(&self) -> &PciConfigSpace {
        &self.config
    }

    pub fn state(&self) -> PciFunctionState {
        self.state
    }

    pub fn bar_region(&self, index: usize) -> Option<RegionId> {
        self.bar_regions.get(index).copied().flatten()
    }

    /// The region BAR `index` should be mapped as right now: implemented, assigned a non-zero
    /// base and with decoding of its kind enabled.
    pub(crate) fn desired_bar_region(&self, index: usize) -> Option<RegionDescriptor> {
        let range = self.config.bar_range(index)?;
        if !self.config.decode_enabled(range.kind) {
            return None;
        }
        Some(
            RegionDescriptor::new(range.kind, range.base, range.size)
                .with_tag(bar_tag(self.address.function, index as u8))
                .with_shadow(true),
        )
    }

    pub(crate) fn set_bar_region(&mut self, index: usize, region: Option<RegionId>) {
        self.bar_regions[index] = region;
    }
}

pub struct PciBus {
    routing: PciIrqRouting,
    functions: BTreeMap<PciAddress, PciFunction>,
}

impl PciBus {
    pub fn new(pirq_lines: u8) -> Self {
        Self {
            routing: PciIrqRouting::new(pirq_lines),
            functions: BTreeMap::new(),
        }
    }

    pub fn routing(&self) -> &PciIrqRouting {
        &self.routing
    }

    pub fn register_slot(&mut self, slot: PciSlot) -> Result<(), BusError> {
        self.routing.register_slot(slot)?;
        self.refresh_steering();
        Ok(())
    }

    pub fn irq_for(&self, slot: u8, pin: PciInterruptPin) -> Option<u8> {
        self.routing.irq_for(slot, pin)
    }

    pub fn isa_irq_for(&self, slot: u8, pin: PciInterruptPin) -> Option<u8> {
        self.routing.isa_irq_for(slot, pin)
    }

    /// Steer a PIRQ line at runtime. Interrupt Line registers follow.
    pub fn set_pirq_route(&mut self, line: u8, irq: Option<u8>) -> Result<(), BusError> {
        self.routing.steer(line, irq)?;
        self.refresh_steering();
        Ok(())
    }

    /// Set a PIRQ line's power-on steering.
    pub fn set_default_pirq_route(&mut self, line: u8, irq: Option<u8>) -> Result<(), BusError> {
        self.routing.set_default_route(line, irq)?;
        self.refresh_steering();
        Ok(())
    }

    pub fn function(&self, address: PciAddress) -> Option<&PciFunction> {
        self.functions.get(&address)
    }

    pub(crate) fn function_mut(&mut self, address: PciAddress) -> Option<&mut PciFunction> {
        self.functions.get_mut(&address)
    }

    pub fn functions(&self) -> impl Iterator<Item = &PciFunction> {
        self.functions.values()
    }

    /// Configuration read. Absent functions read as all ones.
    pub fn read_config(&self, address: PciAddress, offset: u8, width: AccessWidth) -> u32 {
        match self.functions.get(&address) {
            Some(function) => function.config.read(offset, width),
            None => (AccessWidth::Dword.mask() & width.mask()) as u32,
        }
    }

    /// Apply a configuration write to the function's registers. Region changes are left to the
    /// caller, which gets the owning device and the write's effects back.
    pub(crate) fn write_config(
        &mut self,
        address: PciAddress,
        offset: u8,
        width: AccessWidth,
        value: u32,
    ) -> Option<(DeviceHandle, PciConfigWriteEffects)> {
        let function = self.functions.get_mut(&address)?;
        let effects = function.config.write(offset, width, value);

        if !effects.bars.is_empty() {
            function.state = PciFunctionState::Relocated;
        }
        else if effects.command.is_some() && function.state == PciFunctionState::Unconfigured {
            function.state = PciFunctionState::Configured;
        }
        Some((function.owner, effects))
    }

    pub(crate) fn check_attach(&self, slot: u8, functions: &[PciFunctionDescriptor]) -> Result<(), BusError> {
        if self.routing.slot(slot).is_none() {
            return Err(BusError::SlotNotRegistered(slot));
        }
        for (i, desc) in functions.iter().enumerate() {
            desc.validate()?;
            let address = PciAddress::new(slot, desc.function);
            let repeated = functions[..i].iter().any(|d| d.function == desc.function);
            if repeated || self.functions.contains_key(&address) {
                return Err(BusError::FunctionInUse {
                    slot,
                    function: desc.function,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn attach(&mut self, slot: u8, owner: DeviceHandle, functions: Vec<PciFunctionDescriptor>) {
        let multifunction = functions.len() > 1;
        for mut desc in functions {
            if multifunction && desc.function == 0 {
                desc.header_type |= PCI_HEADER_MULTIFUNCTION;
            }
            let address = PciAddress::new(slot, desc.function);
            log::debug!(
                "PCI function {} ({:04X}:{:04X}) attached for {}",
                address,
                desc.vendor_id,
                desc.device_id,
                owner
            );
            self.functions.insert(
                address,
                PciFunction {
                    address,
                    owner,
                    config: PciConfigSpace::new(&desc),
                    state: PciFunctionState::Unconfigured,
                    bar_regions: [None; PCI_MAX_BARS],
                    pirq_routes: desc.pirq_routes,
                },
            );
        }
        self.refresh_steering();
    }

    /// Drop every function belonging to `owner`. Returns the BAR regions they had mapped.
    pub(crate) fn detach_owner(&mut self, owner: DeviceHandle) -> Vec<RegionId> {
        let mut regions = Vec::new();
        self.functions.retain(|_, f| {
            if f.owner == owner {
                regions.extend(f.bar_regions.iter().flatten());
                false
            }
            else {
                true
            }
        });
        regions
    }

    /// Return every function to its power-on configuration. Returns the BAR regions that must
    /// be unmapped.
    pub(crate) fn reset(&mut self) -> Vec<RegionId> {
        self.routing.reset_steering();
        let mut regions = Vec::new();
        for function in self.functions.values_mut() {
            function.config.reset();
            function.state = PciFunctionState::Unconfigured;
            for region in function.bar_regions.iter_mut() {
                if let Some(id) = region.take() {
                    regions.push(id);
                }
            }
        }
        self.refresh_steering();
        regions
    }

    /// Recompute every function's Interrupt Line and PIRQ route registers from the current
    /// routing and steering.
    fn refresh_steering(&mut self) {
        let routing = &self.routing;
        for function in self.functions.values_mut() {
            let line = function
                .config
                .interrupt_pin()
                .and_then(|pin| routing.isa_irq_for(function.address.slot, pin))
                .unwrap_or(PCI_INTERRUPT_LINE_NONE);
            function.config.set_interrupt_line(line);

            let Some((base, count)) = function.pirq_routes
            else {
                continue;
            };
            for line in 1..=count.min(routing.lines()) {
                let offset = base + (line - 1);
                function
                    .config
                    .set_register_default(offset, encode_pirq_route(routing.default_pirq_route(line)));
                // A register that already decodes to the live steering keeps the value written to it.
                let live = routing.pirq_route(line);
                if decode_pirq_route(function.config.read_u8(offset)) != live {
                    function.config.set_register(offset, encode_pirq_route(live));
                }
            }
        }
    }
}
