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

//! Configuration space of a single PCI function.

use serde_derive::Deserialize;

use crate::{
    bus::{AccessWidth, RegionKind},
    error::BusError,
    pci::{PciInterruptPin, PCI_CONFIG_SPACE_SIZE, PCI_MAX_BARS},
};

pub const PCI_VENDOR_ID: u8 = 0x00;
pub const PCI_DEVICE_ID: u8 = 0x02;
pub const PCI_COMMAND: u8 = 0x04;
pub const PCI_STATUS: u8 = 0x06;
pub const PCI_REVISION_ID: u8 = 0x08;
pub const PCI_PROG_IF: u8 = 0x09;
pub const PCI_SUBCLASS: u8 = 0x0A;
pub const PCI_CLASS: u8 = 0x0B;
pub const PCI_HEADER_TYPE: u8 = 0x0E;
pub const PCI_BAR0: u8 = 0x10;
pub const PCI_SUBSYSTEM_VENDOR_ID: u8 = 0x2C;
pub const PCI_SUBSYSTEM_ID: u8 = 0x2E;
pub const PCI_INTERRUPT_LINE: u8 = 0x3C;
pub const PCI_INTERRUPT_PIN: u8 = 0x3D;

pub const PCI_COMMAND_IO: u16 = 0x0001;
pub const PCI_COMMAND_MEMORY: u16 = 0x0002;

pub const PCI_HEADER_MULTIFUNCTION: u8 = 0x80;

/// Interrupt Line value for a pin that is not routed to any IRQ.
pub const PCI_INTERRUPT_LINE_NONE: u8 = 0xFF;

const BAR_END: u8 = PCI_BAR0 + (PCI_MAX_BARS as u8) * 4;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PciBarDefinition {
    Io {
        size: u32,
    },
    Mmio32 {
        size: u32,
        #[serde(default)]
        prefetchable: bool,
    },
}

impl PciBarDefinition {
    pub fn size(&self) -> u32 {
        match self {
            PciBarDefinition::Io { size } => *size,
            PciBarDefinition::Mmio32 { size, .. } => *size,
        }
    }

    pub fn region_kind(&self) -> RegionKind {
        match self {
            PciBarDefinition::Io { .. } => RegionKind::Io,
            PciBarDefinition::Mmio32 { .. } => RegionKind::Mmio,
        }
    }

    /// Mask applied to a written base. I/O BARs decode 16 bits of port address.
    pub fn base_mask(&self) -> u32 {
        match self {
            PciBarDefinition::Io { size } => !size.wrapping_sub(1) & 0x0000_FFFC,
            PciBarDefinition::Mmio32 { size, .. } => !size.wrapping_sub(1) & 0xFFFF_FFF0,
        }
    }

    /// The read-only low bits of the register.
    pub fn flag_bits(&self) -> u32 {
        match self {
            PciBarDefinition::Io { .. } => 0x1,
            PciBarDefinition::Mmio32 { prefetchable, .. } => {
                if *prefetchable {
                    0x8
                }
                else {
                    0x0
                }
            }
        }
    }

    pub fn validate(&self, index: usize) -> Result<(), BusError> {
        let size = self.size();
        let min = match self {
            PciBarDefinition::Io { .. } => 4,
            PciBarDefinition::Mmio32 { .. } => 16,
        };
        let max = match self {
            PciBarDefinition::Io { .. } => 256,
            PciBarDefinition::Mmio32 { .. } => 0x8000_0000,
        };
        if !size.is_power_of_two() || size < min || size > max {
            return Err(BusError::InvalidRegion(format!(
                "BAR{} size {:#X} must be a power of two between {:#X} and {:#X}",
                index, size, min, max
            )));
        }
        Ok(())
    }
}

/// What a device presents for one PCI function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PciFunctionDescriptor {
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub revision: u8,
    pub class: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub header_type: u8,
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
    pub interrupt_pin: Option<PciInterruptPin>,
    pub bars: [Option<PciBarDefinition>; PCI_MAX_BARS],
    /// Power-on values of device-specific registers (0x40 and up).
    pub defaults: Vec<(u8, u8)>,
    /// First offset and count of PIRQ route registers, one byte per line, kept in step with
    /// the bus's PIRQ steering.
    pub pirq_routes: Option<(u8, u8)>,
}

impl PciFunctionDescriptor {
    pub fn new(function: u8, vendor_id: u16, device_id: u16) -> Self {
        Self {
            function,
            vendor_id,
            device_id,
            revision: 0,
            class: 0,
            subclass: 0,
            prog_if: 0,
            header_type: 0,
            subsystem_vendor_id: 0,
            subsystem_id: 0,
            interrupt_pin: None,
            bars: [None; PCI_MAX_BARS],
            defaults: Vec::new(),
            pirq_routes: None,
        }
    }

    pub fn with_class(mut self, class: u8, subclass: u8, prog_if: u8) -> Self {
        self.class = class;
        self.subclass = subclass;
        self.prog_if = prog_if;
        self
    }

    pub fn with_revision(mut self, revision: u8) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_bar(mut self, index: usize, bar: PciBarDefinition) -> Self {
        if index < PCI_MAX_BARS {
            self.bars[index] = Some(bar);
        }
        self
    }

    pub fn with_interrupt_pin(mut self, pin: PciInterruptPin) -> Self {
        self.interrupt_pin = Some(pin);
        self
    }

    pub fn with_default(mut self, offset: u8, value: u8) -> Self {
        self.defaults.push((offset, value));
        self
    }

    pub fn with_pirq_route_registers(mut self, base: u8, count: u8) -> Self {
        self.pirq_routes = Some((base, count));
        self
    }

    pub fn validate(&self) -> Result<(), BusError> {
        if self.function >= crate::pci::PCI_MAX_FUNCTIONS {
            return Err(BusError::InvalidRegion(format!(
                "PCI function number {} is out of range",
                self.function
            )));
        }
        for (i, bar) in self.bars.iter().enumerate() {
            if let Some(bar) = bar {
                bar.validate(i)?;
            }
        }
        if let Some((base, count)) = self.pirq_routes {
            if base < 0x40 || base as usize + count as usize > PCI_CONFIG_SPACE_SIZE {
                return Err(BusError::InvalidRegion(format!(
                    "PIRQ route registers at {:#04X} (x{}) are outside the device-specific area",
                    base, count
                )));
            }
        }
        Ok(())
    }
}

/// The address range a BAR currently decodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PciBarRange {
    pub kind: RegionKind,
    pub base: u64,
    pub size: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PciBarRelocation {
    pub index: u8,
    pub old_base: u32,
    pub new_base: u32,
}

/// Changes a configuration write made that the rest of the machine has to act on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PciConfigWriteEffects {
    pub command: Option<(u16, u16)>,
    pub bars: Vec<PciBarRelocation>,
}

impl PciConfigWriteEffects {
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.bars.is_empty()
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct BarState {
    def: Option<PciBarDefinition>,
    base: u32,
    probe: bool,
}

impl BarState {
    fn register(&self) -> u32 {
        match self.def {
            None => 0,
            Some(def) if self.probe => def.base_mask() | def.flag_bits(),
            Some(def) => self.base | def.flag_bits(),
        }
    }
}

pub struct PciConfigSpace {
    bytes: [u8; PCI_CONFIG_SPACE_SIZE],
    defaults: [u8; PCI_CONFIG_SPACE_SIZE],
    bars: [BarState; PCI_MAX_BARS],
}

impl PciConfigSpace {
    pub fn new(desc: &PciFunctionDescriptor) -> Self {
        let mut defaults = [0u8; PCI_CONFIG_SPACE_SIZE];
        defaults[0x00..0x02].copy_from_slice(&desc.vendor_id.to_le_bytes());
        defaults[0x02..0x04].copy_from_slice(&desc.device_id.to_le_bytes());
        defaults[PCI_REVISION_ID as usize] = desc.revision;
        defaults[PCI_PROG_IF as usize] = desc.prog_if;
        defaults[PCI_SUBCLASS as usize] = desc.subclass;
        defaults[PCI_CLASS as usize] = desc.class;
        defaults[PCI_HEADER_TYPE as usize] = desc.header_type;
        defaults[0x2C..0x2E].copy_from_slice(&desc.subsystem_vendor_id.to_le_bytes());
        defaults[0x2E..0x30].copy_from_slice(&desc.subsystem_id.to_le_bytes());
        defaults[PCI_INTERRUPT_LINE as usize] = PCI_INTERRUPT_LINE_NONE;
        defaults[PCI_INTERRUPT_PIN as usize] = desc.interrupt_pin.map(|p| p.to_config_u8()).unwrap_or(0);
        for &(offset, value) in &desc.defaults {
            if offset >= 0x40 {
                defaults[offset as usize] = value;
            }
        }

        let mut bars = [BarState::default(); PCI_MAX_BARS];
        for (state, def) in bars.iter_mut().zip(desc.bars.iter()) {
            state.def = *def;
        }

        Self {
            bytes: defaults,
            defaults,
            bars,
        }
    }

    /// Return every register to its power-on value.
    pub fn reset(&mut self) {
        self.bytes = self.defaults;
        for bar in self.bars.iter_mut() {
            bar.base = 0;
            bar.probe = false;
        }
    }

    pub fn read(&self, offset: u8, width: AccessWidth) -> u32 {
        let mut value = 0u32;
        for i in 0..width.bytes().min(4) as usize {
            let byte = match (offset as usize).checked_add(i) {
                Some(off) if off < PCI_CONFIG_SPACE_SIZE => self.read_byte(off as u8),
                _ => 0xFF,
            };
            value |= (byte as u32) << (i * 8);
        }
        value
    }

    pub fn read_u8(&self, offset: u8) -> u8 {
        self.read(offset, AccessWidth::Byte) as u8
    }

    pub fn read_u16(&self, offset: u8) -> u16 {
        self.read(offset, AccessWidth::Word) as u16
    }

    pub fn read_u32(&self, offset: u8) -> u32 {
        self.read(offset, AccessWidth::Dword)
    }

    /// Apply a configuration write and report what changed.
    pub fn write(&mut self, offset: u8, width: AccessWidth, value: u32) -> PciConfigWriteEffects {
        let mut effects = PciConfigWriteEffects::default();
        let old_command = self.command();
        let mut touched_bars = [None::<u32>; PCI_MAX_BARS];

        for i in 0..width.bytes().min(4) as usize {
            let off = offset as usize + i;
            if off >= PCI_CONFIG_SPACE_SIZE {
                break;
            }
            let byte = (value >> (i * 8)) as u8;
            let off = off as u8;

            if (PCI_BAR0..BAR_END).contains(&off) {
                let index = ((off - PCI_BAR0) / 4) as usize;
                let shift = ((off - PCI_BAR0) % 4) as u32 * 8;
                let current = touched_bars[index].unwrap_or_else(|| self.bars[index].register());
                touched_bars[index] = Some((current & !(0xFF << shift)) | ((byte as u32) << shift));
            }
            else if off == PCI_STATUS || off == PCI_STATUS + 1 {
                // Status bits are write-one-to-clear.
                self.bytes[off as usize] &= !byte;
            }
            else if !PciConfigSpace::is_read_only(off) {
                self.bytes[off as usize] = byte;
            }
        }

        for (index, written) in touched_bars.iter().enumerate() {
            if let Some(written) = written {
                if let Some(relocation) = self.write_bar(index, *written) {
                    effects.bars.push(relocation);
                }
            }
        }

        let new_command = self.command();
        if new_command != old_command {
            effects.command = Some((old_command, new_command));
        }
        effects
    }

    pub fn command(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x04], self.bytes[0x05]])
    }

    pub fn vendor_id(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x00], self.bytes[0x01]])
    }

    pub fn device_id(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x02], self.bytes[0x03]])
    }

    pub fn class_code(&self) -> (u8, u8, u8) {
        (
            self.bytes[PCI_CLASS as usize],
            self.bytes[PCI_SUBCLASS as usize],
            self.bytes[PCI_PROG_IF as usize],
        )
    }

    pub fn interrupt_line(&self) -> u8 {
        self.bytes[PCI_INTERRUPT_LINE as usize]
    }

    pub fn interrupt_pin(&self) -> Option<PciInterruptPin> {
        PciInterruptPin::from_config_u8(self.bytes[PCI_INTERRUPT_PIN as usize])
    }

    /// Set the Interrupt Line register, both live and as the value restored on reset.
    pub fn set_interrupt_line(&mut self, line: u8) {
        self.bytes[PCI_INTERRUPT_LINE as usize] = line;
        self.defaults[PCI_INTERRUPT_LINE as usize] = line;
    }

    /// Set a device-specific register's live value.
    pub(crate) fn set_register(&mut self, offset: u8, value: u8) {
        if offset >= 0x40 {
            self.bytes[offset as usize] = value;
        }
    }

    /// Set the value a device-specific register is restored to on reset.
    pub(crate) fn set_register_default(&mut self, offset: u8, value: u8) {
        if offset >= 0x40 {
            self.defaults[offset as usize] = value;
        }
    }

    pub fn bar_definition(&self, index: usize) -> Option<PciBarDefinition> {
        self.bars.get(index).and_then(|b| b.def)
    }

    /// The range BAR `index` decodes, if it is implemented and has a non-zero base.
    /// Whether decoding is enabled is up to the Command register.
    pub fn bar_range(&self, index: usize) -> Option<PciBarRange> {
        let bar = self.bars.get(index)?;
        let def = bar.def?;
        if bar.base == 0 {
            return None;
        }
        Some(PciBarRange {
            kind: def.region_kind(),
            base: bar.base as u64,
            size: def.size() as u64,
        })
    }

    pub fn decode_enabled(&self, kind: RegionKind) -> bool {
        match kind {
            RegionKind::Io => self.command() & PCI_COMMAND_IO != 0,
            _ => self.command() & PCI_COMMAND_MEMORY != 0,
        }
    }

    fn read_byte(&self, offset: u8) -> u8 {
        if (PCI_BAR0..BAR_END).contains(&offset) {
            let index = ((offset - PCI_BAR0) / 4) as usize;
            let shift = ((offset - PCI_BAR0) % 4) as u32 * 8;
            (self.bars[index].register() >> shift) as u8
        }
        else {
            self.bytes[offset as usize]
        }
    }

    fn write_bar(&mut self, index: usize, value: u32) -> Option<PciBarRelocation> {
        let bar = &mut self.bars[index];
        let def = bar.def?;

        if value & def.base_mask() == def.base_mask() && (value | 0xF) == 0xFFFF_FFFF {
            bar.probe = true;
            return None;
        }
        bar.probe = false;

        let new_base = value & def.base_mask();
        if new_base == bar.base {
            return None;
        }
        let old_base = bar.base;
        bar.base = new_base;
        Some(PciBarRelocation {
            index: index as u8,
            old_base,
            new_base,
        })
    }

    fn is_read_only(offset: u8) -> bool {
        matches!(
            offset,
            0x00..=0x03 | 0x08..=0x0B | PCI_HEADER_TYPE | 0x2C..=0x2F | PCI_INTERRUPT_PIN
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nic() -> PciConfigSpace {
        let desc = PciFunctionDescriptor::new(0, 0x10EC, 0x8029)
            .with_class(0x02, 0x00, 0x00)
            .with_bar(0, PciBarDefinition::Io { size: 0x20 })
            .with_bar(1, PciBarDefinition::Mmio32 {
                size: 0x1000,
                prefetchable: false,
            })
            .with_interrupt_pin(PciInterruptPin::IntA)
            .with_default(0x40, 0x5A);
        PciConfigSpace::new(&desc)
    }

    #[test]
    fn test_identity_registers() {
        let cfg = nic();
        assert_eq!(cfg.read_u32(0x00), 0x8029_10EC);
        assert_eq!(cfg.read_u8(PCI_CLASS), 0x02);
        assert_eq!(cfg.read_u8(PCI_INTERRUPT_PIN), 1);
        assert_eq!(cfg.read_u8(PCI_INTERRUPT_LINE), PCI_INTERRUPT_LINE_NONE);
        assert_eq!(cfg.read_u8(0x40), 0x5A);
        // Reads past the end of configuration space float high.
        assert_eq!(cfg.read_u16(0xFF), 0xFF00);
    }

    #[test]
    fn test_read_only_registers_ignore_writes() {
        let mut cfg = nic();
        cfg.write(0x00, AccessWidth::Dword, 0xDEAD_BEEF);
        cfg.write(PCI_INTERRUPT_PIN, AccessWidth::Byte, 3);
        cfg.write(PCI_CLASS, AccessWidth::Byte, 0x01);
        assert_eq!(cfg.vendor_id(), 0x10EC);
        assert_eq!(cfg.device_id(), 0x8029);
        assert_eq!(cfg.interrupt_pin(), Some(PciInterruptPin::IntA));
        assert_eq!(cfg.class_code().0, 0x02);
    }

    #[test]
    fn test_bar_probe_returns_size_mask() {
        let mut cfg = nic();
        assert!(cfg.write(0x10, AccessWidth::Dword, 0xFFFF_FFFF).is_empty());
        assert_eq!(cfg.read_u32(0x10), 0x0000_FFE1);
        assert!(cfg.write(0x14, AccessWidth::Dword, 0xFFFF_FFFF).is_empty());
        assert_eq!(cfg.read_u32(0x14), 0xFFFF_F000);

        // Unimplemented BARs are hardwired to zero.
        cfg.write(0x18, AccessWidth::Dword, 0xFFFF_FFFF);
        assert_eq!(cfg.read_u32(0x18), 0);
    }

    #[test]
    fn test_bar_assignment_masks_base() {
        let mut cfg = nic();
        let effects = cfg.write(0x14, AccessWidth::Dword, 0xE000_0ABC);
        assert_eq!(effects.bars, vec![PciBarRelocation {
            index: 1,
            old_base: 0,
            new_base: 0xE000_0000,
        }]);
        assert_eq!(cfg.read_u32(0x14), 0xE000_0000);

        // Same value again: no relocation.
        assert!(cfg.write(0x14, AccessWidth::Dword, 0xE000_0000).is_empty());

        // Probe, then restore: still no relocation.
        cfg.write(0x14, AccessWidth::Dword, 0xFFFF_FFFF);
        assert!(cfg.write(0x14, AccessWidth::Dword, 0xE000_0000).is_empty());
        assert_eq!(cfg.bar_range(1).map(|r| r.base), Some(0xE000_0000));
    }

    #[test]
    fn test_partial_bar_write() {
        let mut cfg = nic();
        cfg.write(0x10, AccessWidth::Dword, 0x0000_6000);
        let effects = cfg.write(0x11, AccessWidth::Byte, 0x70);
        assert_eq!(effects.bars.len(), 1);
        assert_eq!(cfg.read_u32(0x10), 0x0000_7001);
    }

    #[test]
    fn test_command_change_reported() {
        let mut cfg = nic();
        let effects = cfg.write(PCI_COMMAND, AccessWidth::Word, 0x0003);
        assert_eq!(effects.command, Some((0, 3)));
        assert!(cfg.decode_enabled(RegionKind::Io));
        assert!(cfg.decode_enabled(RegionKind::Mmio));
        assert!(cfg.write(PCI_COMMAND, AccessWidth::Word, 0x0003).command.is_none());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut cfg = nic();
        cfg.set_interrupt_line(11);
        cfg.write(PCI_COMMAND, AccessWidth::Word, 0x0003);
        cfg.write(0x14, AccessWidth::Dword, 0xE000_0000);
        cfg.write(0x40, AccessWidth::Byte, 0x00);
        cfg.write(PCI_INTERRUPT_LINE, AccessWidth::Byte, 5);

        cfg.reset();
        assert_eq!(cfg.command(), 0);
        assert_eq!(cfg.bar_range(1), None);
        assert_eq!(cfg.read_u8(0x40), 0x5A);
        assert_eq!(cfg.interrupt_line(), 11);
    }

    #[test]
    fn test_bar_validation() {
        assert!(PciBarDefinition::Io { size: 2 }.validate(0).is_err());
        assert!(PciBarDefinition::Io { size: 24 }.validate(0).is_err());
        assert!(PciBarDefinition::Mmio32 {
            size: 0x1000,
            prefetchable: true
        }
        .validate(0)
        .is_ok());
        let desc = PciFunctionDescriptor::new(8, 0x8086, 0x1234);
        assert!(desc.validate().is_err());
    }
}
