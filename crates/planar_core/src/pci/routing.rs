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

//! PCI interrupt routing.
//!
//! Each slot wires its four interrupt pins to one of the physical interrupt lines the chipset
//! exposes (PIRQ lines, numbered from 1; 0 means unconnected). Boards rotate the wiring from
//! slot to slot so that single-function cards, which all use INTA#, do not all share a line.
//! The chipset then steers each line to an ISA IRQ.

use std::collections::BTreeMap;

use serde_derive::Deserialize;

use crate::{
    error::BusError,
    pci::{PciInterruptPin, PciSlot, PciSlotKind, PCI_MAX_SLOTS},
};

pub const PCI_DEFAULT_PIRQ_LINES: u8 = 4;
/// Bit 7 of a PIRQ route register disconnects the line.
pub const PIRQ_ROUTE_DISABLE: u8 = 0x80;

/// IRQs a PIRQ line may be steered to.
pub fn pirq_irq_valid(irq: u8) -> bool {
    matches!(irq, 3..=7 | 9..=12 | 14 | 15)
}

/// Decode a PIRQ route register. The low nibble names the ISA IRQ unless the line is disabled.
pub fn decode_pirq_route(value: u8) -> Option<u8> {
    if value & PIRQ_ROUTE_DISABLE != 0 {
        return None;
    }
    let irq = value & 0x0F;
    pirq_irq_valid(irq).then_some(irq)
}

pub fn encode_pirq_route(irq: Option<u8>) -> u8 {
    irq.map(|irq| irq & 0x0F).unwrap_or(PIRQ_ROUTE_DISABLE)
}

/// Interrupt lines for the pins of `slot`, rotated by one line per slot counting from
/// `first_slot`.
pub fn rotate_lines(lines: [u8; 4], slot: u8, first_slot: u8) -> [u8; 4] {
    let step = slot.wrapping_sub(first_slot) as usize;
    let mut pins = [0u8; 4];
    for (p, pin) in pins.iter_mut().enumerate() {
        *pin = lines[(p + step) % 4];
    }
    pins
}

/// A run of consecutive slots wired with a rotating pattern.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct SlotRotation {
    pub first_slot: u8,
    pub count: u8,
    pub kind: PciSlotKind,
    pub lines: [u8; 4],
}

impl SlotRotation {
    pub fn slots(&self) -> Vec<PciSlot> {
        (0..self.count)
            .map(|i| {
                let slot = self.first_slot.wrapping_add(i);
                PciSlot::new(slot, self.kind, rotate_lines(self.lines, slot, self.first_slot))
            })
            .collect()
    }
}

pub struct PciIrqRouting {
    lines: u8,
    slots: BTreeMap<u8, PciSlot>,
    steering: Vec<Option<u8>>,
    default_steering: Vec<Option<u8>>,
}

impl PciIrqRouting {
    pub fn new(lines: u8) -> Self {
        Self {
            lines,
            slots: BTreeMap::new(),
            steering: vec![None; lines as usize],
            default_steering: vec![None; lines as usize],
        }
    }

    /// Number of physical interrupt lines exposed to slots.
    pub fn lines(&self) -> u8 {
        self.lines
    }

    pub fn validate_slot(&self, slot: &PciSlot) -> Result<(), BusError> {
        if slot.slot >= PCI_MAX_SLOTS {
            return Err(BusError::InvalidSlot(slot.slot));
        }
        if self.slots.contains_key(&slot.slot) {
            return Err(BusError::DuplicateSlot(slot.slot));
        }
        if matches!(slot.kind, PciSlotKind::Northbridge | PciSlotKind::Southbridge) {
            if let Some(existing) = self.slots.values().find(|s| s.kind == slot.kind) {
                return Err(BusError::DuplicateBridge {
                    kind: slot.kind,
                    existing: existing.slot,
                });
            }
        }
        for pin in PciInterruptPin::ALL {
            let line = slot.line_for(pin);
            if line > self.lines {
                return Err(BusError::InvalidRouting {
                    slot: slot.slot,
                    pin,
                    line,
                    lines: self.lines,
                });
            }
        }
        Ok(())
    }

    /// Register a slot. A rejected slot leaves the routing table untouched.
    pub fn register_slot(&mut self, slot: PciSlot) -> Result<(), BusError> {
        self.validate_slot(&slot)?;
        log::debug!(
            "Registered {} PCI slot {:02X}: pins -> lines {:?}",
            slot.kind,
            slot.slot,
            slot.pins
        );
        self.slots.insert(slot.slot, slot);
        Ok(())
    }

    pub fn slot(&self, slot: u8) -> Option<&PciSlot> {
        self.slots.get(&slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &PciSlot> {
        self.slots.values()
    }

    /// The physical interrupt line `pin` of `slot` is wired to, if any.
    pub fn irq_for(&self, slot: u8, pin: PciInterruptPin) -> Option<u8> {
        match self.slots.get(&slot)?.line_for(pin) {
            0 => None,
            line => Some(line),
        }
    }

    /// Steer a line to an ISA IRQ, or disconnect it. This is the chipset's runtime view and is
    /// reverted to the board defaults on reset.
    pub fn steer(&mut self, line: u8, irq: Option<u8>) -> Result<(), BusError> {
        let index = self.line_index(line, irq)?;
        self.steering[index] = irq;
        Ok(())
    }

    /// Set the steering a line powers up with.
    pub fn set_default_route(&mut self, line: u8, irq: Option<u8>) -> Result<(), BusError> {
        let index = self.line_index(line, irq)?;
        self.default_steering[index] = irq;
        self.steering[index] = irq;
        Ok(())
    }

    pub fn pirq_route(&self, line: u8) -> Option<u8> {
        let index = (line as usize).checked_sub(1)?;
        self.steering.get(index).copied().flatten()
    }

    /// The steering `line` returns to on reset.
    pub fn default_pirq_route(&self, line: u8) -> Option<u8> {
        let index = (line as usize).checked_sub(1)?;
        self.default_steering.get(index).copied().flatten()
    }

    /// The ISA IRQ an interrupt on `pin` of `slot` is delivered on, if the pin is wired and its
    /// line is steered.
    pub fn isa_irq_for(&self, slot: u8, pin: PciInterruptPin) -> Option<u8> {
        self.pirq_route(self.irq_for(slot, pin)?)
    }

    pub fn reset_steering(&mut self) {
        self.steering = self.default_steering.clone();
    }

    fn line_index(&self, line: u8, irq: Option<u8>) -> Result<usize, BusError> {
        let bad_route = BusError::InvalidPirqRoute {
            line,
            irq: irq.unwrap_or(0),
        };
        if line == 0 || line > self.lines {
            return Err(bad_route);
        }
        if let Some(irq) = irq {
            if !pirq_irq_valid(irq) {
                return Err(bad_route);
            }
        }
        Ok(line as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_rotation_example() {
        let rotation = SlotRotation {
            first_slot: 0x0D,
            count: 4,
            kind: PciSlotKind::Normal,
            lines: [1, 2, 3, 4],
        };
        let slots = rotation.slots();
        assert_eq!(slots[0].pins, [1, 2, 3, 4]);
        assert_eq!(slots[1].pins, [2, 3, 4, 1]);
        assert_eq!(slots[2].pins, [3, 4, 1, 2]);
        assert_eq!(slots[3].pins, [4, 1, 2, 3]);
        assert_eq!(slots[3].slot, 0x10);
    }

    #[test]
    fn test_duplicate_slot_leaves_state() {
        let mut routing = PciIrqRouting::new(4);
        routing
            .register_slot(PciSlot::new(0x0D, PciSlotKind::Normal, [1, 2, 3, 4]))
            .unwrap();
        let result = routing.register_slot(PciSlot::new(0x0D, PciSlotKind::Normal, [4, 3, 2, 1]));
        assert!(matches!(result, Err(BusError::DuplicateSlot(0x0D))));
        assert_eq!(routing.irq_for(0x0D, PciInterruptPin::IntA), Some(1));
        assert_eq!(routing.slots().count(), 1);
    }

    #[test]
    fn test_one_bridge_of_each_kind() {
        let mut routing = PciIrqRouting::new(4);
        routing
            .register_slot(PciSlot::new(0, PciSlotKind::Northbridge, [0; 4]))
            .unwrap();
        routing
            .register_slot(PciSlot::new(7, PciSlotKind::Southbridge, [0; 4]))
            .unwrap();
        let result = routing.register_slot(PciSlot::new(8, PciSlotKind::Southbridge, [0; 4]));
        assert!(matches!(result, Err(BusError::DuplicateBridge { existing: 7, .. })));
    }

    #[test]
    fn test_line_out_of_range() {
        let mut routing = PciIrqRouting::new(4);
        let result = routing.register_slot(PciSlot::new(0x11, PciSlotKind::Normal, [1, 2, 5, 4]));
        assert!(matches!(
            result,
            Err(BusError::InvalidRouting {
                line: 5,
                pin: PciInterruptPin::IntC,
                ..
            })
        ));
        assert!(matches!(
            routing.register_slot(PciSlot::new(32, PciSlotKind::Normal, [0; 4])),
            Err(BusError::InvalidSlot(32))
        ));
    }

    #[test]
    fn test_unwired_pin() {
        let mut routing = PciIrqRouting::new(4);
        routing
            .register_slot(PciSlot::new(0x12, PciSlotKind::Video, [1, 0, 0, 0]))
            .unwrap();
        assert_eq!(routing.irq_for(0x12, PciInterruptPin::IntB), None);
        assert_eq!(routing.irq_for(0x13, PciInterruptPin::IntA), None);
    }

    #[test]
    fn test_steering() {
        let mut routing = PciIrqRouting::new(4);
        routing
            .register_slot(PciSlot::new(0x0E, PciSlotKind::Normal, [2, 3, 4, 1]))
            .unwrap();
        routing.set_default_route(2, Some(10)).unwrap();
        assert_eq!(routing.isa_irq_for(0x0E, PciInterruptPin::IntA), Some(10));
        assert_eq!(routing.isa_irq_for(0x0E, PciInterruptPin::IntB), None);

        routing.steer(2, Some(11)).unwrap();
        assert_eq!(routing.pirq_route(2), Some(11));
        routing.reset_steering();
        assert_eq!(routing.pirq_route(2), Some(10));

        assert!(routing.steer(2, Some(8)).is_err());
        assert!(routing.steer(0, Some(10)).is_err());
        assert!(routing.steer(5, Some(10)).is_err());
        assert_eq!(routing.pirq_route(0), None);
    }

    proptest! {
        #[test]
        fn prop_rotation_swizzle(slot in 1u8..32, pin in 0usize..4) {
            let lines = [1, 2, 3, 4];
            let first = 1u8;
            let pins = rotate_lines(lines, slot, first);
            prop_assert_eq!(pins[pin], lines[(pin + (slot - first) as usize) % 4]);

            // The rotation only depends on the slot number modulo 4.
            if slot + 4 < 32 {
                prop_assert_eq!(rotate_lines(lines, slot + 4, first), pins);
            }
        }

        #[test]
        fn prop_registered_rotation_irq_for(
            first_slot in 0u8..32,
            count in 1u8..=32,
            lines in prop::array::uniform4(0u8..=4)
        ) {
            let count = count.min(PCI_MAX_SLOTS - first_slot);
            let rotation = SlotRotation {
                first_slot,
                count,
                kind: PciSlotKind::Normal,
                lines,
            };
            let mut routing = PciIrqRouting::new(4);
            for slot in rotation.slots() {
                routing.register_slot(slot).unwrap();
            }

            for slot in 0..PCI_MAX_SLOTS {
                for (p, pin) in PciInterruptPin::ALL.iter().enumerate() {
                    let in_run = slot >= first_slot && slot < first_slot + count;
                    let expected = match lines[(p + (slot.wrapping_sub(first_slot)) as usize) % 4] {
                        line if in_run && line != 0 => Some(line),
                        _ => None,
                    };
                    prop_assert_eq!(routing.irq_for(slot, *pin), expected);
                }
            }
        }
    }
}
