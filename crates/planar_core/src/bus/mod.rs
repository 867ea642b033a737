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

//! The system bus.
//!
//! [BusInterface] owns the address router, the device registry and the PCI engine. All memory
//! and I/O traffic goes through it: an access is resolved to a region, the owning device is
//! checked out of the registry and called with the bus itself, so a handler may in turn access
//! any other device.

use std::any::Any;

use crate::{
    error::BusError,
    pci::{PciBus, PciFunctionDescriptor, PCI_DEFAULT_PIRQ_LINES},
    registry::{DeviceConfig, DeviceFactory, DeviceHandle, DeviceInfo, DeviceRegistry},
};

pub mod dispatch;
pub mod io;
pub mod memory;
pub mod pci;
pub mod region;
pub mod router;

pub use region::*;
pub use router::{AddressRouter, MapEntry, RegionEvent, RegionEventKind};

pub const NO_IO_BYTE: u8 = 0xFF; // This is the byte read from an unconnected IO port.
pub const OPEN_BUS_BYTE: u8 = 0xFF; // This is the byte read from an unmapped memory address.

/// Everything a device needs to know about the access it is servicing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusAccess {
    /// The region through which the access arrived.
    pub region: RegionId,
    /// The tag the device gave that region.
    pub tag: u16,
    /// The bus address of the first byte.
    pub address: u64,
    /// Offset into the device: the region's device offset plus the offset into the region.
    pub offset: u64,
    pub width: AccessWidth,
}

pub trait IoDevice {
    fn io_read(&mut self, access: &BusAccess, bus: &mut BusInterface) -> u64 {
        bus.open_bus_value(access.width)
    }

    fn io_write(&mut self, access: &BusAccess, value: u64, bus: &mut BusInterface) {
        _ = (access, value, bus);
    }
}

pub trait MemoryMappedDevice {
    fn mmio_read(&mut self, access: &BusAccess, bus: &mut BusInterface) -> u64 {
        bus.open_bus_value(access.width)
    }

    fn mmio_write(&mut self, access: &BusAccess, value: u64, bus: &mut BusInterface) {
        _ = (access, value, bus);
    }

    /// Read without side effects, for debug views. Devices that cannot do so return `None`.
    fn mmio_peek(&self, access: &BusAccess) -> Option<u64> {
        _ = access;
        None
    }
}

pub trait Device: IoDevice + MemoryMappedDevice + Any {
    fn name(&self) -> String;

    /// The regions this device wants mapped when it is attached.
    fn mapping(&self) -> Vec<RegionDescriptor>;

    /// Return to power-on state.
    fn reset(&mut self) {}

    /// PCI functions presented by this device, if it sits in a PCI slot.
    fn pci_functions(&self) -> Vec<PciFunctionDescriptor> {
        Vec::new()
    }

    /// Called after the PCI engine has applied a configuration write to one of this device's
    /// functions.
    fn pci_config_write(
        &mut self,
        function: u8,
        offset: u8,
        width: AccessWidth,
        value: u32,
        bus: &mut BusInterface,
    ) {
        _ = (function, offset, width, value, bus);
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub struct BusInterface {
    open_bus_byte: u8,
    router: AddressRouter,
    devices: DeviceRegistry,
    pci: PciBus,
}

impl Default for BusInterface {
    fn default() -> Self {
        BusInterface::new(OPEN_BUS_BYTE, PCI_DEFAULT_PIRQ_LINES)
    }
}

impl BusInterface {
    pub fn new(open_bus_byte: u8, pirq_lines: u8) -> Self {
        Self {
            open_bus_byte,
            router: AddressRouter::new(),
            devices: DeviceRegistry::new(),
            pci: PciBus::new(pirq_lines),
        }
    }

    pub fn open_bus_byte(&self) -> u8 {
        self.open_bus_byte
    }

    /// The value an unmapped access of `width` returns.
    pub fn open_bus_value(&self, width: AccessWidth) -> u64 {
        u64::from_le_bytes([self.open_bus_byte; 8]) & width.mask()
    }

    pub fn router(&self) -> &AddressRouter {
        &self.router
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.devices
    }

    pub fn pci(&self) -> &PciBus {
        &self.pci
    }

    pub fn pci_mut(&mut self) -> &mut PciBus {
        &mut self.pci
    }

    /// Map an additional region on behalf of an attached device.
    pub fn register_region(&mut self, owner: DeviceHandle, desc: RegionDescriptor) -> Result<RegionId, BusError> {
        if !self.devices.contains(owner) {
            return Err(BusError::UnknownDevice(owner));
        }
        self.router.register(owner, desc)
    }

    pub fn unregister_region(&mut self, id: RegionId) -> Result<(), BusError> {
        self.router.unregister(id).map(|_| ())
    }

    pub fn remap_region(&mut self, id: RegionId, new_base: u64) -> Result<(), BusError> {
        self.router.remap(id, new_base)
    }

    /// Create a device from `factory` and attach it.
    pub fn attach(&mut self, factory: &dyn DeviceFactory, mut config: DeviceConfig) -> Result<DeviceHandle, BusError> {
        if config.role.is_none() {
            config.role = factory.default_role();
        }
        let device = factory.create(&config)?;
        self.attach_device(device, config)
    }

    /// Attach an already constructed device.
    ///
    /// All of the device's resources are checked before anything is claimed. A device whose
    /// regions or PCI functions collide with a device attached earlier is rejected as a whole
    /// and the earlier device keeps its resources.
    pub fn attach_device(&mut self, device: Box<dyn Device>, config: DeviceConfig) -> Result<DeviceHandle, BusError> {
        let name = device.name();
        let mapping = device.mapping();
        let functions = device.pci_functions();

        for desc in &mapping {
            if let Err(e) = self.router.check(None, desc, None) {
                return Err(match e {
                    BusError::Overlap {
                        space,
                        base,
                        end,
                        holder,
                        ..
                    } => BusError::ResourceConflict {
                        device: name,
                        space,
                        base,
                        end,
                        holder: self.devices.name_of(holder),
                    },
                    other => other,
                });
            }
        }

        let slot = match (functions.is_empty(), config.pci_slot) {
            (true, _) => None,
            (false, Some(slot)) => {
                self.pci.check_attach(slot, &functions)?;
                Some(slot)
            }
            (false, None) => {
                return Err(BusError::InvalidConfig {
                    device: name,
                    reason: String::from("device presents PCI functions but no PCI slot was given"),
                })
            }
        };

        let handle = self.devices.insert(
            device,
            DeviceInfo {
                name: name.clone(),
                role: config.role,
                instance: config.instance,
                label: config.label.clone(),
            },
        );

        for desc in mapping {
            if let Err(e) = self.router.register(handle, desc) {
                self.router.unregister_owner(handle);
                self.devices.remove(handle);
                return Err(e);
            }
        }

        if let Some(slot) = slot {
            self.pci.attach(slot, handle, functions);
        }

        log::debug!(
            "Attached {} ({}) as {}, role: {:?}",
            name,
            config.instance,
            handle,
            config.role
        );
        Ok(handle)
    }

    /// Remove a device and everything it claimed.
    pub fn detach(&mut self, handle: DeviceHandle) -> Result<(), BusError> {
        if !self.devices.contains(handle) {
            return Err(BusError::UnknownDevice(handle));
        }
        let name = self.devices.name_of(handle);
        self.pci.detach_owner(handle);
        let regions = self.router.unregister_owner(handle);
        self.devices.remove(handle);
        log::debug!("Detached {} ({}), released {} regions", name, handle, regions.len());
        Ok(())
    }

    /// Machine reset. PCI functions return to their power-on configuration and lose their BAR
    /// mappings, and every device is reset.
    pub fn reset(&mut self) {
        for id in self.pci.reset() {
            _ = self.router.unregister(id);
        }
        self.devices.reset_all();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        devices::post_card::PostCard,
        registry::{DeviceFactory, DeviceRole},
    };

    /// A test device that records accesses and answers reads with a pattern derived from the
    /// offset and the region tag.
    pub(crate) struct Probe {
        pub regions: Vec<RegionDescriptor>,
        pub log: Vec<(bool, BusAccess, u64)>,
    }

    impl Probe {
        pub(crate) fn new(regions: Vec<RegionDescriptor>) -> Self {
            Self {
                regions,
                log: Vec::new(),
            }
        }

        pub(crate) fn pattern(access: &BusAccess) -> u64 {
            let mut value = 0u64;
            for i in 0..access.width.bytes() as u64 {
                let byte = ((access.offset + i) as u8) ^ (access.tag as u8);
                value |= (byte as u64) << (i * 8);
            }
            value
        }
    }

    impl IoDevice for Probe {
        fn io_read(&mut self, access: &BusAccess, _bus: &mut BusInterface) -> u64 {
            let value = Probe::pattern(access);
            self.log.push((false, *access, value));
            value
        }

        fn io_write(&mut self, access: &BusAccess, value: u64, _bus: &mut BusInterface) {
            self.log.push((true, *access, value));
        }
    }

    impl MemoryMappedDevice for Probe {
        fn mmio_read(&mut self, access: &BusAccess, _bus: &mut BusInterface) -> u64 {
            let value = Probe::pattern(access);
            self.log.push((false, *access, value));
            value
        }

        fn mmio_write(&mut self, access: &BusAccess, value: u64, _bus: &mut BusInterface) {
            self.log.push((true, *access, value));
        }
    }

    impl Device for Probe {
        fn name(&self) -> String {
            String::from("Probe")
        }

        fn mapping(&self) -> Vec<RegionDescriptor> {
            self.regions.clone()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    pub(crate) fn attach_probe(bus: &mut BusInterface, regions: Vec<RegionDescriptor>) -> DeviceHandle {
        bus.attach_device(Box::new(Probe::new(regions)), DeviceConfig::new())
            .unwrap()
    }

    #[test]
    fn test_open_bus_fill() {
        let mut bus = BusInterface::new(0x5A, 4);
        assert_eq!(bus.read_u8(0x1234), 0x5A);
        assert_eq!(bus.read_u32(0x1234), 0x5A5A_5A5A);
        assert_eq!(bus.io_read_u16(0x3F8), 0x5A5A);
    }

    #[test]
    fn test_attach_then_detach_restores_open_bus() {
        let mut bus = BusInterface::default();
        let h = attach_probe(&mut bus, vec![
            RegionDescriptor::new(RegionKind::Mmio, 0xD0000, 0x100),
            RegionDescriptor::ports(0x300, 4),
        ]);
        assert_eq!(bus.read_u8(0xD0010), 0x10);
        assert_eq!(bus.io_read_u8(0x302), 0x02);

        bus.detach(h).unwrap();
        assert_eq!(bus.read_u8(0xD0010), OPEN_BUS_BYTE);
        assert_eq!(bus.io_read_u8(0x302), NO_IO_BYTE);
        assert!(bus.devices().resolve(h).is_none());
        assert!(matches!(bus.detach(h), Err(BusError::UnknownDevice(_))));
    }

    #[test]
    fn test_first_registered_wins() {
        let mut bus = BusInterface::default();
        let first = bus
            .attach(&crate::devices::DeviceKind::PostCard, DeviceConfig::new().with_io_base(0x80))
            .unwrap();
        let err = bus
            .attach(
                &crate::devices::DeviceKind::PostCard,
                DeviceConfig::new().with_io_base(0x80).with_instance(1),
            )
            .unwrap_err();
        match err {
            BusError::ResourceConflict { device, holder, base, .. } => {
                assert_eq!(base, 0x80);
                assert_eq!(device, "POST Card");
                assert_eq!(holder, "POST Card");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(bus.devices().len(), 1);

        bus.io_write_u8(0x80, 0x42);
        assert_eq!(bus.devices().resolve_as::<PostCard>(first).unwrap().last_code(), Some(0x42));
    }

    #[test]
    fn test_attach_is_all_or_nothing() {
        let mut bus = BusInterface::default();
        attach_probe(&mut bus, vec![RegionDescriptor::ports(0x3F8, 8)]);
        let gen = bus.router().generation();

        // First region is free, second collides: nothing of the new device may remain.
        let result = bus.attach_device(
            Box::new(Probe::new(vec![
                RegionDescriptor::new(RegionKind::Mmio, 0xC8000, 0x1000),
                RegionDescriptor::ports(0x3F8, 8),
            ])),
            DeviceConfig::new(),
        );
        assert!(result.is_err());
        assert_eq!(bus.router().generation(), gen);
        assert_eq!(bus.read_u8(0xC8000), OPEN_BUS_BYTE);
        assert_eq!(bus.devices().len(), 1);
    }

    #[test]
    fn test_instances_are_independent() {
        let mut bus = BusInterface::default();
        let kind = crate::devices::DeviceKind::PostCard;
        let a = bus.attach(&kind, DeviceConfig::new().with_io_base(0x80)).unwrap();
        let b = bus
            .attach(&kind, DeviceConfig::new().with_io_base(0x84).with_instance(1))
            .unwrap();

        bus.io_write_u8(0x84, 0x11);
        assert_eq!(bus.devices().resolve_as::<PostCard>(a).unwrap().last_code(), None);
        assert_eq!(bus.devices().resolve_as::<PostCard>(b).unwrap().last_code(), Some(0x11));
        assert_eq!(bus.devices().resolve_role(DeviceRole::Diagnostic, 1), Some(b));
        assert_eq!(kind.default_role(), Some(DeviceRole::Diagnostic));
    }

    #[test]
    fn test_register_region_for_unknown_owner() {
        let mut bus = BusInterface::default();
        let h = attach_probe(&mut bus, vec![RegionDescriptor::ports(0x100, 1)]);
        bus.detach(h).unwrap();
        let result = bus.register_region(h, RegionDescriptor::ports(0x200, 1));
        assert!(matches!(result, Err(BusError::UnknownDevice(_))));
    }

    const FILL: u8 = 0xEE;
    const WIDTHS: [AccessWidth; 4] = [AccessWidth::Byte, AccessWidth::Word, AccessWidth::Dword, AccessWidth::Qword];

    /// Up to five disjoint, possibly adjacent, memory regions as (base, size, tag).
    fn disjoint_regions() -> impl Strategy<Value = Vec<(u64, u64, u16)>> {
        prop::collection::vec((0u64..0x80, 1u64..0x80), 1..6).prop_map(|spans| {
            let mut next = 0;
            spans
                .into_iter()
                .enumerate()
                .map(|(i, (gap, size))| {
                    let region = (next + gap, size, i as u16 + 1);
                    next += gap + size;
                    region
                })
                .collect()
        })
    }

    fn region_at(regions: &[(u64, u64, u16)], address: u64) -> Option<(u64, u64, u16)> {
        regions
            .iter()
            .copied()
            .find(|(base, size, _)| (*base..base + size).contains(&address))
    }

    /// What a [Probe] answers at `address`, or the fill byte if nothing is mapped there.
    fn expected_read(regions: &[(u64, u64, u16)], address: u64, width: AccessWidth) -> u64 {
        (0..width.bytes() as u64).fold(0, |value, i| {
            let byte = match region_at(regions, address + i) {
                Some((base, _, tag)) => ((address + i - base) as u8) ^ (tag as u8),
                None => FILL,
            };
            value | ((byte as u64) << (i * 8))
        })
    }

    fn mapped_bus(regions: &[(u64, u64, u16)]) -> (BusInterface, Vec<DeviceHandle>) {
        let mut bus = BusInterface::new(FILL, 4);
        let handles = regions
            .iter()
            .map(|&(base, size, tag)| {
                attach_probe(&mut bus, vec![
                    RegionDescriptor::new(RegionKind::Mmio, base, size).with_tag(tag)
                ])
            })
            .collect();
        (bus, handles)
    }

    proptest! {
        #[test]
        fn prop_reads_match_mapping(regions in disjoint_regions(), address in 0u64..0x600, w in 0usize..4) {
            let (mut bus, _) = mapped_bus(&regions);
            let width = WIDTHS[w];
            prop_assert_eq!(bus.read(address, width), expected_read(&regions, address, width));
        }

        #[test]
        fn prop_writes_reach_only_mapped_bytes(
            regions in disjoint_regions(),
            address in 0u64..0x600,
            w in 0usize..4,
            value in any::<u64>()
        ) {
            let (mut bus, handles) = mapped_bus(&regions);
            let width = WIDTHS[w];
            bus.write(address, width, value);

            let mut delivered = 0;
            for (handle, &(base, size, _)) in handles.iter().zip(regions.iter()) {
                let probe = bus.devices().resolve_as::<Probe>(*handle).unwrap();
                for (is_write, access, v) in &probe.log {
                    prop_assert!(*is_write);
                    let bytes = access.width.bytes() as u64;
                    prop_assert!(access.address >= base && access.address + bytes <= base + size);
                    for i in 0..bytes {
                        let shift = (access.address + i - address) * 8;
                        prop_assert_eq!((v >> (i * 8)) as u8, (value >> shift) as u8);
                    }
                    delivered += bytes;
                }
            }
            let mapped = (address..address + width.bytes() as u64)
                .filter(|a| region_at(&regions, *a).is_some())
                .count() as u64;
            prop_assert_eq!(delivered, mapped);
        }

        #[test]
        fn prop_no_dispatch_after_unregister(
            regions in disjoint_regions(),
            victim in any::<prop::sample::Index>(),
            detach in any::<bool>(),
            address in 0u64..0x600,
            w in 0usize..4
        ) {
            let (mut bus, handles) = mapped_bus(&regions);
            let i = victim.index(regions.len());
            if detach {
                bus.detach(handles[i]).unwrap();
            }
            else {
                let id = bus.router().regions_owned_by(handles[i])[0];
                bus.unregister_region(id).unwrap();
            }

            let mut remaining = regions.clone();
            let (base, size, _) = remaining.remove(i);
            for a in base..base + size {
                prop_assert_eq!(bus.read_u8(a), FILL);
            }
            let width = WIDTHS[w];
            prop_assert_eq!(bus.read(address, width), expected_read(&remaining, address, width));
            if !detach {
                let probe = bus.devices().resolve_as::<Probe>(handles[i]).unwrap();
                prop_assert!(probe.log.is_empty());
            }
        }
    }
}
