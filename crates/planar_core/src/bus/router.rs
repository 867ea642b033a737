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

//! The address router.
//!
//! The router keeps the set of registered regions and, per address space, a flattened list of
//! non-overlapping spans sorted by start address. Each span records the region that wins at
//! those addresses. Any change to the region set rebuilds the affected span list, so a lookup
//! is a single binary search and never observes a half-applied change.

use std::collections::{BTreeMap, VecDeque};

use crate::{
    bus::{AddressSpace, Region, RegionDescriptor, RegionId, RegionKind},
    error::BusError,
    registry::DeviceHandle,
};

/// Number of change events retained by the router.
pub const REGION_EVENT_LOG_LEN: usize = 256;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionEventKind {
    Registered,
    Unregistered,
    Remapped { old_base: u64 },
}

/// A record of a change to the address map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionEvent {
    pub generation: u64,
    pub id: RegionId,
    pub owner: DeviceHandle,
    pub space: AddressSpace,
    pub base: u64,
    pub size: u64,
    pub kind: RegionEventKind,
}

/// One entry of the flattened address map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MapEntry {
    pub start: u64,
    pub end: u64,
    pub region: RegionId,
    pub owner: DeviceHandle,
    pub kind: RegionKind,
    pub tag: u16,
}

#[derive(Copy, Clone, Debug)]
struct Span {
    start: u64,
    end: u64,
    id: RegionId,
}

#[derive(Default)]
pub struct AddressRouter {
    regions: BTreeMap<RegionId, Region>,
    mem_spans: Vec<Span>,
    io_spans: Vec<Span>,
    next_id: u32,
    next_seq: u64,
    generation: u64,
    events: VecDeque<RegionEvent>,
}

impl AddressRouter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Checks that a descriptor describes a valid range in its address space.
    pub fn validate(desc: &RegionDescriptor) -> Result<(), BusError> {
        let space = desc.space();
        if desc.size == 0 {
            return Err(BusError::InvalidRegion(format!(
                "{} region at {:#X} has zero length",
                space, desc.base
            )));
        }
        if desc.widths.is_empty() {
            return Err(BusError::InvalidRegion(format!(
                "{} region at {:#X} accepts no access widths",
                space, desc.base
            )));
        }
        match desc.base.checked_add(desc.size) {
            Some(end) if end <= space.limit() => Ok(()),
            _ => Err(BusError::InvalidRegion(format!(
                "{} region {:#X}+{:#X} exceeds the address space limit of {:#X}",
                space,
                desc.base,
                desc.size,
                space.limit()
            ))),
        }
    }

    /// Checks whether `desc` could be registered on behalf of `owner`.
    ///
    /// A conflict is any overlapping region, of the same or a higher tier, that belongs to a
    /// different device, unless the new region is an MMIO or I/O region with `shadow` set.
    /// `owner` may be `None` for a device that has not been inserted yet. `ignore` excludes one
    /// region from the check, which is used when a region is remapped.
    pub fn check(
        &self,
        owner: Option<DeviceHandle>,
        desc: &RegionDescriptor,
        ignore: Option<RegionId>,
    ) -> Result<(), BusError> {
        AddressRouter::validate(desc)?;
        let space = desc.space();
        let tier = desc.kind.tier();

        for existing in self.regions.values() {
            if Some(existing.id) == ignore || existing.desc.space() != space {
                continue;
            }
            if !existing.desc.overlaps(desc.base, desc.end()) || existing.desc.kind.tier() < tier {
                continue;
            }
            if Some(existing.owner) == owner {
                continue;
            }
            if desc.shadow && desc.kind.may_shadow() {
                continue;
            }
            return Err(BusError::Overlap {
                space,
                base: desc.base,
                end: desc.end(),
                existing: existing.id,
                holder: existing.owner,
            });
        }
        Ok(())
    }

    pub fn register(&mut self, owner: DeviceHandle, desc: RegionDescriptor) -> Result<RegionId, BusError> {
        self.check(Some(owner), &desc, None)?;

        let id = RegionId(self.next_id);
        self.next_id += 1;
        let space = desc.space();
        let region = Region {
            id,
            owner,
            desc,
            seq: self.next_seq(),
        };

        log::debug!(
            "Registered {} region {} [{:#X}..{:#X}) for {}",
            region.desc.kind,
            id,
            region.base(),
            region.end(),
            owner
        );
        self.push_event(&region, RegionEventKind::Registered);
        self.regions.insert(id, region);
        self.rebuild(space);
        Ok(id)
    }

    pub fn unregister(&mut self, id: RegionId) -> Result<Region, BusError> {
        let region = self.regions.remove(&id).ok_or(BusError::UnknownRegion(id))?;
        log::debug!(
            "Unregistered {} region {} [{:#X}..{:#X})",
            region.desc.kind,
            id,
            region.base(),
            region.end()
        );
        self.push_event(&region, RegionEventKind::Unregistered);
        self.rebuild(region.desc.space());
        Ok(region)
    }

    /// Remove every region belonging to `owner`.
    pub fn unregister_owner(&mut self, owner: DeviceHandle) -> Vec<Region> {
        self.regions_owned_by(owner)
            .into_iter()
            .filter_map(|id| self.unregister(id).ok())
            .collect()
    }

    /// Move a region to a new base. The move happens in one step: either the region is found
    /// at the new base or, if the move would conflict, it stays where it was.
    pub fn remap(&mut self, id: RegionId, new_base: u64) -> Result<(), BusError> {
        let region = self.regions.get(&id).ok_or(BusError::UnknownRegion(id))?;
        let old_base = region.desc.base;
        if old_base == new_base {
            return Ok(());
        }
        let mut desc = region.desc.clone();
        desc.base = new_base;
        self.check(Some(region.owner), &desc, Some(id))?;

        let seq = self.next_seq();
        let space = desc.space();
        if let Some(region) = self.regions.get_mut(&id) {
            region.desc = desc;
            region.seq = seq;
        }
        if let Some(region) = self.regions.get(&id).cloned() {
            log::debug!(
                "Remapped {} region {} from {:#X} to {:#X}",
                region.desc.kind,
                id,
                old_base,
                new_base
            );
            self.push_event(&region, RegionEventKind::Remapped { old_base });
        }
        self.rebuild(space);
        Ok(())
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn regions_owned_by(&self, owner: DeviceHandle) -> Vec<RegionId> {
        self.regions
            .values()
            .filter(|r| r.owner == owner)
            .map(|r| r.id)
            .collect()
    }

    pub fn find_tagged(&self, owner: DeviceHandle, space: AddressSpace, tag: u16) -> Option<RegionId> {
        self.regions
            .values()
            .find(|r| r.owner == owner && r.desc.space() == space && r.desc.tag == tag)
            .map(|r| r.id)
    }

    /// Find the region that wins at `address`, together with the exclusive end of the span over
    /// which it keeps winning.
    pub fn resolve(&self, space: AddressSpace, address: u64) -> Option<(&Region, u64)> {
        let spans = self.spans(space);
        let idx = spans.partition_point(|s| s.start <= address);
        if idx == 0 {
            return None;
        }
        let span = &spans[idx - 1];
        if address >= span.end {
            return None;
        }
        self.regions.get(&span.id).map(|r| (r, span.end))
    }

    /// Increments on every change to the region set.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn events(&self) -> impl Iterator<Item = &RegionEvent> {
        self.events.iter()
    }

    /// Events recorded after generation `since`.
    pub fn events_since(&self, since: u64) -> impl Iterator<Item = &RegionEvent> {
        self.events.iter().filter(move |e| e.generation > since)
    }

    /// The flattened map of an address space, in address order.
    pub fn map(&self, space: AddressSpace) -> Vec<MapEntry> {
        self.spans(space)
            .iter()
            .filter_map(|span| {
                self.regions.get(&span.id).map(|r| MapEntry {
                    start: span.start,
                    end: span.end,
                    region: r.id,
                    owner: r.owner,
                    kind: r.desc.kind,
                    tag: r.desc.tag,
                })
            })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        let ids: Vec<RegionId> = self.regions.keys().copied().collect();
        for id in ids {
            _ = self.unregister(id);
        }
    }

    fn spans(&self, space: AddressSpace) -> &[Span] {
        match space {
            AddressSpace::Memory => &self.mem_spans,
            AddressSpace::Io => &self.io_spans,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn push_event(&mut self, region: &Region, kind: RegionEventKind) {
        self.generation += 1;
        if self.events.len() == REGION_EVENT_LOG_LEN {
            self.events.pop_front();
        }
        self.events.push_back(RegionEvent {
            generation: self.generation,
            id: region.id,
            owner: region.owner,
            space: region.desc.space(),
            base: region.desc.base,
            size: region.desc.size,
            kind,
        });
    }

    fn rebuild(&mut self, space: AddressSpace) {
        let spans = build_spans(&self.regions, space);
        match space {
            AddressSpace::Memory => self.mem_spans = spans,
            AddressSpace::Io => self.io_spans = spans,
        }
    }
}

fn build_spans(regions: &BTreeMap<RegionId, Region>, space: AddressSpace) -> Vec<Span> {
    let members: Vec<&Region> = regions.values().filter(|r| r.desc.space() == space).collect();

    let mut bounds: Vec<u64> = members.iter().flat_map(|r| [r.base(), r.end()]).collect();
    bounds.sort_unstable();
    bounds.dedup();

    let mut spans: Vec<Span> = Vec::new();
    for pair in bounds.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let winner = members
            .iter()
            .filter(|r| r.base() <= start && r.end() >= end)
            .max_by_key(|r| (r.desc.kind.tier(), r.seq));

        if let Some(region) = winner {
            match spans.last_mut() {
                Some(last) if last.end == start && last.id == region.id => last.end = end,
                _ => spans.push(Span {
                    start,
                    end,
                    id: region.id,
                }),
            }
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(index: u32) -> DeviceHandle {
        DeviceHandle::new(index, 0)
    }

    #[test]
    fn test_resolve_empty() {
        let router = AddressRouter::new();
        assert!(router.resolve(AddressSpace::Memory, 0).is_none());
        assert!(router.resolve(AddressSpace::Io, 0x80).is_none());
    }

    #[test]
    fn test_invalid_regions() {
        let mut router = AddressRouter::new();
        let zero = RegionDescriptor::new(RegionKind::Ram, 0, 0);
        assert!(matches!(router.register(owner(0), zero), Err(BusError::InvalidRegion(_))));

        let past_ports = RegionDescriptor::ports(0xFFFF, 2);
        assert!(matches!(router.register(owner(0), past_ports), Err(BusError::InvalidRegion(_))));

        let past_memory = RegionDescriptor::new(RegionKind::Mmio, 0xFFFF_F000, 0x2000);
        assert!(matches!(router.register(owner(0), past_memory), Err(BusError::InvalidRegion(_))));
        assert_eq!(router.generation(), 0);
    }

    #[test]
    fn test_higher_tier_shadows_lower() {
        let mut router = AddressRouter::new();
        let ram = router
            .register(owner(0), RegionDescriptor::new(RegionKind::Ram, 0, 0x10000))
            .unwrap();
        let mmio = router
            .register(owner(1), RegionDescriptor::new(RegionKind::Mmio, 0x8000, 0x1000))
            .unwrap();

        assert_eq!(router.resolve(AddressSpace::Memory, 0x7FFF).unwrap().0.id, ram);
        let (region, span_end) = router.resolve(AddressSpace::Memory, 0x8000).unwrap();
        assert_eq!(region.id, mmio);
        assert_eq!(span_end, 0x9000);
        assert_eq!(router.resolve(AddressSpace::Memory, 0x9000).unwrap().0.id, ram);

        // Removing the MMIO window falls through to RAM.
        router.unregister(mmio).unwrap();
        assert_eq!(router.resolve(AddressSpace::Memory, 0x8000).unwrap().0.id, ram);
    }

    #[test]
    fn test_lower_tier_cannot_land_on_higher() {
        let mut router = AddressRouter::new();
        router
            .register(owner(0), RegionDescriptor::new(RegionKind::Rom, 0xF0000, 0x10000))
            .unwrap();
        let err = router
            .register(owner(1), RegionDescriptor::new(RegionKind::Ram, 0xE0000, 0x20000))
            .unwrap_err();
        assert!(matches!(err, BusError::Overlap { holder, .. } if holder == owner(0)));
    }

    #[test]
    fn test_rom_overlap_rejected_even_with_shadow() {
        let mut router = AddressRouter::new();
        router
            .register(owner(0), RegionDescriptor::new(RegionKind::Rom, 0xF0000, 0x10000))
            .unwrap();
        let desc = RegionDescriptor::new(RegionKind::Rom, 0xF8000, 0x8000).with_shadow(true);
        assert!(router.register(owner(1), desc).is_err());
    }

    #[test]
    fn test_shadow_flag_allows_mmio_over_mmio() {
        let mut router = AddressRouter::new();
        let first = router
            .register(owner(0), RegionDescriptor::new(RegionKind::Mmio, 0xE000_0000, 0x1000))
            .unwrap();
        let plain = RegionDescriptor::new(RegionKind::Mmio, 0xE000_0000, 0x1000);
        assert!(router.register(owner(1), plain.clone()).is_err());

        let second = router.register(owner(1), plain.with_shadow(true)).unwrap();
        // Equal tiers: the most recently registered region wins.
        assert_eq!(router.resolve(AddressSpace::Memory, 0xE000_0800).unwrap().0.id, second);
        router.unregister(second).unwrap();
        assert_eq!(router.resolve(AddressSpace::Memory, 0xE000_0800).unwrap().0.id, first);
    }

    #[test]
    fn test_same_owner_may_overlap() {
        let mut router = AddressRouter::new();
        let low = router
            .register(owner(0), RegionDescriptor::ports(0x3F0, 8))
            .unwrap();
        let high = router
            .register(owner(0), RegionDescriptor::ports(0x3F4, 2).with_tag(1))
            .unwrap();
        assert_eq!(router.resolve(AddressSpace::Io, 0x3F3).unwrap().0.id, low);
        assert_eq!(router.resolve(AddressSpace::Io, 0x3F5).unwrap().0.id, high);
        assert_eq!(router.resolve(AddressSpace::Io, 0x3F6).unwrap().0.id, low);
        assert_eq!(router.find_tagged(owner(0), AddressSpace::Io, 1), Some(high));
    }

    #[test]
    fn test_spaces_are_independent() {
        let mut router = AddressRouter::new();
        router
            .register(owner(0), RegionDescriptor::new(RegionKind::Mmio, 0x80, 1))
            .unwrap();
        router.register(owner(1), RegionDescriptor::ports(0x80, 1)).unwrap();
        assert_eq!(router.map(AddressSpace::Memory).len(), 1);
        assert_eq!(router.map(AddressSpace::Io).len(), 1);
    }

    #[test]
    fn test_remap_is_atomic() {
        let mut router = AddressRouter::new();
        let a = router
            .register(owner(0), RegionDescriptor::new(RegionKind::Mmio, 0xE000_0000, 0x1000))
            .unwrap();
        router
            .register(owner(1), RegionDescriptor::new(RegionKind::Mmio, 0xE001_0000, 0x1000))
            .unwrap();

        let gen = router.generation();
        assert!(router.remap(a, 0xE001_0000).is_err());
        assert_eq!(router.generation(), gen);
        assert_eq!(router.resolve(AddressSpace::Memory, 0xE000_0000).unwrap().0.id, a);

        router.remap(a, 0xE002_0000).unwrap();
        assert!(router.resolve(AddressSpace::Memory, 0xE000_0000).is_none());
        assert_eq!(router.resolve(AddressSpace::Memory, 0xE002_0FFF).unwrap().0.id, a);

        let events: Vec<_> = router.events_since(gen).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RegionEventKind::Remapped { old_base: 0xE000_0000 });

        // Remapping to the current base is not a change.
        router.remap(a, 0xE002_0000).unwrap();
        assert_eq!(router.generation(), gen + 1);
    }

    #[test]
    fn test_unregister_owner() {
        let mut router = AddressRouter::new();
        router.register(owner(3), RegionDescriptor::ports(0x60, 1)).unwrap();
        router.register(owner(3), RegionDescriptor::ports(0x64, 1)).unwrap();
        router.register(owner(4), RegionDescriptor::ports(0x80, 1)).unwrap();

        assert_eq!(router.unregister_owner(owner(3)).len(), 2);
        assert!(router.resolve(AddressSpace::Io, 0x60).is_none());
        assert!(router.resolve(AddressSpace::Io, 0x80).is_some());
        assert!(matches!(router.unregister(RegionId(99)), Err(BusError::UnknownRegion(_))));
    }

    #[test]
    fn test_adjacent_spans_merge() {
        let mut router = AddressRouter::new();
        let ram = router
            .register(owner(0), RegionDescriptor::new(RegionKind::Ram, 0, 0x1000))
            .unwrap();
        let mmio = router
            .register(owner(1), RegionDescriptor::new(RegionKind::Mmio, 0x400, 0x100))
            .unwrap();
        router.unregister(mmio).unwrap();
        let map = router.map(AddressSpace::Memory);
        assert_eq!(map.len(), 1);
        assert_eq!((map[0].start, map[0].end, map[0].region), (0, 0x1000, ram));
    }
}
