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

//! The device registry.
//!
//! Devices are owned by the registry and referred to everywhere else by a [DeviceHandle], a
//! generational index. A handle kept after its device was detached simply stops resolving.
//! While a device is servicing a bus access it is checked out of its slot, so the handler can
//! be handed the whole [BusInterface](crate::bus::BusInterface) and reach any other device.

use std::{any::Any, fmt};

use serde_derive::Deserialize;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{bus::Device, error::BusError};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DeviceHandle {
    index: u32,
    generation: u32,
}

impl DeviceHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}.{}", self.index, self.generation)
    }
}

/// What a device does for the machine. Other devices use roles to find their peers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceRole {
    Memory,
    Firmware,
    HostBridge,
    IsaBridge,
    Chipset,
    SuperIo,
    KeyboardController,
    FloppyController,
    Video,
    Sound,
    Storage,
    Network,
    Diagnostic,
    Reserved,
}

/// Per-attachment configuration. Every attach of the same device type gets its own config and
/// its own device state.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub instance: u8,
    pub label: Option<String>,
    pub role: Option<DeviceRole>,
    pub io_base: Option<u16>,
    pub mem_base: Option<u64>,
    pub size: Option<u64>,
    pub irq: Option<u8>,
    pub pci_slot: Option<u8>,
}

impl DeviceConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_instance(mut self, instance: u8) -> Self {
        self.instance = instance;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_io_base(mut self, io_base: u16) -> Self {
        self.io_base = Some(io_base);
        self
    }

    pub fn with_mem_base(mut self, mem_base: u64) -> Self {
        self.mem_base = Some(mem_base);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_irq(mut self, irq: u8) -> Self {
        self.irq = Some(irq);
        self
    }

    pub fn with_pci_slot(mut self, slot: u8) -> Self {
        self.pci_slot = Some(slot);
        self
    }
}

/// Something that can produce a fresh device for a given configuration.
pub trait DeviceFactory {
    fn name(&self) -> String {
        String::from("device")
    }

    /// The role a device from this factory takes when the config does not name one.
    fn default_role(&self) -> Option<DeviceRole> {
        None
    }

    fn create(&self, config: &DeviceConfig) -> Result<Box<dyn Device>, BusError>;
}

impl<F> DeviceFactory for F
where
    F: Fn(&DeviceConfig) -> Box<dyn Device>,
{
    fn create(&self, config: &DeviceConfig) -> Result<Box<dyn Device>, BusError> {
        Ok(self(config))
    }
}

/// Registry bookkeeping for an attached device.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub role: Option<DeviceRole>,
    pub instance: u8,
    pub label: Option<String>,
}

impl DeviceInfo {
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None if self.instance > 0 => format!("{} #{}", self.name, self.instance),
            None => self.name.clone(),
        }
    }
}

struct DeviceEntry {
    generation: u32,
    info: Option<DeviceInfo>,
    device: Option<Box<dyn Device>>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
    free: Vec<u32>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn insert(&mut self, device: Box<dyn Device>, info: DeviceInfo) -> DeviceHandle {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.info = Some(info);
            entry.device = Some(device);
            DeviceHandle::new(index, entry.generation)
        }
        else {
            let index = self.entries.len() as u32;
            self.entries.push(DeviceEntry {
                generation: 0,
                info: Some(info),
                device: Some(device),
            });
            DeviceHandle::new(index, 0)
        }
    }

    /// Invalidate `handle` and return the device, if it was not checked out at the time.
    pub(crate) fn remove(&mut self, handle: DeviceHandle) -> Option<Box<dyn Device>> {
        let entry = self.entry_mut(handle)?;
        entry.generation = entry.generation.wrapping_add(1);
        entry.info = None;
        let device = entry.device.take();
        self.free.push(handle.index);
        device
    }

    pub fn contains(&self, handle: DeviceHandle) -> bool {
        self.entry(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.info.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self, handle: DeviceHandle) -> Option<&DeviceInfo> {
        self.entry(handle)?.info.as_ref()
    }

    /// Name of the device behind `handle`, or a placeholder for a stale handle.
    pub fn name_of(&self, handle: DeviceHandle) -> String {
        self.info(handle)
            .map(|i| i.display_name())
            .unwrap_or_else(|| format!("<detached {}>", handle))
    }

    /// Resolve a handle. Returns `None` for a stale handle or a device that is currently
    /// servicing an access.
    pub fn resolve(&self, handle: DeviceHandle) -> Option<&dyn Device> {
        self.entry(handle)?.device.as_deref()
    }

    pub fn resolve_mut(&mut self, handle: DeviceHandle) -> Option<&mut dyn Device> {
        match self.entry_mut(handle)?.device.as_deref_mut() {
            Some(device) => Some(device),
            None => None,
        }
    }

    pub fn resolve_as<T: Any>(&self, handle: DeviceHandle) -> Option<&T> {
        self.resolve(handle)?.as_any().downcast_ref::<T>()
    }

    pub fn resolve_as_mut<T: Any>(&mut self, handle: DeviceHandle) -> Option<&mut T> {
        self.resolve_mut(handle)?.as_any_mut().downcast_mut::<T>()
    }

    /// Find the device attached with `role` and `instance`.
    pub fn resolve_role(&self, role: DeviceRole, instance: u8) -> Option<DeviceHandle> {
        self.handles().find(|h| {
            self.info(*h)
                .map(|i| i.role == Some(role) && i.instance == instance)
                .unwrap_or(false)
        })
    }

    /// Live handles in attach-slot order.
    pub fn handles(&self) -> impl Iterator<Item = DeviceHandle> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.info.is_some())
            .map(|(i, e)| DeviceHandle::new(i as u32, e.generation))
    }

    pub(crate) fn checkout(&mut self, handle: DeviceHandle) -> Option<Box<dyn Device>> {
        self.entry_mut(handle)?.device.take()
    }

    /// Return a checked-out device. If the handle went stale while the device was out, the
    /// device is dropped.
    pub(crate) fn checkin(&mut self, handle: DeviceHandle, device: Box<dyn Device>) {
        match self.entry_mut(handle) {
            Some(entry) => entry.device = Some(device),
            None => log::debug!("Dropping device for {}: detached during access", handle),
        }
    }

    pub(crate) fn reset_all(&mut self) {
        for entry in self.entries.iter_mut() {
            if let Some(device) = entry.device.as_mut() {
                device.reset();
            }
        }
    }

    fn entry(&self, handle: DeviceHandle) -> Option<&DeviceEntry> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.generation == handle.generation && e.info.is_some())
    }

    fn entry_mut(&mut self, handle: DeviceHandle) -> Option<&mut DeviceEntry> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation && e.info.is_some())
    }
}
