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

//! Planar headless front-end main library component.
//!
//! Reads the configuration, loads machine definitions, composes the selected machine and prints
//! what the composer built: the memory map, the I/O port map and the PCI topology.

#![forbid(unsafe_code)]

use std::fmt::Write;

use planar_config::{machine_defs::load_machine_definitions, ConfigFileParams};
use planar_core::{
    bus::{AddressSpace, BusInterface},
    machine::{Machine, MachineManager},
    pci::PciInterruptPin,
};

/// Address of the first instruction fetched after reset on an x86.
pub const RESET_VECTOR: u64 = 0xFFFF0;

pub fn run() {
    env_logger::init();

    let config = match planar_config::read_config_file("./planar.toml") {
        Ok(config) => config,
        Err(e) => match e.downcast_ref::<std::io::Error>() {
            Some(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "Configuration file not found! Please create planar.toml in the emulator directory \
                               or provide the path to configuration file with --configfile."
                );
                std::process::exit(1);
            }
            Some(e) => {
                eprintln!("Unknown IO error reading configuration file:\n{}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!(
                    "Failed to parse configuration file. There may be a typo or otherwise invalid toml:\n{}",
                    e
                );
                std::process::exit(1);
            }
        },
    };

    let mut machine_manager = MachineManager::new();
    let definitions = load_machine_definitions(&config.machine_dir()).unwrap_or_else(|err| {
        eprintln!("Error loading machine definition files: {:#}", err);
        std::process::exit(1);
    });
    if let Err(err) = machine_manager.add_definitions(definitions) {
        eprintln!("Error loading machine definition files: {}", err);
        std::process::exit(1);
    }

    let machine_names = machine_manager.names();
    let config_name = config.machine.config_name.clone();
    let have_machine_config = machine_names.contains(&config_name);

    // Do --machinescan commandline argument. We print the machines we know about and then quit.
    if config.emulator.machinescan {
        for name in &machine_names {
            if let Some(def) = machine_manager.definition(name) {
                println!("Machine: {} ({} steps)", name, def.step.len());
                if let Some(description) = &def.description {
                    println!("  {}", description);
                }
            }
        }
        if !have_machine_config {
            println!("Warning! No matching configuration found for: {}", config_name);
            std::process::exit(1);
        }
        std::process::exit(0);
    }

    if !have_machine_config {
        eprintln!("No machine configuration for specified config name: {}", config_name);
        std::process::exit(1);
    }

    let machine_config = config.machine_config(machine_manager.definition(&config_name));
    log::debug!("Machine options: {:?}", machine_config);

    let machine = match machine_manager.select(&config_name, &machine_config) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("Failed to build machine: {}", err);
            std::process::exit(1);
        }
    };

    print!("{}", report(machine, &config));
}

/// Everything the headless frontend prints about a composed machine.
pub fn report(machine: &Machine, config: &ConfigFileParams) -> String {
    let mut out = String::new();
    _ = writeln!(
        out,
        "Machine: {} ({}K RAM, video: {}, fdc: {})",
        machine.name(),
        machine.config().ram_kb,
        machine.config().video,
        machine.config().fdc
    );
    out.push_str(&format_map(machine.bus(), AddressSpace::Memory));
    out.push_str(&format_map(machine.bus(), AddressSpace::Io));
    if config.emulator.dump_map {
        out.push_str(&format_regions(machine.bus()));
    }
    out.push_str(&format_pci_topology(machine.bus()));
    out.push_str(&format_reset_vector(machine.bus()));
    out
}

pub fn format_map(bus: &BusInterface, space: AddressSpace) -> String {
    let mut out = String::new();
    let entries = bus.router().map(space);
    _ = writeln!(out, "{} map ({} spans):", space, entries.len());
    for entry in entries {
        let width = match space {
            AddressSpace::Memory => 8,
            AddressSpace::Io => 4,
        };
        _ = writeln!(
            out,
            "  {:0w$X}-{:0w$X} {:<5} {} {}",
            entry.start,
            entry.end - 1,
            entry.kind,
            entry.region,
            bus.devices().name_of(entry.owner),
            w = width
        );
    }
    out
}

/// Every registered region, including ones shadowed in the flattened maps.
pub fn format_regions(bus: &BusInterface) -> String {
    let mut out = String::new();
    _ = writeln!(out, "Regions (generation {}):", bus.router().generation());
    for region in bus.router().regions() {
        let desc = &region.desc;
        _ = writeln!(
            out,
            "  {} {:<5} {:08X}+{:X} tag {:04X} offset {:X}{} {}",
            region.id,
            desc.kind,
            desc.base,
            desc.size,
            desc.tag,
            desc.device_offset,
            if desc.shadow { " shadow" } else { "" },
            bus.devices().name_of(region.owner)
        );
    }
    out
}

pub fn format_pci_topology(bus: &BusInterface) -> String {
    let mut out = String::new();
    let routing = bus.pci().routing();
    if routing.slots().next().is_none() {
        return out;
    }

    _ = writeln!(out, "PCI slots:");
    for slot in routing.slots() {
        let pins: Vec<String> = PciInterruptPin::ALL
            .iter()
            .map(|pin| match routing.irq_for(slot.slot, *pin) {
                Some(line) => format!("{}->PIRQ{}", pin, line),
                None => format!("{}->-", pin),
            })
            .collect();
        _ = writeln!(out, "  {:02X} {:<11} {}", slot.slot, slot.kind, pins.join(" "));
    }

    _ = writeln!(out, "PIRQ steering:");
    for line in 1..=routing.lines() {
        let route = match routing.pirq_route(line) {
            Some(irq) => format!("IRQ {}", irq),
            None => String::from("disabled"),
        };
        _ = writeln!(out, "  PIRQ{} -> {}", line, route);
    }

    _ = writeln!(out, "PCI functions:");
    for function in bus.pci().functions() {
        let cs = function.config();
        let (class, subclass, prog_if) = cs.class_code();
        _ = writeln!(
            out,
            "  {} {:04X}:{:04X} class {:02X}{:02X}{:02X} {} [{}]",
            function.address,
            cs.vendor_id(),
            cs.device_id(),
            class,
            subclass,
            prog_if,
            bus.devices().name_of(function.owner),
            function.state()
        );
    }
    out
}

pub fn format_reset_vector(bus: &BusInterface) -> String {
    let mut bytes = [0u8; 16];
    bus.peek_range(RESET_VECTOR, &mut bytes);
    let hex: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
    format!("Reset vector {:05X}: {}\n", RESET_VECTOR, hex.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use planar_config::{machine_defs::parse_machine_definitions, read_config, CmdLineArgs};

    const CONFIG: &str = r#"
[emulator]
basedir = "."
dump_map = true

[machine]
config_name = "i430fx"
no_roms = true
"#;

    fn build(name: &str) -> (Machine, ConfigFileParams) {
        let config = read_config(CONFIG, CmdLineArgs::default()).unwrap();
        let mut manager = MachineManager::new();
        manager
            .add_definitions(parse_machine_definitions(include_str!("../../../../install/machines/pci.toml")).unwrap())
            .unwrap();
        let machine_config = config.machine_config(manager.definition(name));
        let def = manager.definition(name).unwrap().topology();
        let machine = planar_core::machine::MachineBuilder::new(&def, &machine_config)
            .build()
            .unwrap();
        (machine, config)
    }

    #[test]
    fn test_report_lists_topology() {
        let (machine, config) = build("i430fx");
        let report = report(&machine, &config);
        assert!(report.contains("Machine: i430fx (8192K RAM"));
        assert!(report.contains("PIRQ1 -> IRQ 11"));
        assert!(report.contains("PIRQ3 -> disabled"));
        assert!(report.contains("00:07.0 8086:122E class 060100"));
        assert!(report.contains("0CF8-0CFB"));
        assert!(report.contains("Regions (generation"));
        // No ROM loaded: the reset vector reads open bus.
        assert!(report.contains("Reset vector FFFF0: FF FF"));
    }

    #[test]
    fn test_slot_rotation_shown() {
        let (machine, _) = build("i430fx");
        let topology = format_pci_topology(machine.bus());
        assert!(topology.contains("0E normal      INTA#->PIRQ2 INTB#->PIRQ3 INTC#->PIRQ4 INTD#->PIRQ1"));
    }
}
