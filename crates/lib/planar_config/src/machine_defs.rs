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

//! Machine definition file discovery.
//!
//! Every `*.toml` file in the machine directory may hold any number of `[[machine]]` tables.
//! Files are read in name order so duplicate machine names are reported deterministically.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use planar_core::machine_config::{MachineDefinition, MachineDefinitionFile};

pub fn parse_machine_definitions(toml_string: &str) -> Result<Vec<MachineDefinition>, anyhow::Error> {
    let file: MachineDefinitionFile = toml::from_str(toml_string)?;
    Ok(file.machine)
}

/// List the definition files in `dir`, sorted by name.
pub fn find_definition_files(dir: &Path) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading machine directory {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("toml")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read every machine definition in `dir`.
pub fn load_machine_definitions(dir: &Path) -> Result<Vec<MachineDefinition>, anyhow::Error> {
    let mut definitions = Vec::new();
    for path in find_definition_files(dir)? {
        log::debug!("Reading machine definitions from {}", path.display());
        let toml_string = fs::read_to_string(&path)?;
        let machines =
            parse_machine_definitions(&toml_string).with_context(|| format!("parsing {}", path.display()))?;
        log::debug!("Found {} machine(s) in {}", machines.len(), path.display());
        definitions.extend(machines);
    }
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planar_core::{
        devices::DeviceKind,
        machine_config::{MachineConfig, TopologyStep},
        machine::MachineBuilder,
    };

    const AT_DEFS: &str = include_str!("../../../../install/machines/at.toml");
    const PCI_DEFS: &str = include_str!("../../../../install/machines/pci.toml");

    #[test]
    fn test_install_definitions_parse() {
        let at = parse_machine_definitions(AT_DEFS).unwrap();
        let pci = parse_machine_definitions(PCI_DEFS).unwrap();
        assert!(!at.is_empty());
        assert!(!pci.is_empty());

        let i430fx = pci.iter().find(|d| d.name == "i430fx").unwrap();
        assert!(i430fx.step.iter().any(|s| matches!(
            s,
            TopologyStep::Attach {
                device: DeviceKind::PciIsaBridge,
                ..
            }
        )));
    }

    #[test]
    fn test_install_definitions_build_without_roms() {
        let config = MachineConfig {
            ram_kb: 4096,
            load_roms: false,
            ..Default::default()
        };
        for def in parse_machine_definitions(AT_DEFS)
            .unwrap()
            .iter()
            .chain(parse_machine_definitions(PCI_DEFS).unwrap().iter())
        {
            let topology = def.topology();
            if let Err(e) = MachineBuilder::new(&topology, &config).build() {
                panic!("{} failed to build: {}", def.name, e);
            }
        }
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.toml"), PCI_DEFS).unwrap();
        fs::write(dir.path().join("a.toml"), AT_DEFS).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a definition").unwrap();

        let files = find_definition_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.toml"));

        let defs = load_machine_definitions(dir.path()).unwrap();
        assert_eq!(
            defs.len(),
            parse_machine_definitions(AT_DEFS).unwrap().len() + parse_machine_definitions(PCI_DEFS).unwrap().len()
        );
    }

    #[test]
    fn test_bad_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.toml"), "[[machine]]\nstep = 5\n").unwrap();
        let err = load_machine_definitions(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }
}
