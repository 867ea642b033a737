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

//! The `planar_config` crate parses Planar's main configuration file and overlays command line
//! arguments on top of it. Command line arguments always take priority over the configuration
//! file. It also reads the machine definition files the machine composer builds from.
//!
//! Features:
//! - `use_bpaf`: Enable BPAF support for command line argument parsing.

#[cfg(feature = "use_bpaf")]
mod bpaf_config;
pub mod machine_defs;

use std::path::{Path, PathBuf};

use planar_core::{
    machine_config::{MachineConfig, MachineDefinition},
    machine_types::{FdcMode, VideoSelection},
};

#[cfg(feature = "use_bpaf")]
pub use bpaf_config::{cli_args, CmdLineArgs};

use cfg_if::cfg_if;
use serde_derive::Deserialize;

/// Amount of RAM to install when neither the configuration nor the machine definition specify one.
pub const DEFAULT_RAM_KB: u32 = 640;

fn _default_machine_dir() -> PathBuf {
    PathBuf::from("machines")
}
fn _default_rom_dir() -> PathBuf {
    PathBuf::from("roms")
}

#[cfg(not(feature = "use_bpaf"))]
#[derive(Debug, Default)]
pub struct CmdLineArgs {
    pub config_file: Option<PathBuf>,
    pub base_dir: Option<PathBuf>,
    pub machine_config_name: Option<String>,
    pub ram_kb: Option<u32>,
    pub video: Option<VideoSelection>,
    pub fdc: Option<FdcMode>,
    pub no_roms: bool,
    pub machinescan: bool,
    pub dump_map: bool,
}

#[derive(Debug, Deserialize)]
pub struct Emulator {
    pub basedir: PathBuf,
    #[serde(default = "_default_machine_dir")]
    pub machine_dir: PathBuf,
    #[serde(default = "_default_rom_dir")]
    pub rom_dir: PathBuf,
    #[serde(default)]
    pub machinescan: bool,
    #[serde(default)]
    pub dump_map: bool,
}

#[derive(Debug, Deserialize)]
pub struct Machine {
    pub config_name: String,
    pub ram_kb: Option<u32>,
    #[serde(default)]
    pub video: VideoSelection,
    #[serde(default)]
    pub fdc: FdcMode,
    pub open_bus_byte: Option<u8>,
    #[serde(default)]
    pub no_roms: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfigFileParams {
    pub emulator: Emulator,
    pub machine: Machine,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(config_name) = shell_args.machine_config_name {
            self.machine.config_name = config_name;
        }
        if let Some(basedir) = shell_args.base_dir {
            self.emulator.basedir = basedir;
        }
        if let Some(ram_kb) = shell_args.ram_kb {
            self.machine.ram_kb = Some(ram_kb);
        }
        if let Some(video) = shell_args.video {
            self.machine.video = video;
        }
        if let Some(fdc) = shell_args.fdc {
            self.machine.fdc = fdc;
        }

        self.machine.no_roms |= shell_args.no_roms;
        self.emulator.machinescan |= shell_args.machinescan;
        self.emulator.dump_map |= shell_args.dump_map;
    }

    /// Resolve a path from the configuration against the base directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        }
        else {
            self.emulator.basedir.join(path)
        }
    }

    pub fn machine_dir(&self) -> PathBuf {
        self.resolve_path(&self.emulator.machine_dir)
    }

    pub fn rom_dir(&self) -> PathBuf {
        self.resolve_path(&self.emulator.rom_dir)
    }

    /// Selection options for building `definition`. RAM size falls back to the definition's
    /// default, then to [DEFAULT_RAM_KB].
    pub fn machine_config(&self, definition: Option<&MachineDefinition>) -> MachineConfig {
        let ram_kb = self
            .machine
            .ram_kb
            .or(definition.and_then(|d| d.ram_kb))
            .unwrap_or(DEFAULT_RAM_KB);

        MachineConfig {
            ram_kb,
            video: self.machine.video,
            fdc: self.machine.fdc,
            open_bus_byte: self.machine.open_bus_byte,
            rom_dir: self.rom_dir(),
            load_roms: !self.machine.no_roms,
        }
    }
}

pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams = toml::from_str(toml_string.as_ref())?;

    // Command line arguments override config file arguments
    toml_args.overlay(shell_args);

    Ok(toml_args)
}

fn shell_args() -> CmdLineArgs {
    let shell_args: CmdLineArgs;

    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            shell_args = cli_args().run();
        } else {
            log::debug!("Argument reading disabled...");
            shell_args = CmdLineArgs::default();
        }
    }

    shell_args
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args = shell_args();

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let toml_string = if let Some(configfile_path) = shell_args.config_file.as_ref() {
        std::fs::read_to_string(configfile_path)?
    }
    else {
        std::fs::read_to_string(default_path)?
    };

    read_config(toml_string, shell_args)
}

/// Read the TOML configuration from a string, parse and overlay command line arguments.
pub fn read_config_string(toml_string: impl AsRef<str>) -> Result<ConfigFileParams, anyhow::Error> {
    read_config(toml_string, shell_args())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[emulator]
basedir = "/opt/planar"
rom_dir = "roms"

[machine]
config_name = "ibm_at"
video = "external"
"#;

    fn args() -> CmdLineArgs {
        CmdLineArgs::default()
    }

    #[test]
    fn test_defaults() {
        let config = read_config(CONFIG, args()).unwrap();
        assert_eq!(config.machine.config_name, "ibm_at");
        assert_eq!(config.machine.video, VideoSelection::External);
        assert_eq!(config.machine.fdc, FdcMode::Internal);
        assert_eq!(config.machine_dir(), PathBuf::from("/opt/planar/machines"));
        assert!(!config.machine.no_roms);
    }

    #[test]
    fn test_overlay() {
        let mut shell_args = args();
        shell_args.machine_config_name = Some(String::from("i430fx"));
        shell_args.ram_kb = Some(8192);
        shell_args.no_roms = true;
        let config = read_config(CONFIG, shell_args).unwrap();
        assert_eq!(config.machine.config_name, "i430fx");

        let machine_config = config.machine_config(None);
        assert_eq!(machine_config.ram_kb, 8192);
        assert!(!machine_config.load_roms);
        assert_eq!(machine_config.rom_dir, PathBuf::from("/opt/planar/roms"));
    }

    #[test]
    fn test_ram_falls_back_to_definition() {
        let config = read_config(CONFIG, args()).unwrap();
        let definition: MachineDefinition = toml::from_str(
            r#"
name = "board"
ram_kb = 1024
"#,
        )
        .unwrap();
        assert_eq!(config.machine_config(Some(&definition)).ram_kb, 1024);
        assert_eq!(config.machine_config(None).ram_kb, DEFAULT_RAM_KB);
    }

    #[test]
    fn test_missing_section_fails() {
        assert!(read_config("[emulator]\nbasedir = \".\"\n", args()).is_err());
    }
}
