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

use std::path::PathBuf;

use bpaf::Bpaf;
use planar_core::machine_types::{FdcMode, VideoSelection};

#[derive(Bpaf)]
#[bpaf(options, version, generate(cli_args))]
#[derive(Debug, Default)]
pub struct CmdLineArgs {
    #[bpaf(long("config_file"), long("configfile"))]
    pub config_file: Option<PathBuf>,

    #[bpaf(long("base_dir"), long("basedir"))]
    pub base_dir: Option<PathBuf>,

    #[bpaf(long)]
    pub machine_config_name: Option<String>,

    #[bpaf(long("ram_kb"), long("ramkb"))]
    pub ram_kb: Option<u32>,

    #[bpaf(long)]
    pub video: Option<VideoSelection>,

    #[bpaf(long)]
    pub fdc: Option<FdcMode>,

    #[bpaf(long, switch)]
    pub no_roms: bool,

    #[bpaf(long("machine_scan"), long("machinescan"), switch)]
    pub machinescan: bool,

    /// Print the memory and I/O maps of the composed machine.
    #[bpaf(long("dump_map"), long("dumpmap"), switch)]
    pub dump_map: bool,
}
