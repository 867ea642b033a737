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

//! ROM image loading.
//!
//! Firmware images come as a single linear file, as an even/odd pair of byte-interleaved
//! files (one per ROM chip on a 16-bit bus), or as several parts concatenated in order. The
//! assembled image is fitted to the length of the ROM window it is mapped into.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_derive::Deserialize;
use strum_macros::{Display, EnumString};

use crate::{bus::MEMORY_ADDRESS_LIMIT, error::BusError};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RomLayout {
    #[default]
    Linear,
    Interleaved,
    Combined,
}

/// A ROM image to load and where to map it.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct RomLoad {
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub layout: RomLayout,
    pub base: u64,
    pub length: u64,
    /// Bytes to skip at the start of a linear image.
    #[serde(default)]
    pub skip: u64,
    /// Also map the image just below 4GB, where a 386+ starts fetching after reset.
    #[serde(default)]
    pub alias_top: bool,
}

impl RomLoad {
    pub fn linear(path: impl Into<PathBuf>, base: u64, length: u64) -> Self {
        Self {
            files: vec![path.into()],
            layout: RomLayout::Linear,
            base,
            length,
            skip: 0,
            alias_top: false,
        }
    }

    pub fn interleaved(even: impl Into<PathBuf>, odd: impl Into<PathBuf>, base: u64, length: u64) -> Self {
        Self {
            files: vec![even.into(), odd.into()],
            layout: RomLayout::Interleaved,
            ..RomLoad::linear(PathBuf::new(), base, length)
        }
    }

    pub fn combined(parts: Vec<PathBuf>, base: u64, length: u64) -> Self {
        Self {
            files: parts,
            layout: RomLayout::Combined,
            ..RomLoad::linear(PathBuf::new(), base, length)
        }
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_alias_top(mut self, alias_top: bool) -> Self {
        self.alias_top = alias_top;
        self
    }

    /// Read the files relative to `rom_dir` and assemble the image.
    pub fn read_image(&self, rom_dir: &Path) -> Result<Vec<u8>, BusError> {
        let mut parts = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let path = rom_dir.join(file);
            log::debug!("Reading ROM file: {}", path.display());
            let data = fs::read(&path).map_err(|source| BusError::RomLoad { path, source })?;
            parts.push(data);
        }
        self.build_image(parts)
    }

    /// Assemble an image from file contents, in the order of `files`.
    pub fn build_image(&self, mut parts: Vec<Vec<u8>>) -> Result<Vec<u8>, BusError> {
        if self.length == 0 {
            return Err(BusError::RomImage(String::from("ROM length must be non-zero")));
        }
        match self.base.checked_add(self.length) {
            Some(end) if end <= MEMORY_ADDRESS_LIMIT => {}
            _ => {
                return Err(BusError::RomImage(format!(
                    "ROM window {:#X}+{:#X} exceeds the 4GB address space",
                    self.base, self.length
                )))
            }
        }
        let image = match self.layout {
            RomLayout::Linear => {
                if parts.len() != 1 {
                    return Err(BusError::RomImage(format!(
                        "a linear ROM takes one file, got {}",
                        parts.len()
                    )));
                }
                let data = parts.remove(0);
                let skip = self.skip as usize;
                if skip >= data.len() {
                    return Err(BusError::RomImage(format!(
                        "skip of {:#X} bytes leaves nothing of a {:#X} byte image",
                        skip,
                        data.len()
                    )));
                }
                data[skip..].to_vec()
            }
            RomLayout::Interleaved => {
                if parts.len() != 2 {
                    return Err(BusError::RomImage(format!(
                        "an interleaved ROM takes an even and an odd file, got {} files",
                        parts.len()
                    )));
                }
                interleave(&parts[0], &parts[1])?
            }
            RomLayout::Combined => {
                if parts.is_empty() {
                    return Err(BusError::RomImage(String::from("a combined ROM needs at least one part")));
                }
                parts.concat()
            }
        };
        if image.is_empty() {
            return Err(BusError::RomImage(String::from("ROM image is empty")));
        }
        if self.skip != 0 && self.layout != RomLayout::Linear {
            log::warn!("ROM skip only applies to linear images; ignoring skip of {:#X}", self.skip);
        }
        Ok(fit_image(image, self.length as usize))
    }
}

/// Merge byte-interleaved halves: even bytes from `even`, odd bytes from `odd`.
pub fn interleave(even: &[u8], odd: &[u8]) -> Result<Vec<u8>, BusError> {
    if even.len() != odd.len() {
        return Err(BusError::RomImage(format!(
            "interleaved halves differ in size: even {:#X}, odd {:#X}",
            even.len(),
            odd.len()
        )));
    }
    let mut image = Vec::with_capacity(even.len() * 2);
    for (e, o) in even.iter().zip(odd.iter()) {
        image.push(*e);
        image.push(*o);
    }
    Ok(image)
}

/// Fit an image to `length` bytes. Longer images are truncated. Shorter images are mirrored
/// when they divide `length` evenly, as the address decoder on a board with a smaller chip
/// would, and padded with 0xFF otherwise.
pub fn fit_image(mut image: Vec<u8>, length: usize) -> Vec<u8> {
    if image.len() >= length {
        image.truncate(length);
        return image;
    }
    if !image.is_empty() && length % image.len() == 0 {
        return image.repeat(length / image.len());
    }
    image.resize(length, 0xFF);
    image
}
