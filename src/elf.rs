/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! ELF32 executable header checks done before handing a binary to the loader.

use alloc::string::String;
use alloc::vec::Vec;
use binrw::BinRead;
use binrw::io::Cursor;

use crate::fs::Fd;
use crate::mem::{TlsMaster, VAddr};
use crate::task::process::{LoadedObject, Process};
use crate::task::spawn::{SpawnStatus, SpawnValidationDetails};

pub const ELF32_HEADER_SIZE: usize = 52;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const EV_CURRENT: u32 = 1;

#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct Elf32Header {
    pub ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Elf32Header {
    /// Parses and checks that `data` starts with the header of a little-endian
    /// i386 executable.
    pub fn validate(data: &[u8]) -> Result<Self, SpawnValidationDetails> {
        if data.len() < ELF32_HEADER_SIZE || data[..4] != ELF_MAGIC {
            return Err(SpawnValidationDetails::NotElf);
        }
        if data[EI_CLASS] != ELFCLASS32 {
            return Err(SpawnValidationDetails::Not32Bit);
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(SpawnValidationDetails::NotLittleEndian);
        }

        let header = Self::read(&mut Cursor::new(data))
            .map_err(|_| SpawnValidationDetails::NotElf)?;

        if header.e_machine != EM_386 {
            return Err(SpawnValidationDetails::NotI386);
        }
        if header.e_version != EV_CURRENT {
            return Err(SpawnValidationDetails::NotStandardElf);
        }
        if header.e_type != ET_EXEC {
            return Err(SpawnValidationDetails::NotExecutable);
        }

        Ok(header)
    }

    pub fn entry(&self) -> VAddr {
        VAddr(self.e_entry as usize)
    }
}

/// What the loader leaves behind after mapping a binary and its dependencies.
#[derive(Debug, Clone)]
pub struct LoadedExecutable {
    pub objects: Vec<LoadedObject>,
    pub tls_master: Option<TlsMaster>,
    /// Process information block the loader left in user space.
    pub process_info: VAddr,
}

/// Maps an already validated executable into `process`' address space.
pub trait ExecutableLoader: Sync {
    fn load(&self, fd: Fd, process: &Process)
        -> Result<LoadedExecutable, SpawnStatus>;
}

/// Name of the executable for logs, out of its path.
pub fn object_name(path: &str) -> String {
    String::from(path.rsplit('/').next().unwrap_or(path))
}

#[cfg(test)]
pub(crate) fn test_image(entry: u32) -> Vec<u8> {
    let mut image = Vec::with_capacity(ELF32_HEADER_SIZE);
    image.extend_from_slice(&ELF_MAGIC);
    image.extend_from_slice(&[ELFCLASS32, ELFDATA2LSB, 1]);
    image.resize(16, 0);
    image.extend_from_slice(&ET_EXEC.to_le_bytes());
    image.extend_from_slice(&EM_386.to_le_bytes());
    image.extend_from_slice(&EV_CURRENT.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(&(ELF32_HEADER_SIZE as u32).to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&(ELF32_HEADER_SIZE as u16).to_le_bytes());
    image.extend_from_slice(&32u16.to_le_bytes());
    image.extend_from_slice(&1u16.to_le_bytes());
    image.extend_from_slice(&40u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_accepts_an_i386_executable() {
        let header = Elf32Header::validate(&test_image(0x0804_8000)).unwrap();

        assert_eq!(header.entry(), VAddr(0x0804_8000));
        assert_eq!(header.e_phnum, 1);
    }

    #[test]
    fn it_rejects_foreign_binaries() {
        let cases: [(fn(&mut Vec<u8>), SpawnValidationDetails); 6] = [
            (|img| img[0] = b'#', SpawnValidationDetails::NotElf),
            (|img| img.truncate(20), SpawnValidationDetails::NotElf),
            (|img| img[EI_CLASS] = 2, SpawnValidationDetails::Not32Bit),
            (|img| img[EI_DATA] = 2, SpawnValidationDetails::NotLittleEndian),
            (|img| img[18] = 0x3e, SpawnValidationDetails::NotI386),
            (|img| img[16] = 3, SpawnValidationDetails::NotExecutable),
        ];

        for (corrupt, expected) in cases {
            let mut image = test_image(0x1000);
            corrupt(&mut image);
            assert_eq!(Elf32Header::validate(&image).unwrap_err(), expected);
        }
    }

    #[test]
    fn it_rejects_non_standard_versions() {
        let mut image = test_image(0x1000);
        image[20] = 0;

        assert_eq!(Elf32Header::validate(&image).unwrap_err(),
                   SpawnValidationDetails::NotStandardElf);
    }

    #[test]
    fn it_names_objects_after_their_file() {
        assert_eq!(object_name("/applications/terminal.bin"), "terminal.bin");
        assert_eq!(object_name("init"), "init");
    }
}
