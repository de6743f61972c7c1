use std::fs::File;
use std::io::{Seek, SeekFrom};

use crate::errors::*;
use crate::filesystem::ExtraReader;

pub const EI_NIDENT: usize = 16;

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

pub const PT_LOAD: u32 = 1;
pub const PT_INTERP: u32 = 3;
pub const PT_GNU_STACK: u32 = 0x6474_e551;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElfHeader32 {
    pub e_ident: [u8; EI_NIDENT],
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

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElfHeader64 {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader32 {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader64 {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecutableClass {
    Class32,
    Class64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElfHeader {
    ElfHeader32(ElfHeader32),
    ElfHeader64(ElfHeader64),
}

#[derive(Debug, Clone, Copy)]
pub enum ProgramHeader {
    ProgramHeader32(ProgramHeader32),
    ProgramHeader64(ProgramHeader64),
}

impl ElfHeader {
    /// Reads the header of an ELF file, choosing the 32 or 64-bit layout
    /// from the ident bytes. The file cursor ends up right after the
    /// header.
    pub fn extract_from(file: &mut File) -> Result<ElfHeader> {
        let mut ident = [0u8; EI_NIDENT];
        {
            use std::io::Read;
            file.read_exact(&mut ident)
                .errno(ENOEXEC)
                .context("when reading the ELF ident")?;
        }

        if ident[0..4] != ELF_MAGIC {
            return Err(Error::errno_with_msg(ENOEXEC, "not an ELF file"));
        }

        file.seek(SeekFrom::Start(0))?;

        match ident[4] {
            ELFCLASS32 => Ok(ElfHeader::ElfHeader32(file.read_struct()?)),
            ELFCLASS64 => Ok(ElfHeader::ElfHeader64(file.read_struct()?)),
            _ => Err(Error::errno_with_msg(ENOEXEC, "unknown ELF class")),
        }
    }

    pub fn get_class(&self) -> ExecutableClass {
        match self {
            ElfHeader::ElfHeader32(_) => ExecutableClass::Class32,
            ElfHeader::ElfHeader64(_) => ExecutableClass::Class64,
        }
    }

    pub fn e_type(&self) -> u16 {
        match self {
            ElfHeader::ElfHeader32(header) => header.e_type,
            ElfHeader::ElfHeader64(header) => header.e_type,
        }
    }

    pub fn e_entry(&self) -> u64 {
        match self {
            ElfHeader::ElfHeader32(header) => header.e_entry as u64,
            ElfHeader::ElfHeader64(header) => header.e_entry,
        }
    }

    pub fn add_to_entry(&mut self, load_base: u64) {
        match self {
            ElfHeader::ElfHeader32(header) => header.e_entry += load_base as u32,
            ElfHeader::ElfHeader64(header) => header.e_entry += load_base,
        }
    }

    pub fn e_phoff(&self) -> u64 {
        match self {
            ElfHeader::ElfHeader32(header) => header.e_phoff as u64,
            ElfHeader::ElfHeader64(header) => header.e_phoff,
        }
    }

    pub fn e_phentsize(&self) -> u64 {
        match self {
            ElfHeader::ElfHeader32(header) => header.e_phentsize as u64,
            ElfHeader::ElfHeader64(header) => header.e_phentsize as u64,
        }
    }

    pub fn e_phnum(&self) -> u64 {
        match self {
            ElfHeader::ElfHeader32(header) => header.e_phnum as u64,
            ElfHeader::ElfHeader64(header) => header.e_phnum as u64,
        }
    }

    /// Only executables and shared objects can be executed.
    pub fn is_exec_or_dyn(&self) -> Result<()> {
        match self.e_type() {
            ET_EXEC | ET_DYN => Ok(()),
            _ => Err(Error::errno_with_msg(ENOEXEC, "not an executable ELF")),
        }
    }

    /// Sanity check: the program header entry size must match the layout
    /// this parser assumes.
    pub fn is_known_phentsize(&self) -> Result<()> {
        let expected = match self.get_class() {
            ExecutableClass::Class32 => std::mem::size_of::<ProgramHeader32>(),
            ExecutableClass::Class64 => std::mem::size_of::<ProgramHeader64>(),
        };
        if self.e_phentsize() as usize != expected {
            return Err(Error::errno_with_msg(ENOEXEC, "unexpected phentsize"));
        }
        Ok(())
    }

    pub fn is_position_independent(&self) -> bool {
        self.e_type() == ET_DYN
    }
}

impl ProgramHeader {
    pub fn p_type(&self) -> u32 {
        match self {
            ProgramHeader::ProgramHeader32(header) => header.p_type,
            ProgramHeader::ProgramHeader64(header) => header.p_type,
        }
    }

    pub fn p_flags(&self) -> u32 {
        match self {
            ProgramHeader::ProgramHeader32(header) => header.p_flags,
            ProgramHeader::ProgramHeader64(header) => header.p_flags,
        }
    }

    pub fn p_offset(&self) -> u64 {
        match self {
            ProgramHeader::ProgramHeader32(header) => header.p_offset as u64,
            ProgramHeader::ProgramHeader64(header) => header.p_offset,
        }
    }

    pub fn p_vaddr(&self) -> u64 {
        match self {
            ProgramHeader::ProgramHeader32(header) => header.p_vaddr as u64,
            ProgramHeader::ProgramHeader64(header) => header.p_vaddr,
        }
    }

    pub fn p_filesz(&self) -> u64 {
        match self {
            ProgramHeader::ProgramHeader32(header) => header.p_filesz as u64,
            ProgramHeader::ProgramHeader64(header) => header.p_filesz,
        }
    }

    pub fn p_memsz(&self) -> u64 {
        match self {
            ProgramHeader::ProgramHeader32(header) => header.p_memsz as u64,
            ProgramHeader::ProgramHeader64(header) => header.p_memsz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elf_header_sizes() {
        // the on-disk layouts these structs are transmuted from
        assert_eq!(std::mem::size_of::<ElfHeader32>(), 52);
        assert_eq!(std::mem::size_of::<ElfHeader64>(), 64);
        assert_eq!(std::mem::size_of::<ProgramHeader32>(), 32);
        assert_eq!(std::mem::size_of::<ProgramHeader64>(), 56);
    }

    #[test]
    fn test_extract_from_rejects_non_elf() {
        let mut file = File::open("/etc/hostname").or_else(|_| File::open("/etc/passwd"));
        if let Ok(ref mut file) = file {
            let result = ElfHeader::extract_from(file);
            assert_eq!(result.unwrap_err().get_errno(), ENOEXEC);
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_extract_from_accepts_host_shell() {
        let mut file = File::open("/bin/sh").unwrap();
        let header = ElfHeader::extract_from(&mut file).unwrap();

        assert!(header.is_exec_or_dyn().is_ok());
        assert!(header.is_known_phentsize().is_ok());
        assert!(header.e_phnum() > 0);
    }
}
