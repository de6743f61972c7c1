use crate::arch::{
    EXEC_PIC_ADDRESS, EXEC_PIC_ADDRESS_32, HAS_LOADER_32BIT, INTERP_PIC_ADDRESS,
    INTERP_PIC_ADDRESS_32,
};
use crate::errors::*;
use crate::filesystem::readers::ExtraReader;
use crate::filesystem::FileSystem;
use crate::filesystem::Translator;
use crate::kernel::execve::elf::{ElfHeader, ExecutableClass, ProgramHeader};
use crate::kernel::execve::elf::{PF_R, PF_W, PF_X, PT_GNU_STACK, PT_INTERP, PT_LOAD};
use crate::register::Word;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;
use nix::unistd::{sysconf, SysconfVar};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq)]
pub struct Mapping {
    pub addr: Word,
    pub length: Word,
    /// Trailing bytes to zero inside the mapping (BSS within the last
    /// file-backed page).
    pub clear_length: Word,
    pub prot: ProtFlags,
    pub flags: MapFlags,
    /// `None` stands for "file descriptor opened by the loader".
    pub fd: Option<Word>,
    pub offset: Word,
}

#[derive(Debug, PartialEq)]
pub struct LoadInfo {
    /// argv[0] as passed by the guest, preserved for AT_EXECFN.
    pub raw_path: Option<PathBuf>,
    /// Path as the guest sees it, after shebang expansion.
    pub user_path: Option<PathBuf>,
    /// Translated path the ELF is actually read from.
    pub host_path: Option<PathBuf>,
    pub elf_header: ElfHeader,
    pub mappings: Vec<Mapping>,
    /// The dynamic interpreter, at most one level deep.
    pub interp: Option<Box<LoadInfo>>,
    pub needs_executable_stack: bool,
}

lazy_static! {
    pub static ref PAGE_SIZE: Word = match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(value)) => value as Word,
        _ => 0x1000,
    };
    pub static ref PAGE_MASK: Word = !(*PAGE_SIZE - 1);
}

impl LoadInfo {
    fn new(elf_header: ElfHeader) -> Self {
        Self {
            raw_path: None,
            user_path: None,
            host_path: None,
            elf_header,
            mappings: Vec::new(),
            interp: None,
            needs_executable_stack: false,
        }
    }

    /// Extracts the load information of an executable: the ELF header and,
    /// from its program headers, the mappings, the interpreter and the
    /// stack executability.
    pub fn from(fs: &FileSystem, host_path: &Path) -> Result<LoadInfo> {
        let mut file = File::open(host_path)?;
        let elf_header = ElfHeader::extract_from(&mut file)?;

        // Sanity checks.
        elf_header.is_exec_or_dyn()?;
        elf_header.is_known_phentsize()?;

        let executable_class = elf_header.get_class();
        let program_headers_offset = elf_header.e_phoff();
        let program_headers_count = elf_header.e_phnum();

        // We skip the initial part, directly to the program headers.
        file.seek(SeekFrom::Start(program_headers_offset))?;

        let mut load_info = LoadInfo::new(elf_header);

        for _ in 0..program_headers_count {
            let program_header = match executable_class {
                ExecutableClass::Class32 => ProgramHeader::ProgramHeader32(file.read_struct()?),
                ExecutableClass::Class64 => ProgramHeader::ProgramHeader64(file.read_struct()?),
            };

            match program_header.p_type() {
                // Loadable segment: the bytes from the file are mapped to
                // the beginning of the memory segment.
                PT_LOAD => load_info.add_mapping(&program_header),
                // Location of the path of the dynamic interpreter.
                PT_INTERP => load_info.add_interp(fs, &program_header, &mut file)?,
                // The stack of this executable must be executable (NX
                // disabled).
                PT_GNU_STACK => {
                    let prot = process_prot_flags(program_header.p_flags());
                    load_info.needs_executable_stack = prot.contains(ProtFlags::PROT_EXEC);
                }
                _ => (),
            };
        }

        Ok(load_info)
    }

    /// Converts a PT_LOAD program header into one or two Mappings.
    fn add_mapping(&mut self, program_header: &ProgramHeader) {
        let vaddr = program_header.p_vaddr() as Word;
        let memsz = program_header.p_memsz() as Word;
        let filesz = program_header.p_filesz() as Word;
        let offset = program_header.p_offset() as Word;
        let prot = process_prot_flags(program_header.p_flags());

        let start_address = vaddr & *PAGE_MASK;
        let end_address = (vaddr + filesz + *PAGE_SIZE) & *PAGE_MASK;

        let mut mapping = Mapping {
            fd: None, // opened by the loader
            offset: offset & *PAGE_MASK,
            addr: start_address,
            length: end_address - start_address,
            flags: MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED,
            prot,
            clear_length: 0,
        };

        // "If the segment's memory size p_memsz is larger than the file
        // size p_filesz, the "extra" bytes are defined to hold the value 0
        // and to follow the segment's initialized area." -- man 7 elf.
        if memsz > filesz {
            // How many extra bytes in the current page?
            mapping.clear_length = end_address - vaddr - filesz;

            self.mappings.push(mapping);

            let start_address = end_address;
            let end_address = (vaddr + memsz + *PAGE_SIZE) & *PAGE_MASK;

            // Create new pages for the remaining extra bytes.
            if end_address > start_address {
                let new_mapping = Mapping {
                    fd: None,
                    offset: 0,
                    addr: start_address,
                    length: end_address - start_address,
                    clear_length: 0,
                    flags: MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_FIXED,
                    prot,
                };

                self.mappings.push(new_mapping);
            }
        } else {
            self.mappings.push(mapping);
        }
    }

    fn add_interp(
        &mut self,
        fs: &FileSystem,
        program_header: &ProgramHeader,
        file: &mut File,
    ) -> Result<()> {
        // Only one PT_INTERP segment is allowed.
        if self.interp.is_some() {
            return Err(Error::errno_with_msg(
                EINVAL,
                "when parsing an executable, two PT_INTERP segments found",
            ));
        }

        let user_path_size = program_header.p_filesz() as usize;
        let user_path_offset = program_header.p_offset();
        // the -1 avoids the nul terminator
        let user_path = file.pread_path_at(user_path_size - 1, user_path_offset)?;

        let host_path = fs.translate_path(&user_path, true)?;
        fs.check_path_executable(&host_path)?;

        let mut load_info = LoadInfo::from(fs, &host_path)?;

        // An interpreter must be standalone.
        if load_info.interp.is_some() {
            return Err(Error::errno_with_msg(
                EINVAL,
                "an ELF interpreter is supposed to be standalone",
            ));
        }

        load_info.host_path = Some(host_path);
        load_info.user_path = Some(user_path);

        self.interp = Some(Box::new(load_info));

        Ok(())
    }

    /// Adds `load_base` to every address of this object.
    #[inline]
    fn add_load_base(&mut self, load_base: Word) {
        for mapping in &mut self.mappings {
            mapping.addr += load_base;
        }
        self.elf_header.add_to_entry(load_base as u64);
    }

    /// Computes the final load address of each position independent object.
    pub fn compute_load_addresses(&mut self, is_interp: bool) -> Result<()> {
        let (load_base_32, load_base) = match is_interp {
            false => (EXEC_PIC_ADDRESS_32, EXEC_PIC_ADDRESS),
            true => (INTERP_PIC_ADDRESS_32, INTERP_PIC_ADDRESS),
        };

        let is_pos_indep = self.elf_header.is_position_independent();
        if is_pos_indep && self.mappings.get(0).map(|mapping| mapping.addr) == Some(0) {
            if HAS_LOADER_32BIT && self.elf_header.get_class() == ExecutableClass::Class32 {
                self.add_load_base(load_base_32);
            } else {
                self.add_load_base(load_base);
            }
        }

        if !is_interp {
            if let Some(ref mut interp_load_info) = self.interp {
                interp_load_info.compute_load_addresses(true)?;
            }
        }
        Ok(())
    }

    /// End of the BSS, where the emulated heap goes.
    pub fn bss_end(&self) -> Option<Word> {
        self.mappings
            .last()
            .map(|mapping| mapping.addr + mapping.length)
    }
}

#[inline]
fn process_flag<T>(flags: u32, compare_flag: u32, success_flag: T, default_flag: T) -> T {
    if flags & compare_flag > 0 {
        success_flag
    } else {
        default_flag
    }
}

#[inline]
pub fn process_prot_flags(flags: u32) -> ProtFlags {
    let read_flag = process_flag(flags, PF_R, ProtFlags::PROT_READ, ProtFlags::PROT_NONE);
    let write_flag = process_flag(flags, PF_W, ProtFlags::PROT_WRITE, ProtFlags::PROT_NONE);
    let execute_flag = process_flag(flags, PF_X, ProtFlags::PROT_EXEC, ProtFlags::PROT_NONE);

    read_flag | write_flag | execute_flag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FileSystem;
    use std::path::PathBuf;

    #[test]
    fn test_load_info_from_path_not_executable() {
        let fs = FileSystem::with_root("/").unwrap();
        let result = LoadInfo::from(&fs, &PathBuf::from("/etc/passwd"));

        assert_eq!(result.unwrap_err().get_errno(), ENOEXEC);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_load_info_from_path_has_mappings_and_interp() {
        let fs = FileSystem::with_root("/").unwrap();
        let load_info = LoadInfo::from(&fs, &PathBuf::from("/bin/sh")).unwrap();

        assert!(!load_info.mappings.is_empty());

        // every file-backed mapping is page-aligned
        for mapping in &load_info.mappings {
            assert_eq!(mapping.addr & !*PAGE_MASK, 0);
        }

        if let Some(ref interp) = load_info.interp {
            assert!(interp.host_path.is_some());
            assert!(interp.user_path.is_some());
            assert!(interp.interp.is_none());
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_load_info_compute_load_addresses() {
        let fs = FileSystem::with_root("/").unwrap();
        let mut load_info = LoadInfo::from(&fs, &PathBuf::from("/bin/sh")).unwrap();

        let before_entry = load_info.elf_header.e_entry();
        let was_pic = load_info.elf_header.is_position_independent()
            && load_info.mappings[0].addr == 0;

        load_info.compute_load_addresses(false).unwrap();

        if was_pic {
            assert_eq!(
                load_info.elf_header.e_entry(),
                before_entry + EXEC_PIC_ADDRESS
            );
            assert_eq!(load_info.mappings[0].addr & !*PAGE_MASK, 0);
        } else {
            assert_eq!(load_info.elf_header.e_entry(), before_entry);
        }
    }
}
