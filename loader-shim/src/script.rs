//! Wire format of the load script shared between the tracer and the loader.
//!
//! The tracer lays a sequence of `LoadStatement`s out in the guest stack and
//! points the loader at the first one. Statements are packed back to back,
//! each one starting with a word-sized discriminant, so the whole script can
//! be written (and later walked) as a flat byte buffer.

#[cfg(any(target_arch = "x86", target_arch = "arm"))]
pub type Word = u32;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub type Word = u64;

#[cfg_attr(any(target_arch = "x86_64", target_arch = "aarch64"), repr(C, u64))]
#[cfg_attr(any(target_arch = "x86", target_arch = "arm"), repr(C, u32))]
#[derive(Debug)]
pub enum LoadStatement {
    /// Close the last opened file and open a new one.
    OpenNext(LoadStatementOpen),
    /// Open a file and remember its file descriptor.
    Open(LoadStatementOpen),
    /// Map a segment of the last opened file into memory.
    MmapFile(LoadStatementMmap),
    /// Map an anonymous private segment instead of a file-backed one.
    MmapAnonymous(LoadStatementMmap),
    /// Turn the page holding the initial stack pointer executable.
    MakeStackExec(LoadStatementStackExec),
    /// Hand over to the new program, signalling the tracer through a
    /// sentinel execve first.
    StartTraced(LoadStatementStart),
    /// Hand over to the new program directly.
    Start(LoadStatementStart),
}

#[repr(C)]
#[derive(Debug)]
pub struct LoadStatementOpen {
    /// Address of the NUL-terminated host path to open.
    pub string_address: Word,
}

#[repr(C)]
#[derive(Debug)]
pub struct LoadStatementMmap {
    /// Starting address of the mapping (page-aligned, MAP_FIXED).
    pub addr: Word,
    /// Length of the mapping.
    pub length: Word,
    /// Memory protection of the mapping.
    pub prot: Word,
    /// File offset the mapping starts at.
    pub offset: Word,
    /// Number of trailing bytes to zero inside the mapping (the BSS part
    /// of the last file-backed page).
    pub clear_length: Word,
}

#[repr(C)]
#[derive(Debug)]
pub struct LoadStatementStackExec {
    /// Page-aligned address of the initial stack.
    pub start: Word,
}

#[repr(C)]
#[derive(Debug)]
pub struct LoadStatementStart {
    /// Stack pointer the new program starts with.
    pub stack_pointer: Word,
    /// Entry address: the interpreter's if there is one, the executable's
    /// otherwise.
    pub entry_point: Word,
    pub at_phdr: Word,
    pub at_phent: Word,
    pub at_phnum: Word,
    pub at_entry: Word,
    pub at_execfn: Word,
}

impl LoadStatement {
    /// Byte size of this statement as laid out in the script, including the
    /// word-sized discriminant.
    pub fn byte_length(&self) -> usize {
        let payload = match self {
            LoadStatement::OpenNext(_) | LoadStatement::Open(_) => {
                core::mem::size_of::<LoadStatementOpen>()
            }
            LoadStatement::MmapFile(_) | LoadStatement::MmapAnonymous(_) => {
                core::mem::size_of::<LoadStatementMmap>()
            }
            LoadStatement::MakeStackExec(_) => core::mem::size_of::<LoadStatementStackExec>(),
            LoadStatement::StartTraced(_) | LoadStatement::Start(_) => {
                core::mem::size_of::<LoadStatementStart>()
            }
        };

        payload + core::mem::size_of::<Word>()
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts(
                (self as *const LoadStatement) as *const u8,
                self.byte_length(),
            )
        }
    }
}
