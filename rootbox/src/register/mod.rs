#[macro_use]
mod abi;
mod mem;
mod reader;
pub mod regs;
mod writer;

use libc::c_ulong;

pub type Word = c_ulong;

pub use self::mem::PtraceMemoryAllocator;
pub use self::reader::{convert_word_to_bytes, peek_word, read_path, read_string, PtraceReader};
pub use self::regs::RegVersion::{self, *};
pub use self::regs::Register::{self, *};
pub use self::regs::SysArgIndex::{self, *};
pub use self::regs::{RegisterSet, Registers};
pub use self::writer::{convert_bytes_to_word, PtraceWriter};
