pub mod brk;

use crate::register::Word;

/// Virtual brk emulation: the heap is a private anonymous mapping placed
/// just above the BSS, so its location is reliable regardless of what the
/// kernel maps after the loader. Shared between tracees per `CLONE_VM`.
#[derive(Debug, Default)]
pub struct Heap {
    /// Start of the emulated heap; zero until the first brk(0).
    pub base: Word,
    /// Current size of the emulated heap.
    pub size: Word,
    /// Set when a legitimate brk(2) slipped through: from then on the
    /// kernel's own heap is used.
    pub disabled: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }
}
