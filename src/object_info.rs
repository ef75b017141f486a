//! Descriptor of a single ELF object's loaded segments (SPEC_FULL.md §3, §4.6).
//!
//! An `ObjectInformation` is produced by the host's ELF/DWARF loader (out of scope for this
//! crate, see SPEC_FULL.md §1) and handed in already populated; this module only defines the
//! shape and the classification rule used while a [`crate::memory_map::MemoryMap`] is built.

use crate::util::Address;

/// The loaded segments of one ELF object, as discovered by walking `/proc/<pid>/maps`.
///
/// `base_address` is the bias used by the `addr` DWARF opcode (SPEC_FULL.md §4.7): the address
/// at which the object's link-time address zero ended up in the target's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInformation {
    pub base_address: Address,
    pub start_exec: Address,
    pub end_exec: Address,
    pub start_ro: Address,
    pub end_ro: Address,
    pub start_rw: Address,
    pub end_rw: Address,
    /// Whether this object is a PIE/shared object the target may privatize per worker
    /// (SPEC_FULL.md §4.2, Privatized storage).
    pub executable: bool,
}

impl ObjectInformation {
    /// An object with no segments discovered yet; classification fills each field in as
    /// matching map entries are seen.
    pub fn empty(base_address: Address, executable: bool) -> Self {
        ObjectInformation {
            base_address,
            start_exec: Address::ZERO,
            end_exec: Address::ZERO,
            start_ro: Address::ZERO,
            end_ro: Address::ZERO,
            start_rw: Address::ZERO,
            end_rw: Address::ZERO,
            executable,
        }
    }

    /// Whether this object has a read-write data segment at all (some header-only objects, e.g.
    /// the vDSO, never get one).
    pub fn has_rw_segment(&self) -> bool {
        self.start_rw < self.end_rw
    }
}
