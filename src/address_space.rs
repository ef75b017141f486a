//! The uniform read abstraction that lets DWARF evaluation and the heap comparator operate on
//! either live process memory or a prior snapshot (SPEC_FULL.md §3, §4.4).

use crate::dwarf::types::Variable;
use crate::error::{CoreError, CoreResult, EvaluationError};
use crate::page_store::PageStore;
use crate::process_mem::ProcessMemory;
use crate::region::RegionSnapshot;
use crate::snapshot::Snapshot;
use crate::util::Address;

/// Governs whether a read may hand back a pointer directly into backing storage (the page store
/// or a Flat buffer) instead of copying into the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    pub lazy: bool,
}

/// Either a pointer into existing storage (no copy happened) or a copy into the caller's buffer.
pub enum ReadResult<'a> {
    Borrowed(&'a [u8]),
    Copied(usize),
}

impl<'a> ReadResult<'a> {
    /// Resolve to a byte slice view, given the buffer the caller originally supplied.
    pub fn as_slice(&self, caller_buf: &'a [u8]) -> &'a [u8] {
        match self {
            ReadResult::Borrowed(slice) => slice,
            ReadResult::Copied(len) => &caller_buf[..*len],
        }
    }
}

/// The common read surface consumed by DWARF expression evaluation and the heap comparator.
/// Every subsystem addresses memory exclusively through this capability so that snapshots are
/// interchangeable with live memory.
pub enum AddressSpace<'snap> {
    LiveProcess(ProcessMemory),
    Snapshot {
        snapshot: &'snap Snapshot,
        /// Owned by the checkpoint engine, not by the `Snapshot` itself (SPEC_FULL.md §5): any
        /// number of snapshots may read it concurrently, none may mutate it through this path.
        page_store: &'snap PageStore,
        process_index: usize,
        live_fallback: ProcessMemory,
    },
}

impl<'snap> AddressSpace<'snap> {
    pub fn live(process: ProcessMemory) -> Self {
        AddressSpace::LiveProcess(process)
    }

    pub fn over_snapshot(
        snapshot: &'snap Snapshot,
        page_store: &'snap PageStore,
        process_index: usize,
        live_fallback: ProcessMemory,
    ) -> Self {
        AddressSpace::Snapshot {
            snapshot,
            page_store,
            process_index,
            live_fallback,
        }
    }

    /// Read `buf.len()` bytes at `remote_address`. Returns a view that is either borrowed
    /// (zero-copy) from backing storage or copied into `buf`, depending on `opts.lazy` and
    /// whether the read stays within a single page of Chunked storage.
    pub fn read<'a>(
        &'a self,
        buf: &'a mut [u8],
        remote_address: Address,
        opts: ReadOptions,
    ) -> CoreResult<ReadResult<'a>> {
        match self {
            AddressSpace::LiveProcess(process) => {
                process.read_bytes(remote_address, buf)?;
                Ok(ReadResult::Copied(buf.len()))
            }
            AddressSpace::Snapshot {
                snapshot,
                page_store,
                process_index,
                live_fallback,
            } => {
                if let Some(region) = snapshot.find_region_containing(remote_address) {
                    region.read(buf, remote_address, *process_index, opts.lazy, page_store)
                } else {
                    live_fallback.read_bytes(remote_address, buf)?;
                    Ok(ReadResult::Copied(buf.len()))
                }
            }
        }
    }

    /// Read a single machine word and interpret it as an `Address` (the `deref` DWARF opcode's
    /// use case, and the general "follow a pointer" primitive).
    pub fn read_pointer(&self, remote_address: Address) -> CoreResult<Address> {
        let mut buf = [0u8; std::mem::size_of::<usize>()];
        self.read(&mut buf, remote_address, ReadOptions::default())?;
        Ok(unsafe { Address::from_usize(usize::from_ne_bytes(buf)) })
    }

    /// Read `size` bytes from `context.address_space` at `a`, for the `deref`/`deref_size` DWARF
    /// opcodes; `word_bits/8` is the common case, `size` allows `deref_size`'s explicit width.
    pub fn read_sized(&self, remote_address: Address, size: usize) -> CoreResult<u64> {
        let mut buf = [0u8; 8];
        debug_assert!(size <= 8, "deref_size beyond word size is not supported");
        self.read(&mut buf[..size], remote_address, ReadOptions::default())?;
        let mut padded = [0u8; 8];
        padded[..size].copy_from_slice(&buf[..size]);
        Ok(u64::from_ne_bytes(padded))
    }

    /// Read a process-scope global's bytes into `buf`, resolving its address from
    /// `variable.direct_address` (the capability §3 calls `read_variable(name, buffer, size)`;
    /// the caller supplies the already-resolved [`Variable`] rather than a bare name, since
    /// name-to-`Variable` lookup is the host's DWARF-info responsibility, out of scope here).
    pub fn read_variable(&self, variable: &Variable, buf: &mut [u8]) -> CoreResult<()> {
        let address = variable
            .direct_address
            .ok_or(CoreError::Evaluation(EvaluationError::NoBaseAddress))?;
        self.read(buf, address, ReadOptions::default())?;
        Ok(())
    }

    /// Borrow the region a Chunked/Flat read would be served from, for callers that need to
    /// reason about region membership rather than just bytes (e.g. the heap comparator's
    /// pointer-into-heap check, SPEC_FULL.md §4.9).
    pub fn region_containing(&self, addr: Address) -> Option<&RegionSnapshot> {
        match self {
            AddressSpace::LiveProcess(_) => None,
            AddressSpace::Snapshot { snapshot, .. } => snapshot.find_region_containing(addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_variable_reads_through_direct_address() {
        let value: u64 = 0x42;
        let variable = Variable {
            name: "a_global".to_string(),
            type_id: 0,
            is_global: true,
            direct_address: Some(Address::from_ptr(&value as *const u64)),
            location: None,
            scope_start_offset: 0,
        };

        let space = AddressSpace::live(ProcessMemory::for_self());
        let mut buf = [0u8; 8];
        space.read_variable(&variable, &mut buf).unwrap();
        assert_eq!(u64::from_ne_bytes(buf), value);
    }

    #[test]
    fn test_read_variable_without_direct_address_fails() {
        let variable = Variable {
            name: "a_local".to_string(),
            type_id: 0,
            is_global: false,
            direct_address: None,
            location: None,
            scope_start_offset: 0,
        };

        let space = AddressSpace::live(ProcessMemory::for_self());
        let mut buf = [0u8; 8];
        assert!(space.read_variable(&variable, &mut buf).is_err());
    }
}
