//! Soft-dirty page tracking: `/proc/<pid>/clear_refs` resets the bit, `/proc/<pid>/pagemap`
//! reads it back (SPEC_FULL.md §4.5, §6). Linux-only; platforms without it degrade to full
//! re-hashing every snapshot (see [`crate::options::Options::soft_dirty`]).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{CoreError, CoreResult};
use crate::process_mem::os_page_size;
use crate::util::Address;

/// Control word written to `/proc/<pid>/clear_refs` to reset the soft-dirty bit for all pages.
/// See `Documentation/admin-guide/mm/soft-dirty.rst` in the Linux kernel tree.
const CLEAR_REFS_SOFT_DIRTY: &str = "4";

/// Bit 55 of a `/proc/<pid>/pagemap` entry marks the page as soft-dirty.
const PAGEMAP_SOFT_DIRTY_BIT: u64 = 1 << 55;
const PAGEMAP_ENTRY_BYTES: u64 = 8;

/// Reset the soft-dirty bit for every page of `pid`. Called right after a snapshot's data is
/// captured, so the *next* snapshot can tell which pages changed since then.
pub fn clear_soft_dirty(pid: i32) -> CoreResult<()> {
    let path = format!("/proc/{pid}/clear_refs");
    let mut file = OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|source| CoreError::OsResourceExhausted {
            operation: "open /proc/<pid>/clear_refs",
            source,
        })?;
    file.write_all(CLEAR_REFS_SOFT_DIRTY.as_bytes())
        .map_err(|source| CoreError::OsResourceExhausted {
            operation: "write /proc/<pid>/clear_refs",
            source,
        })?;
    trace!("cleared soft-dirty bits for pid {pid}");
    Ok(())
}

/// A handle to one process's `/proc/<pid>/pagemap`, for querying the soft-dirty bit of
/// individual pages without reopening the file per query.
pub struct PagemapReader {
    file: File,
    page_size: usize,
}

impl PagemapReader {
    pub fn open(pid: i32) -> CoreResult<Self> {
        let path = format!("/proc/{pid}/pagemap");
        let file = File::open(&path).map_err(|source| CoreError::OsResourceExhausted {
            operation: "open /proc/<pid>/pagemap",
            source,
        })?;
        Ok(PagemapReader {
            file,
            page_size: os_page_size(),
        })
    }

    /// Whether the page containing `addr` has been written to since the last
    /// [`clear_soft_dirty`] call.
    pub fn is_dirty(&mut self, addr: Address) -> CoreResult<bool> {
        let page_num = addr.as_usize() / self.page_size;
        let offset = page_num as u64 * PAGEMAP_ENTRY_BYTES;

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| CoreError::OsResourceExhausted {
                operation: "seek /proc/<pid>/pagemap",
                source,
            })?;

        let mut entry = [0u8; PAGEMAP_ENTRY_BYTES as usize];
        self.file
            .read_exact(&mut entry)
            .map_err(|source| CoreError::OsResourceExhausted {
                operation: "read /proc/<pid>/pagemap",
                source,
            })?;

        let value = u64::from_le_bytes(entry);
        Ok(value & PAGEMAP_SOFT_DIRTY_BIT != 0)
    }
}
