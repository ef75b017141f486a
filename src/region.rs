//! A single contiguous memory region, captured as Flat, Chunked, or Privatized storage
//! (SPEC_FULL.md §3, §4.2). Grounded on the page-granularity capture helper `PerPageCopy` in the
//! source's `mc_page_snapshot.cpp`.

use crate::address_space::ReadResult;
use crate::error::{CoreError, CoreResult};
use crate::object_info::ObjectInformation;
use crate::page_store::{PageIndex, PageStore};
use crate::process_mem::ProcessMemory;
use crate::util::Address;

/// What kind of memory a region represents; affects Snapshot ordering (Data before Heap) and
/// privatization eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Data,
    Heap,
    Unknown,
}

/// How a region's bytes are stored.
pub enum StorageKind {
    /// No data captured (placeholder, e.g. a Privatized region before its workers are known).
    NoData,
    /// An owned contiguous byte copy.
    Flat(Vec<u8>),
    /// A page-store index per host page spanned by the region.
    Chunked(Vec<PageIndex>),
    /// One sub-region per worker process, all sharing `start_address` but each with its own
    /// `permanent_address`.
    Privatized(Vec<RegionSnapshot>),
}

/// One contiguous region of the target's address space, captured at a point in time.
pub struct RegionSnapshot {
    pub region_kind: RegionKind,
    pub storage: StorageKind,
    pub start_address: Address,
    /// Address to write back on restore; differs from `start_address` only for a Privatized
    /// sub-region (each worker privatizes the same virtual range to a different backing page).
    pub permanent_address: Address,
    pub size_bytes: usize,
    /// DWARF descriptor of the ELF image this region belongs to, if any; used only by
    /// consumers (member resolution, heap type inference), never by the region itself.
    pub object_info: Option<ObjectInformation>,
}

impl RegionSnapshot {
    /// Capture `size_bytes` of the region into an owned buffer. Chosen when sparse checkpointing
    /// is disabled, or the region is small enough that per-page bookkeeping would outweigh
    /// deduplication (SPEC_FULL.md §4.2).
    pub fn capture_flat(
        process: &ProcessMemory,
        region_kind: RegionKind,
        start_address: Address,
        permanent_address: Address,
        size_bytes: usize,
        object_info: Option<ObjectInformation>,
    ) -> CoreResult<Self> {
        let mut buf = vec![0u8; size_bytes];
        process.read_bytes(start_address, &mut buf)?;
        trace!("capture_flat: {size_bytes} bytes at {start_address}");
        Ok(RegionSnapshot {
            region_kind,
            storage: StorageKind::Flat(buf),
            start_address,
            permanent_address,
            size_bytes,
            object_info,
        })
    }

    /// Capture the region as `ceil(size / page_size)` page-store indices. `start_address` and
    /// `permanent_address` must be page-aligned, checked here as a precondition.
    ///
    /// When `parent` holds a page-indexed capture of the same region and `unchanged_pages`
    /// marks which of its pages are known (via soft-dirty) to still match live memory, those
    /// pages are reused via `ref_page` instead of being re-read and re-hashed
    /// (SPEC_FULL.md §4.5).
    pub fn capture_chunked(
        process: &ProcessMemory,
        page_store: &mut PageStore,
        region_kind: RegionKind,
        start_address: Address,
        permanent_address: Address,
        size_bytes: usize,
        object_info: Option<ObjectInformation>,
        parent: Option<(&[PageIndex], &dyn Fn(usize) -> bool)>,
    ) -> CoreResult<Self> {
        let page_size = page_store.page_size();
        if !start_address.is_aligned_to(page_size) || !permanent_address.is_aligned_to(page_size) {
            return Err(CoreError::InvariantViolation(format!(
                "chunked region at {start_address} is not page-aligned"
            )));
        }

        let page_count = size_bytes.div_ceil(page_size);
        let mut indices = Vec::with_capacity(page_count);
        let mut scratch = vec![0u8; page_size];

        for page_num in 0..page_count {
            if let Some((parent_indices, page_unchanged)) = parent {
                if page_num < parent_indices.len() && page_unchanged(page_num) {
                    let idx = parent_indices[page_num];
                    page_store.ref_page(idx);
                    indices.push(idx);
                    continue;
                }
            }
            let page_addr = start_address.add(page_num * page_size);
            process.read_bytes(page_addr, &mut scratch)?;
            indices.push(page_store.store_page(&scratch)?);
        }

        trace!("capture_chunked: {page_count} pages at {start_address}");
        Ok(RegionSnapshot {
            region_kind,
            storage: StorageKind::Chunked(indices),
            start_address,
            permanent_address,
            size_bytes,
            object_info,
        })
    }

    /// Build a Privatized region from a per-worker base-address array: one sub-RegionSnapshot
    /// per worker, sharing `start_address` but each reading from (and writing back to) its own
    /// privatized base.
    pub fn capture_privatized<F>(
        region_kind: RegionKind,
        start_address: Address,
        size_bytes: usize,
        object_info: Option<ObjectInformation>,
        worker_bases: &[Address],
        mut capture_worker: F,
    ) -> CoreResult<Self>
    where
        F: FnMut(Address) -> CoreResult<RegionSnapshot>,
    {
        let mut subregions = Vec::with_capacity(worker_bases.len());
        for &base in worker_bases {
            subregions.push(capture_worker(base)?);
        }
        Ok(RegionSnapshot {
            region_kind,
            storage: StorageKind::Privatized(subregions),
            start_address,
            permanent_address: start_address,
            size_bytes,
            object_info,
        })
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start_address && addr < self.start_address.add(self.size_bytes)
    }

    /// Read `buf.len()` bytes at `remote_address` (which must be within this region).
    ///
    /// - Flat: offset into the buffer.
    /// - Chunked: split into `(page_index, page_offset)`; a read confined to one page is served
    ///   zero-copy from the page store when `lazy` is set, otherwise copied into `buf`; a read
    ///   crossing a page boundary always concatenates per-page reads into `buf`.
    /// - Privatized: resolve through the sub-region indicated by `process_index`.
    pub fn read<'a>(
        &'a self,
        buf: &'a mut [u8],
        remote_address: Address,
        process_index: usize,
        lazy: bool,
        page_store: &'a PageStore,
    ) -> CoreResult<ReadResult<'a>> {
        debug_assert!(self.contains(remote_address), "read outside region bounds");
        let offset = remote_address.as_usize() - self.start_address.as_usize();

        match &self.storage {
            StorageKind::NoData => Err(CoreError::InvariantViolation(
                "read from a region with no captured data".to_string(),
            )),
            StorageKind::Flat(data) => {
                buf.copy_from_slice(&data[offset..offset + buf.len()]);
                Ok(ReadResult::Copied(buf.len()))
            }
            StorageKind::Chunked(indices) => {
                let page_size = page_store.page_size();
                let page_index_in_region = offset / page_size;
                let page_offset = offset % page_size;

                if page_offset + buf.len() <= page_size {
                    let page = page_store.get_page(indices[page_index_in_region]);
                    if lazy {
                        return Ok(ReadResult::Borrowed(
                            &page[page_offset..page_offset + buf.len()],
                        ));
                    }
                    buf.copy_from_slice(&page[page_offset..page_offset + buf.len()]);
                    return Ok(ReadResult::Copied(buf.len()));
                }

                // Cross-page read: concatenate per-page reads in order (invariant 7).
                let mut written = 0;
                let mut cur_page = page_index_in_region;
                let mut cur_offset = page_offset;
                while written < buf.len() {
                    let page = page_store.get_page(indices[cur_page]);
                    let take = (page_size - cur_offset).min(buf.len() - written);
                    buf[written..written + take]
                        .copy_from_slice(&page[cur_offset..cur_offset + take]);
                    written += take;
                    cur_page += 1;
                    cur_offset = 0;
                }
                Ok(ReadResult::Copied(buf.len()))
            }
            StorageKind::Privatized(subregions) => {
                let sub = subregions.get(process_index).ok_or_else(|| {
                    CoreError::InvariantViolation(format!(
                        "no privatized sub-region for process index {process_index}"
                    ))
                })?;
                sub.read(buf, remote_address, process_index, lazy, page_store)
            }
        }
    }

    /// Write this region's captured bytes back to `permanent_address` in the live process.
    /// Chunked restoration is page-granular and skips pages known unchanged since the parent
    /// snapshot (`unchanged_pages`, indexed by page number within the region).
    pub fn restore(
        &self,
        process: &ProcessMemory,
        page_store: &PageStore,
        privatization_index: usize,
        unchanged_pages: Option<&dyn Fn(usize) -> bool>,
    ) -> CoreResult<()> {
        match &self.storage {
            StorageKind::NoData => Ok(()),
            StorageKind::Flat(data) => process.write_bytes(self.permanent_address, data),
            StorageKind::Chunked(indices) => {
                let page_size = page_store.page_size();
                for (page_num, &idx) in indices.iter().enumerate() {
                    if let Some(unchanged) = unchanged_pages {
                        if unchanged(page_num) {
                            continue;
                        }
                    }
                    let addr = self.permanent_address.add(page_num * page_size);
                    process.write_bytes(addr, page_store.get_page(idx))?;
                }
                Ok(())
            }
            StorageKind::Privatized(subregions) => {
                let sub = subregions.get(privatization_index).ok_or_else(|| {
                    CoreError::InvariantViolation(format!(
                        "no privatized sub-region for index {privatization_index}"
                    ))
                })?;
                sub.restore(process, page_store, privatization_index, unchanged_pages)
            }
        }
    }

    /// The page-store indices backing a Chunked region, exposed so the checkpoint engine can use
    /// them as the `parent` argument to the next capture's `capture_chunked` (SPEC_FULL.md §4.5).
    pub fn chunked_indices(&self) -> Option<&[PageIndex]> {
        match &self.storage {
            StorageKind::Chunked(indices) => Some(indices),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_with_pages(page_store: &mut PageStore, fills: &[u8], start: Address) -> RegionSnapshot {
        let page_size = page_store.page_size();
        let mut indices = Vec::new();
        for &fill in fills {
            indices.push(page_store.store_page(&vec![fill; page_size]).unwrap());
        }
        RegionSnapshot {
            region_kind: RegionKind::Data,
            storage: StorageKind::Chunked(indices),
            start_address: start,
            permanent_address: start,
            size_bytes: page_size * fills.len(),
            object_info: None,
        }
    }

    #[test]
    fn test_chunked_cross_page_read() {
        let mut page_store = PageStore::new(4, 4096).unwrap();
        let region = region_with_pages(&mut page_store, &[b'A', b'B', b'C'], unsafe {
            Address::from_usize(0x1000)
        });

        let mut buf = vec![0u8; 30];
        let addr = region.start_address.add(4096 - 10);
        region
            .read(&mut buf, addr, 0, false, &page_store)
            .unwrap();
        assert!(buf[..10].iter().all(|&b| b == b'A'));
        assert!(buf[10..30].iter().all(|&b| b == b'B'));
    }

    #[test]
    fn test_chunked_single_page_lazy_borrow() {
        let mut page_store = PageStore::new(2, 4096).unwrap();
        let region = region_with_pages(&mut page_store, &[b'X'], unsafe {
            Address::from_usize(0x2000)
        });

        let mut buf = vec![0u8; 4];
        let addr = region.start_address.add(10);
        let result = region.read(&mut buf, addr, 0, true, &page_store).unwrap();
        match result {
            ReadResult::Borrowed(slice) => assert!(slice.iter().all(|&b| b == b'X')),
            ReadResult::Copied(_) => panic!("expected a borrowed zero-copy read"),
        }
    }

    #[test]
    fn test_rejects_unaligned_chunked_capture() {
        let mut page_store = PageStore::new(2, 4096).unwrap();
        let process = ProcessMemory::for_self();
        let unaligned = unsafe { Address::from_usize(0x1001) };
        let result = RegionSnapshot::capture_chunked(
            &process,
            &mut page_store,
            RegionKind::Heap,
            unaligned,
            unaligned,
            4096,
            None,
            None,
        );
        assert!(result.is_err());
    }
}
