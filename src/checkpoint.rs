//! Drives Snapshot creation and restoration; owns the PageStore and coordinates soft-dirty reset
//! and parent-snapshot sharing (SPEC_FULL.md §4.5).
//!
//! Per §9's re-architecture note on the "global mutable model-checker singleton": this engine is
//! an explicit context value threaded through entry points, not ambient global state. Inner
//! subsystems ([`crate::page_store::PageStore`], [`crate::region::RegionSnapshot`]) receive only
//! the resources they need.

use crate::error::CoreResult;
use crate::memory_map::MemoryMap;
use crate::object_info::ObjectInformation;
use crate::options::Options;
use crate::page_store::PageStore;
use crate::process_mem::ProcessMemory;
use crate::region::{RegionKind, RegionSnapshot};
use crate::snapshot::{IgnoredBlob, Snapshot};
use crate::softdirty;
use crate::util::Address;

/// Owns the page store and the notion of "the parent snapshot" across a sequence of captures.
pub struct Checkpoint {
    options: Options,
    page_store: PageStore,
    target_pid: i32,
    process: ProcessMemory,
    /// The most recent snapshot whose page indices accurately describe live memory. Protected
    /// from being dropped by the exploration algorithm's own refcounting (SPEC_FULL.md §4.5,
    /// "Important snapshots") — enforced by the caller, this engine just never overwrites it
    /// until a restore completes.
    parent: Option<Snapshot>,
    next_num_state: u64,
}

impl Checkpoint {
    pub fn new(target_pid: i32, is_self: bool, options: Options) -> CoreResult<Self> {
        let page_size = crate::process_mem::os_page_size();
        let initial_pages = options.flat_region_threshold_bytes.div_ceil(page_size).max(16);
        Ok(Checkpoint {
            page_store: PageStore::new(initial_pages, page_size)?,
            process: if is_self {
                ProcessMemory::for_self()
            } else {
                ProcessMemory::for_child(target_pid)?
            },
            target_pid,
            options,
            parent: None,
            next_num_state: 0,
        })
    }

    pub fn page_store(&self) -> &PageStore {
        &self.page_store
    }

    pub fn page_store_mut(&mut self) -> &mut PageStore {
        &mut self.page_store
    }

    pub fn parent(&self) -> Option<&Snapshot> {
        self.parent.as_ref()
    }

    /// Capture a new Snapshot of the target over the data segments named by `objects` (each
    /// writable ELF object's data segment becomes a Data region) plus one Heap region covering
    /// `[heap_base, heap_break)`.
    ///
    /// Follows SPEC_FULL.md §4.3's construction flow. Open-file enumeration is performed here
    /// (see [`crate::process_mem::enumerate_open_files`]); ignored regions are neutralized before
    /// capture and restored afterward (step 2, step 9). Per-thread stack unwinding requires a
    /// DWARF/unwind-info collaborator out of this crate's scope and is taken as an
    /// already-resolved input (DESIGN.md, Open Question 3).
    pub fn capture(
        &mut self,
        objects: &[(ObjectInformation, &str)],
        heap_base: Address,
        heap_break: Address,
        heap_bytes_used: usize,
        ignored_regions: &[(Address, usize)],
    ) -> CoreResult<Snapshot> {
        let num_state = self.next_num_state;
        self.next_num_state += 1;
        let mut snapshot = Snapshot::new(num_state);
        snapshot.live_pids.push(self.target_pid);

        // Step 2: read each ignored region's current bytes, then zero them so volatile content
        // (counters, timestamps) doesn't poison hashing or comparison.
        let mut blobs = Vec::with_capacity(ignored_regions.len());
        for &(address, len) in ignored_regions {
            let mut original_bytes = vec![0u8; len];
            self.process.read_bytes(address, &mut original_bytes)?;
            self.process.write_bytes(address, &vec![0u8; len])?;
            blobs.push(IgnoredBlob { address, original_bytes });
        }

        let page_size = self.page_store.page_size();
        let sparse = self.options.sparse_checkpointing;

        for (index, (info, _pathname)) in objects.iter().enumerate() {
            if !info.has_rw_segment() {
                continue;
            }
            let start = info.start_rw;
            let size = info.end_rw.as_usize() - info.start_rw.as_usize();
            let region = self.capture_data_region(start, start, size, Some(*info), index, sparse, page_size)?;
            snapshot.regions.push(region);
        }

        let heap_size = heap_break.as_usize().saturating_sub(heap_base.as_usize());
        if heap_size > 0 {
            let parent_chunked = self
                .parent
                .as_ref()
                .and_then(|p| p.regions.iter().find(|r| r.region_kind == RegionKind::Heap))
                .and_then(|r| r.chunked_indices())
                .map(|v| v.to_vec());
            let heap_region = self.capture_region_with_parent(
                RegionKind::Heap,
                heap_base,
                heap_base,
                heap_size,
                None,
                sparse,
                page_size,
                parent_chunked.as_deref(),
            )?;
            snapshot.regions.push(heap_region);
        }

        snapshot.heap_bytes_used = heap_bytes_used;
        snapshot.open_files = crate::process_mem::enumerate_open_files(self.target_pid)
            .unwrap_or_else(|e| {
                warn!("open-file enumeration failed for pid {}: {e}", self.target_pid);
                Vec::new()
            });
        snapshot.hash = snapshot.compute_hash();

        // Step 9: put the live process back the way we found it now that hashing is done.
        for blob in &blobs {
            self.process.write_bytes(blob.address, &blob.original_bytes)?;
        }
        snapshot.ignored = blobs;

        if self.options.soft_dirty {
            softdirty::clear_soft_dirty(self.target_pid)?;
            self.parent = None; // superseded below once this capture is published
        }

        debug!(
            "captured snapshot #{num_state}: {} regions, {} heap bytes used",
            snapshot.regions.len(),
            heap_bytes_used
        );

        Ok(snapshot)
    }

    /// Publish `snapshot` as the new parent. Called by the caller once a capture is known-good
    /// (or after a restore, per "Restore-parent coherence", SPEC_FULL.md §4.5).
    pub fn publish_parent(&mut self, snapshot: Snapshot) {
        self.parent = Some(snapshot);
    }

    /// Restore `snapshot` into the live target, then publish it as the new parent (its page
    /// indices now accurately describe live memory again).
    pub fn restore(&mut self, snapshot: Snapshot) -> CoreResult<()> {
        snapshot.restore(&self.process, &self.page_store, self.parent.as_ref())?;
        self.parent = Some(snapshot);
        Ok(())
    }

    /// Parse the target's `/proc/<pid>/maps` and classify each named object's segments
    /// (SPEC_FULL.md §4.6); a thin convenience wrapper kept here so callers do not need to
    /// depend on [`crate::memory_map`] directly for the common case.
    ///
    /// Determining which object is the main executable is the loader's job (out of scope here,
    /// per SPEC_FULL.md's ObjectInformation note), so this wrapper takes `pathnames` in loader
    /// order and treats the first entry as the executable, matching the convention the loader
    /// itself uses when handing this crate its object list.
    pub fn discover_objects(&self, pathnames: &[String]) -> CoreResult<Vec<ObjectInformation>> {
        let map = MemoryMap::read_for_pid(self.target_pid)?;
        let main_executable = pathnames.first().map(String::as_str);
        pathnames
            .iter()
            .map(|p| map.classify_object(p, Some(p.as_str()) == main_executable))
            .collect()
    }

    fn capture_data_region(
        &mut self,
        start: Address,
        permanent: Address,
        size: usize,
        info: Option<ObjectInformation>,
        parent_region_index: usize,
        sparse: bool,
        page_size: usize,
    ) -> CoreResult<RegionSnapshot> {
        let parent_chunked = self
            .parent
            .as_ref()
            .and_then(|p| p.regions.get(parent_region_index))
            .and_then(|r| r.chunked_indices())
            .map(|v| v.to_vec());
        self.capture_region_with_parent(
            RegionKind::Data,
            start,
            permanent,
            size,
            info,
            sparse,
            page_size,
            parent_chunked.as_deref(),
        )
    }

    fn capture_region_with_parent(
        &mut self,
        kind: RegionKind,
        start: Address,
        permanent: Address,
        size: usize,
        info: Option<ObjectInformation>,
        sparse: bool,
        page_size: usize,
        parent_indices: Option<&[crate::page_store::PageIndex]>,
    ) -> CoreResult<RegionSnapshot> {
        let use_chunked = sparse
            && size > self.options.flat_region_threshold_bytes
            && start.is_aligned_to(page_size)
            && permanent.is_aligned_to(page_size);

        if use_chunked {
            if self.options.soft_dirty {
                if let Ok(mut pagemap) = softdirty::PagemapReader::open(self.target_pid) {
                    let mut unchanged = Vec::new();
                    let page_count = size.div_ceil(page_size);
                    for page_num in 0..page_count {
                        let addr = start.add(page_num * page_size);
                        unchanged.push(!pagemap.is_dirty(addr).unwrap_or(true));
                    }
                    let predicate = move |page_num: usize| unchanged.get(page_num).copied().unwrap_or(false);
                    return RegionSnapshot::capture_chunked(
                        &self.process,
                        &mut self.page_store,
                        kind,
                        start,
                        permanent,
                        size,
                        info,
                        parent_indices.map(|idx| (idx, &predicate as &dyn Fn(usize) -> bool)),
                    );
                }
            }
            // No soft-dirty support: every page is treated as potentially dirty, so
            // `capture_chunked` re-reads and re-hashes every page (SPEC_FULL.md §10, Options).
            let always_dirty = |_: usize| false;
            RegionSnapshot::capture_chunked(
                &self.process,
                &mut self.page_store,
                kind,
                start,
                permanent,
                size,
                info,
                parent_indices.map(|idx| (idx, &always_dirty as &dyn Fn(usize) -> bool)),
            )
        } else {
            RegionSnapshot::capture_flat(&self.process, kind, start, permanent, size, info)
        }
    }
}
