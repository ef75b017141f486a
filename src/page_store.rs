//! Content-addressed, reference-counted storage of fixed-size memory pages (SPEC_FULL.md §4.1).
//!
//! Pages are deduplicated by a cheap non-cryptographic hash (djb2 over the page's `u64` words),
//! with byte-equality confirmation on hash hits to resolve collisions. External references to a
//! page are always *indices* into the store, never pointers: the backing arena can be relocated
//! by the OS (`mremap`) when it grows, which would otherwise invalidate any pointer handed out
//! before the growth. See `PageStoreArena` below.

use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::process_mem::wrap_libc_call;

/// A stable handle to a page held by a [`PageStore`]. Never a pointer; always resolved to one
/// through [`PageStore::get_page`] at the point of use, so that arena growth never dangles a
/// reference a caller is holding on to.
pub type PageIndex = usize;

/// djb2 hash of a page, computed over its content as an array of native-endian `u64` words.
/// Matches the original implementation's `mc_hash_page`: cheap, not cryptographic, expected to
/// collide occasionally — collisions are resolved by the byte compare in `store_page`.
pub fn djb2_hash_page(page: &[u8]) -> u64 {
    debug_assert_eq!(
        page.len() % 8,
        0,
        "page size must be a multiple of 8 bytes for word-stride hashing"
    );
    let mut hash: u64 = 5381;
    for word in page.chunks_exact(8) {
        let v = u64::from_ne_bytes(word.try_into().unwrap());
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(v);
    }
    hash
}

/// The growable backing store for page content. Pages are addressed by index; the arena may
/// relocate its backing allocation on growth, via `mremap` on platforms that support it and via
/// allocate-copy-free elsewhere. No raw pointer into the arena may outlive a single `get_page`
/// call across a potential growth.
struct PageStoreArena {
    memory: *mut u8,
    capacity_pages: usize,
    page_size: usize,
}

// The arena is only ever driven by the single-threaded checkpoint engine (SPEC_FULL.md §5); it
// holds no interior-mutability invariants that require `Sync`.
unsafe impl Send for PageStoreArena {}

impl PageStoreArena {
    fn new(initial_pages: usize, page_size: usize) -> CoreResult<Self> {
        let bytesize = initial_pages * page_size;
        let memory = wrap_libc_call(
            &|| unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    bytesize.max(page_size),
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            },
            libc::MAP_FAILED,
        )
        .map_err(|source| CoreError::OsResourceExhausted {
            operation: "mmap (page store arena)",
            source,
        })?;
        Ok(PageStoreArena {
            memory: memory as *mut u8,
            capacity_pages: initial_pages.max(1),
            page_size,
        })
    }

    /// Grow the arena to `new_capacity_pages`, relocating the backing allocation if the OS
    /// requires it. Any pointer a caller obtained from `page_ptr` before this call is invalid
    /// afterwards — callers must never cache such pointers across a `store_page`/`grow` call.
    fn grow(&mut self, new_capacity_pages: usize) -> CoreResult<()> {
        let old_bytesize = self.capacity_pages * self.page_size;
        let new_bytesize = new_capacity_pages * self.page_size;

        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                let new_memory = wrap_libc_call(
                    &|| unsafe {
                        libc::mremap(
                            self.memory as *mut libc::c_void,
                            old_bytesize,
                            new_bytesize,
                            libc::MREMAP_MAYMOVE,
                        )
                    },
                    libc::MAP_FAILED,
                )
                .map_err(|source| CoreError::OsResourceExhausted {
                    operation: "mremap (page store arena growth)",
                    source,
                })?;
                self.memory = new_memory as *mut u8;
            } else {
                let new_memory = wrap_libc_call(
                    &|| unsafe {
                        libc::mmap(
                            std::ptr::null_mut(),
                            new_bytesize,
                            libc::PROT_READ | libc::PROT_WRITE,
                            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                            -1,
                            0,
                        )
                    },
                    libc::MAP_FAILED,
                )
                .map_err(|source| CoreError::OsResourceExhausted {
                    operation: "mmap (page store arena growth, non-linux fallback)",
                    source,
                })?;
                unsafe {
                    std::ptr::copy_nonoverlapping(self.memory, new_memory as *mut u8, old_bytesize);
                }
                let _ = wrap_libc_call(
                    &|| unsafe { libc::munmap(self.memory as *mut libc::c_void, old_bytesize) },
                    -1,
                );
                self.memory = new_memory as *mut u8;
            }
        }

        self.capacity_pages = new_capacity_pages;
        Ok(())
    }

    fn page_ptr(&self, index: PageIndex) -> *const u8 {
        debug_assert!(index < self.capacity_pages, "page index out of bounds");
        unsafe { self.memory.add(index * self.page_size) }
    }

    fn page_mut_ptr(&mut self, index: PageIndex) -> *mut u8 {
        debug_assert!(index < self.capacity_pages, "page index out of bounds");
        unsafe { self.memory.add(index * self.page_size) }
    }
}

impl Drop for PageStoreArena {
    fn drop(&mut self) {
        let bytesize = self.capacity_pages * self.page_size;
        let _ = wrap_libc_call(
            &|| unsafe { libc::munmap(self.memory as *mut libc::c_void, bytesize) },
            -1,
        );
    }
}

/// Deduplicated, reference-counted storage of fixed-size memory pages.
///
/// See SPEC_FULL.md §4.1 and invariants 1-4 of §8: the sum of refcounts equals the outstanding
/// references issued; content at a live index never changes after `store_page` returns it; byte-
/// equal stores dedup to the same index; a reclaimed index is reused only after its refcount
/// reaches zero.
pub struct PageStore {
    arena: PageStoreArena,
    page_size: usize,
    top_index: usize,
    refcounts: Vec<u64>,
    free_pages: Vec<PageIndex>,
    hash_index: HashMap<u64, HashSet<PageIndex>>,
}

impl PageStore {
    /// Create a page store with room for `initial_pages` pages of `page_size` bytes each.
    /// `page_size` must be a multiple of 8 (word-stride hashing, see `djb2_hash_page`).
    pub fn new(initial_pages: usize, page_size: usize) -> CoreResult<Self> {
        if page_size % 8 != 0 {
            return Err(CoreError::InvariantViolation(format!(
                "page size {page_size} is not a multiple of 8"
            )));
        }
        let capacity = initial_pages.max(1);
        Ok(PageStore {
            arena: PageStoreArena::new(capacity, page_size)?,
            page_size,
            top_index: 0,
            refcounts: vec![0; capacity],
            free_pages: Vec::new(),
            hash_index: HashMap::new(),
        })
    }

    /// Store a page's content, deduplicating against existing pages. Returns the index the
    /// caller should hold on to; the index's refcount is incremented by 1 (to 1, on first
    /// store).
    pub fn store_page(&mut self, data: &[u8]) -> CoreResult<PageIndex> {
        debug_assert_eq!(data.len(), self.page_size, "page content has the wrong size");

        let hash = djb2_hash_page(data);

        if let Some(candidates) = self.hash_index.get(&hash) {
            for &candidate in candidates {
                if self.page_bytes(candidate) == data {
                    self.refcounts[candidate] += 1;
                    trace!("store_page: deduplicated into existing page {candidate}");
                    return Ok(candidate);
                }
            }
        }

        let index = self.alloc_page()?;
        debug_assert_eq!(self.refcounts[index], 0, "allocated page is already referenced");
        unsafe {
            let dst = self.arena.page_mut_ptr(index);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, self.page_size);
        }
        self.hash_index.entry(hash).or_default().insert(index);
        self.refcounts[index] = 1;
        trace!("store_page: new page {index} (hash {hash:#x})");
        Ok(index)
    }

    /// Increment the refcount of a page known (by the caller, e.g. via soft-dirty tracking) to
    /// already hold the desired content. Avoids re-reading, hashing and comparing the page.
    pub fn ref_page(&mut self, index: PageIndex) {
        trace!("ref_page({index})");
        self.refcounts[index] += 1;
    }

    /// Decrement a page's refcount; reclaim it (add to the free list, remove from the hash
    /// index) once the count reaches zero.
    pub fn unref_page(&mut self, index: PageIndex) {
        debug_assert!(self.refcounts[index] > 0, "unref of a page with zero refcount");
        self.refcounts[index] -= 1;
        trace!("unref_page({index}) -> refcount {}", self.refcounts[index]);
        if self.refcounts[index] == 0 {
            self.remove_page(index);
        }
    }

    /// Borrow a page's content. The returned slice is valid only until the next call that may
    /// grow the arena (`store_page` on a miss); callers must not hold it across such a call.
    pub fn get_page(&self, index: PageIndex) -> &[u8] {
        self.page_bytes(index)
    }

    /// The current refcount of a page (debug/test introspection, per SPEC_FULL.md §4.1).
    pub fn get_ref(&self, index: PageIndex) -> u64 {
        self.refcounts[index]
    }

    /// Number of pages currently in use (not on the free list).
    pub fn size(&self) -> usize {
        self.top_index - self.free_pages.len()
    }

    /// Current arena capacity, in pages.
    pub fn capacity(&self) -> usize {
        self.arena.capacity_pages
    }

    /// The page size this store was constructed with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_bytes(&self, index: PageIndex) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.arena.page_ptr(index), self.page_size) }
    }

    fn alloc_page(&mut self) -> CoreResult<PageIndex> {
        if let Some(index) = self.free_pages.pop() {
            return Ok(index);
        }
        if self.top_index == self.arena.capacity_pages {
            let new_capacity = (self.arena.capacity_pages * 2).max(1);
            debug!(
                "page store growing: {} -> {} pages",
                self.arena.capacity_pages, new_capacity
            );
            self.arena.grow(new_capacity)?;
            self.refcounts.resize(new_capacity, 0);
        }
        let index = self.top_index;
        self.top_index += 1;
        Ok(index)
    }

    fn remove_page(&mut self, index: PageIndex) {
        self.free_pages.push(index);
        let hash = djb2_hash_page(self.page_bytes(index));
        if let Some(set) = self.hash_index.get_mut(&hash) {
            set.remove(&index);
            if set.is_empty() {
                self.hash_index.remove(&hash);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page_size: usize, fill: u8) -> Vec<u8> {
        vec![fill; page_size]
    }

    #[test]
    fn test_dedup_basic() {
        let page_size = 4096;
        let mut store = PageStore::new(4, page_size).unwrap();
        assert_eq!(store.size(), 0);

        let data1 = page(page_size, 1);
        let p1 = store.store_page(&data1).unwrap();
        assert_eq!(store.get_ref(p1), 1);
        assert_eq!(store.get_page(p1), data1.as_slice());
        assert_eq!(store.size(), 1);

        let p2 = store.store_page(&data1).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(store.get_ref(p1), 2);
        assert_eq!(store.size(), 1);

        let data2 = page(page_size, 2);
        let p3 = store.store_page(&data2).unwrap();
        assert_ne!(p1, p3);
        assert_eq!(store.size(), 2);

        store.unref_page(p1);
        assert_eq!(store.get_ref(p1), 1);
        assert_eq!(store.size(), 2);
        store.unref_page(p2);
        assert_eq!(store.size(), 1);

        let data3 = page(page_size, 3);
        let p4 = store.store_page(&data3).unwrap();
        assert_eq!(p1, p4, "reclaimed index should be reused");
        assert_eq!(store.get_ref(p4), 1);
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_growth_preserves_content() {
        let page_size = 4096;
        let mut store = PageStore::new(1, page_size).unwrap();
        let mut indices = Vec::new();
        for i in 0..10u8 {
            let data = page(page_size, i);
            indices.push((i, store.store_page(&data).unwrap()));
        }
        for (fill, idx) in indices {
            assert_eq!(store.get_page(idx), page(page_size, fill).as_slice());
        }
    }

    #[test]
    fn test_refcount_conservation() {
        let page_size = 4096;
        let mut store = PageStore::new(2, page_size).unwrap();
        let data = page(page_size, 7);
        let idx = store.store_page(&data).unwrap();
        store.ref_page(idx);
        store.ref_page(idx);
        assert_eq!(store.get_ref(idx), 3);
        store.unref_page(idx);
        store.unref_page(idx);
        store.unref_page(idx);
        assert_eq!(store.get_ref(idx), 0);
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_rejects_non_word_aligned_page_size() {
        assert!(PageStore::new(1, 4095).is_err());
    }
}
