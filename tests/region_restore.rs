//! Region capture/restore round-trip scenarios (spec scenarios: "Region restore", "Chunked
//! reads").

use mc_snapshot_core::page_store::PageStore;
use mc_snapshot_core::process_mem::ProcessMemory;
use mc_snapshot_core::region::{RegionKind, RegionSnapshot};
use mc_snapshot_core::util::Address;

#[test]
fn flat_region_round_trip_after_overwrite() {
    let process = ProcessMemory::for_self();
    let mut buf = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let addr = Address::from_ptr(buf.as_ptr());

    let snapshot = RegionSnapshot::capture_flat(
        &process,
        RegionKind::Data,
        addr,
        addr,
        buf.len(),
        None,
    )
    .unwrap();

    buf[3] = 0xFF;
    assert_ne!(buf[3], 4);

    snapshot.restore(&process, &PageStore::new(1, 4096).unwrap(), 0, None).unwrap();
    assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn chunked_and_flat_captures_agree_on_bytes() {
    let page_size = 4096;
    let process = ProcessMemory::for_self();
    let mut page_store = PageStore::new(4, page_size).unwrap();

    let mut region = vec![0u8; page_size * 2];
    for (i, b) in region.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let addr = Address::from_ptr(region.as_ptr());

    let flat = RegionSnapshot::capture_flat(&process, RegionKind::Data, addr, addr, region.len(), None).unwrap();
    let chunked = RegionSnapshot::capture_chunked(
        &process,
        &mut page_store,
        RegionKind::Data,
        addr,
        addr,
        region.len(),
        None,
        None,
    )
    .unwrap();

    let mut flat_buf = vec![0u8; region.len()];
    flat.read(&mut flat_buf, addr, 0, false, &page_store).unwrap();

    let mut chunked_buf = vec![0u8; region.len()];
    chunked.read(&mut chunked_buf, addr, 0, false, &page_store).unwrap();

    assert_eq!(flat_buf, chunked_buf);
    assert_eq!(flat_buf, region);
}
