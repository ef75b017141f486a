//! The "Dedup basic" scenario from the spec, run as a black-box integration test against the
//! public `PageStore` API.

use mc_snapshot_core::page_store::PageStore;

#[test]
fn dedup_basic_scenario() {
    let page_size = 4096;
    let mut store = PageStore::new(2, page_size).unwrap();

    let p1 = store.store_page(&vec![1u8; page_size]).unwrap();
    assert_eq!(store.get_ref(p1), 1);
    assert_eq!(store.size(), 1);

    let p1_again = store.store_page(&vec![1u8; page_size]).unwrap();
    assert_eq!(p1_again, p1);
    assert_eq!(store.get_ref(p1), 2);

    let p2 = store.store_page(&vec![2u8; page_size]).unwrap();
    assert_ne!(p2, p1);
    assert_eq!(store.size(), 2);

    store.unref_page(p1);
    store.unref_page(p1);
    assert_eq!(store.size(), 1);

    let p3 = store.store_page(&vec![3u8; page_size]).unwrap();
    assert_eq!(p3, p1, "freed index should be reused");
    assert_eq!(store.get_ref(p3), 1);
    assert_eq!(store.size(), 2);
}
