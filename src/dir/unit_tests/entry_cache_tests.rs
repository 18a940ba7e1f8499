use crate::dir::entry_cache::EntryCache;

#[test]
fn new_cache_is_empty() {
    let cache = EntryCache::new();
    assert!(cache.is_empty());
    assert_eq!(cache.len(), 0);
    assert!(!cache.contains(0x40));
}

#[test]
fn touch_inserts_and_promotes() {
    let mut cache = EntryCache::new();
    cache.touch(0x40);
    cache.touch(0x80);
    cache.touch(0xc0);
    assert_eq!(cache.len(), 3);
    // 0x40 is coldest
    assert_eq!(cache.coldest().next(), Some(0x40));
    cache.touch(0x40);
    assert_eq!(cache.coldest().next(), Some(0x80));
}

#[test]
fn touch_is_idempotent_on_size() {
    let mut cache = EntryCache::new();
    cache.touch(0x40);
    cache.touch(0x40);
    assert_eq!(cache.len(), 1);
}

#[test]
fn coldest_iterates_lru_to_mru() {
    let mut cache = EntryCache::new();
    cache.touch(1);
    cache.touch(2);
    cache.touch(3);
    let order: Vec<u64> = cache.coldest().collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn evict_removes_entry() {
    let mut cache = EntryCache::new();
    cache.touch(0x40);
    cache.touch(0x80);
    cache.evict(0x40);
    assert_eq!(cache.len(), 1);
    assert!(!cache.contains(0x40));
    assert!(cache.contains(0x80));
}

#[test]
fn remove_missing_is_noop() {
    let mut cache = EntryCache::new();
    cache.touch(0x40);
    cache.remove(0x80);
    assert_eq!(cache.len(), 1);
}
