use super::*;
use crate::dir::entry::CoherenceState::*;
use crate::event::Command;

#[test]
fn flush_line_on_clean_shared_line() {
    let mut b = Bench::new("MSI");
    seed_s(&mut b, &["cacheA"], 0);

    b.deliver(req("cacheA", Command::FlushLine, 0));
    let flush = b.run_until_mem(|e| e.cmd == Command::FlushLine);
    assert!(!flush.evict, "clean line flushes without a payload");
    assert_eq!(b.dir.entry_state(0), Some(SB));

    b.deliver(data_resp(&flush, Command::FlushLineResp, Vec::new()));
    let resp = b.run_until_cpu(|e| e.cmd == Command::FlushLineResp);
    assert_eq!(resp.dst, "cacheA");
    assert_eq!(b.dir.entry_state(0), Some(S));
    assert_invariants(&b.dir);
}

#[test]
fn flush_line_with_eviction_carries_dirty_data() {
    let mut b = Bench::new("MESI");
    seed_m(&mut b, "cacheA", 0);

    let mut flush_req = req("cacheA", Command::FlushLine, 0);
    flush_req.evict = true;
    flush_req.dirty = true;
    flush_req.payload = vec![0x3c; LINE as usize];
    b.deliver(flush_req);

    let flush = b.run_until_mem(|e| e.cmd == Command::FlushLine);
    assert!(flush.evict);
    assert!(flush.dirty);
    assert_eq!(flush.payload, vec![0x3c; LINE as usize]);
    assert_eq!(b.dir.entry_state(0), Some(SB));

    b.deliver(data_resp(&flush, Command::FlushLineResp, Vec::new()));
    b.run_until_cpu(|e| e.cmd == Command::FlushLineResp);

    // The evicting owner is downgraded to a sharer
    let entry = b.dir.entry(0).unwrap();
    assert_eq!(entry.state(), S);
    assert!(entry.is_sharer("cacheA"));
    assert!(!entry.has_owner());
    assert_invariants(&b.dir);
}

#[test]
fn flush_line_downgrades_remote_owner_first() {
    let mut b = Bench::new("MESI");
    seed_m(&mut b, "cacheA", 0);

    // Another client flushes; the owner must be downgraded first
    b.deliver(req("cacheB", Command::FlushLine, 0));
    let fetch = b.run_until_cpu(|e| e.cmd == Command::FetchInvX);
    assert_eq!(fetch.dst, "cacheA");
    assert_eq!(b.dir.entry_state(0), Some(MInvX));

    let mut resp = data_resp(&fetch, Command::FetchXResp, vec![0x4d; LINE as usize]);
    resp.dirty = true;
    b.deliver(resp);

    // The dirty payload rides the flush to memory
    let flush = b.run_until_mem(|e| e.cmd == Command::FlushLine);
    assert!(flush.evict);
    assert_eq!(flush.payload, vec![0x4d; LINE as usize]);
    assert_eq!(b.dir.entry_state(0), Some(SB));

    b.deliver(data_resp(&flush, Command::FlushLineResp, Vec::new()));
    let resp = b.run_until_cpu(|e| e.cmd == Command::FlushLineResp);
    assert_eq!(resp.dst, "cacheB");

    let entry = b.dir.entry(0).unwrap();
    assert_eq!(entry.state(), S);
    assert!(entry.is_sharer("cacheA"), "old owner keeps a shared copy");
    assert_invariants(&b.dir);
}

#[test]
fn flush_line_inv_with_outstanding_owner() {
    let mut b = Bench::new("MESI");
    seed_m(&mut b, "cacheA", 0);

    b.deliver(req("cacheB", Command::FlushLineInv, 0));
    let fetch = b.run_until_cpu(|e| e.cmd == Command::FetchInv);
    assert_eq!(fetch.dst, "cacheA");
    assert_eq!(b.dir.entry_state(0), Some(MInv));

    let mut fetch_resp = data_resp(&fetch, Command::FetchResp, vec![0x5e; LINE as usize]);
    fetch_resp.dirty = true;
    b.deliver(fetch_resp);

    // Dirty data is written back, then the flush goes to memory
    let wb = b.run_until_mem(|e| e.cmd == Command::PutM);
    assert_eq!(wb.payload, vec![0x5e; LINE as usize]);
    let flush = b.run_until_mem(|e| e.cmd == Command::FlushLine || e.cmd == Command::FlushLineInv);

    b.deliver(data_resp(&flush, Command::FlushLineResp, Vec::new()));
    let resp = b.run_until_cpu(|e| e.cmd == Command::FlushLineResp);
    assert_eq!(resp.dst, "cacheB");
    assert!(b.dir.entry(0).is_none(), "line ends invalid and the entry is deleted");
}

#[test]
fn flush_line_inv_invalidates_sharers_first() {
    let mut b = Bench::new("MSI");
    seed_s(&mut b, &["cacheA", "cacheB"], 0);

    let mut flush_req = req("cacheB", Command::FlushLineInv, 0);
    flush_req.evict = true;
    b.deliver(flush_req);

    // cacheB dropped its copy with the request; only cacheA gets an Inv
    let inv = b.run_until_cpu(|e| e.cmd == Command::Inv);
    assert_eq!(inv.dst, "cacheA");
    assert_eq!(b.dir.entry_state(0), Some(SInv));

    b.deliver(data_resp(&inv, Command::AckInv, Vec::new()));
    let flush = b.run_until_mem(|e| e.cmd == Command::FlushLineInv);
    b.deliver(data_resp(&flush, Command::FlushLineResp, Vec::new()));
    let resp = b.run_until_cpu(|e| e.cmd == Command::FlushLineResp);
    assert_eq!(resp.dst, "cacheB");
    assert!(b.dir.entry(0).is_none());
}

#[test]
fn flush_line_inv_on_idle_line() {
    let mut b = Bench::new("MESI");
    b.deliver(req("cacheA", Command::FlushLineInv, 0));
    let flush = b.run_until_mem(|e| e.cmd == Command::FlushLineInv);
    b.deliver(data_resp(&flush, Command::FlushLineResp, Vec::new()));
    let resp = b.run_until_cpu(|e| e.cmd == Command::FlushLineResp);
    assert_eq!(resp.dst, "cacheA");
}
