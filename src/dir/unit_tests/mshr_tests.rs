use crate::dir::mshr::{Mshr, MshrEntryKind};
use crate::event::{Command, MemEvent};

fn ev(addr: u64) -> MemEvent {
    MemEvent::new("cacheA", addr, addr, Command::GetS, 64)
}

#[test]
fn new_mshr_is_empty() {
    let mshr = Mshr::new(-1);
    assert_eq!(mshr.size(), 0);
    assert!(!mshr.exists(0));
    assert!(!mshr.has_data(0));
}

#[test]
#[should_panic(expected = "mshr_num_entries")]
fn zero_capacity_is_rejected() {
    let _ = Mshr::new(0);
}

#[test]
fn append_returns_queue_position() {
    let mut mshr = Mshr::new(-1);
    assert_eq!(mshr.insert_event(0x40, ev(0x40), None, false), 0);
    assert_eq!(mshr.insert_event(0x40, ev(0x40), None, false), 1);
    assert_eq!(mshr.insert_event(0x40, ev(0x40), None, false), 2);
    assert_eq!(mshr.size(), 3);
}

#[test]
fn capacity_bound_rejects_ordinary_inserts() {
    let mut mshr = Mshr::new(2);
    assert_eq!(mshr.insert_event(0x40, ev(0x40), None, false), 0);
    assert_eq!(mshr.insert_event(0x80, ev(0x80), None, false), 0);
    assert_eq!(mshr.insert_event(0xc0, ev(0xc0), None, false), -1);
}

#[test]
fn forward_inserts_bypass_capacity() {
    let mut mshr = Mshr::new(1);
    assert_eq!(mshr.insert_event(0x40, ev(0x40), None, false), 0);
    assert_eq!(mshr.insert_event(0x80, ev(0x80), None, true), 0);
    assert_eq!(mshr.size(), 2);
}

#[test]
fn positional_insert_at_front() {
    let mut mshr = Mshr::new(-1);
    let first = ev(0x40);
    let flush = ev(0x40);
    let flush_id = flush.id;
    mshr.insert_event(0x40, first, None, false);
    assert_eq!(mshr.insert_event(0x40, flush, Some(0), true), 0);
    assert_eq!(mshr.front_event(0x40).unwrap().id, flush_id);
}

#[test]
fn positional_insert_behind_front() {
    let mut mshr = Mshr::new(-1);
    let first = ev(0x40);
    let first_id = first.id;
    mshr.insert_event(0x40, first, None, false);
    mshr.insert_event(0x40, ev(0x40), None, false);
    let inv = ev(0x40);
    let inv_id = inv.id;
    assert_eq!(mshr.insert_event(0x40, inv, Some(1), true), 1);
    assert_eq!(mshr.front_event(0x40).unwrap().id, first_id);
    mshr.remove_front(0x40);
    assert_eq!(mshr.front_event(0x40).unwrap().id, inv_id);
}

#[test]
fn remove_front_clears_in_progress() {
    let mut mshr = Mshr::new(-1);
    mshr.insert_event(0x40, ev(0x40), None, false);
    mshr.set_in_progress(0x40);
    assert!(mshr.in_progress(0x40));
    mshr.remove_front(0x40);
    assert!(!mshr.in_progress(0x40));
    assert!(!mshr.exists(0x40));
}

#[test]
fn remove_entry_skips_writeback_marker() {
    let mut mshr = Mshr::new(-1);
    mshr.insert_event(0x40, ev(0x40), None, false);
    mshr.insert_writeback(0x40);
    assert_eq!(mshr.front_type(0x40), Some(MshrEntryKind::Writeback));
    // The request sits at index 1, behind the marker
    mshr.remove_entry(0x40, 1);
    assert_eq!(mshr.front_type(0x40), Some(MshrEntryKind::Writeback));
    assert_eq!(mshr.size(), 1);
}

#[test]
fn pending_writeback_tracks_front_marker() {
    let mut mshr = Mshr::new(-1);
    assert!(!mshr.pending_writeback(0x40));
    mshr.insert_writeback(0x40);
    assert!(mshr.pending_writeback(0x40));
    mshr.remove_front(0x40);
    assert!(!mshr.pending_writeback(0x40));
}

#[test]
fn ack_counter_reports_zero_crossing() {
    let mut mshr = Mshr::new(-1);
    mshr.insert_event(0x40, ev(0x40), None, false);
    mshr.increment_acks_needed(0x40);
    mshr.increment_acks_needed(0x40);
    assert_eq!(mshr.acks_needed(0x40), 2);
    assert!(!mshr.decrement_acks_needed(0x40));
    assert!(mshr.decrement_acks_needed(0x40));
    assert_eq!(mshr.acks_needed(0x40), 0);
}

#[test]
#[should_panic(expected = "ack underflow")]
fn ack_underflow_is_fatal() {
    let mut mshr = Mshr::new(-1);
    mshr.insert_event(0x40, ev(0x40), None, false);
    mshr.decrement_acks_needed(0x40);
}

#[test]
fn data_buffer_round_trip() {
    let mut mshr = Mshr::new(-1);
    mshr.set_data(0x40, vec![1, 2, 3], true);
    assert!(mshr.has_data(0x40));
    assert!(mshr.data_dirty(0x40));
    assert_eq!(mshr.data(0x40).unwrap(), &vec![1, 2, 3]);
    mshr.set_data_dirty(0x40, false);
    assert!(!mshr.data_dirty(0x40));
    mshr.clear_data(0x40);
    assert!(!mshr.has_data(0x40));
}

#[test]
fn data_buffer_does_not_count_as_entry() {
    let mut mshr = Mshr::new(1);
    mshr.set_data(0x40, vec![0; 64], false);
    assert!(!mshr.exists(0x40));
    assert_eq!(mshr.insert_event(0x80, ev(0x80), None, false), 0);
}

#[test]
fn clear_evict_updates_queued_copy() {
    let mut mshr = Mshr::new(-1);
    let mut flush = ev(0x40);
    flush.evict = true;
    let id = flush.id;
    mshr.insert_event(0x40, flush, None, false);
    mshr.clear_evict(0x40, id);
    assert!(!mshr.front_event(0x40).unwrap().evict);
}

#[test]
fn fill_and_drain_repeatedly() {
    let mut mshr = Mshr::new(4);
    for round in 0..50 {
        for line in 0..4u64 {
            assert_eq!(mshr.insert_event(line * 64, ev(line * 64), None, false), 0, "round {round}");
        }
        for line in 0..4u64 {
            mshr.remove_front(line * 64);
        }
        assert_eq!(mshr.size(), 0, "round {round}");
    }
}
