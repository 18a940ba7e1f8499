//! Per-command handlers of the directory state machine. Each handler
//! returns true when the event was consumed this cycle (completed,
//! parked in the MSHR, or NACKed); false means "try again next cycle".

use log::warn;

use crate::dir::controller::{CoherenceProtocol, DirectoryController, MemEventStatus};
use crate::dir::entry::CoherenceState::*;
use crate::event::{Command, MemEvent};

impl DirectoryController {
    pub(crate) fn handle_get_s(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();
        let mut status = MemEventStatus::Ok;

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        // Data was temporarily buffered here due to racing accesses
        if self.mshr.has_data(addr) && self.mshr.data_dirty(addr) {
            self.writeback_data_from_mshr(addr);
        }

        match state {
            I => {
                if self.mshr.has_data(addr) && !in_mshr {
                    warn!(
                        "{}: mshr should not have data for 0x{:x} but it does",
                        self.name, addr
                    );
                }
                if self.mshr.has_data(addr) && in_mshr {
                    let data = self.mshr.data(addr).unwrap().clone();
                    if self.incoherent_src.contains(&ev.src) {
                        // Non-caching device: respond without allocating
                        self.send_data_response(&ev, data, Command::GetSResp, 0);
                    } else if self.protocol == CoherenceProtocol::Mesi {
                        let entry = self.entry_mut(addr);
                        entry.set_state(M);
                        entry.set_owner(ev.src.clone());
                        self.send_data_response(&ev, data, Command::GetXResp, 0);
                        self.mshr.clear_data(addr);
                    } else {
                        let entry = self.entry_mut(addr);
                        entry.set_state(S);
                        entry.add_sharer(ev.src.clone());
                        self.send_data_response(&ev, data, Command::GetSResp, 0);
                    }
                    self.clean_up_after_request(&ev, in_mshr);
                } else {
                    // Miss, get data from memory
                    status = if in_mshr {
                        MemEventStatus::Ok
                    } else {
                        self.allocate_mshr(&ev, false, None)
                    };
                    if status == MemEventStatus::Ok {
                        self.issue_memory_request(&ev, true);
                        self.entry_mut(addr).set_state(IS);
                    }
                }
            }
            S => {
                if self.mshr.has_data(addr) {
                    // Saved from an earlier request
                    let data = self.mshr.data(addr).unwrap().clone();
                    if !self.incoherent_src.contains(&ev.src) {
                        self.entry_mut(addr).add_sharer(ev.src.clone());
                    }
                    self.send_data_response(&ev, data, Command::GetSResp, 0);
                    self.clean_up_after_request(&ev, in_mshr);
                } else {
                    status = if in_mshr {
                        MemEventStatus::Ok
                    } else {
                        self.allocate_mshr(&ev, false, None)
                    };
                    if status == MemEventStatus::Ok {
                        self.issue_memory_request(&ev, true);
                        self.entry_mut(addr).set_state(SD);
                    }
                }
            }
            M => {
                status = if in_mshr {
                    MemEventStatus::Ok
                } else {
                    self.allocate_mshr(&ev, false, None)
                };
                if status == MemEventStatus::Ok {
                    let owner = self.directory[&addr].owner().cloned().expect("owner in M");
                    self.issue_fetch(&ev, owner, Command::FetchInvX);
                    self.entry_mut(addr).set_state(MInvX);
                }
            }
            _ => {
                // Transient: queue behind the in-flight transition
                if !in_mshr {
                    status = self.allocate_mshr(&ev, false, None);
                }
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&ev);
        }
        true
    }

    pub(crate) fn handle_get_sx(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        self.handle_get_x(ev, in_mshr)
    }

    pub(crate) fn handle_get_x(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();
        let mut status = MemEventStatus::Ok;

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        if self.mshr.has_data(addr) && self.mshr.data_dirty(addr) {
            self.writeback_data_from_mshr(addr);
        }

        match state {
            I => {
                if self.mshr.has_data(addr) && !in_mshr {
                    warn!(
                        "{}: mshr should not have data for 0x{:x} but it does",
                        self.name, addr
                    );
                }
                if self.mshr.has_data(addr) && in_mshr {
                    let data = self.mshr.data(addr).unwrap().clone();
                    if !self.incoherent_src.contains(&ev.src) {
                        let entry = self.entry_mut(addr);
                        entry.set_state(M);
                        entry.set_owner(ev.src.clone());
                    }
                    self.send_data_response(&ev, data, Command::GetXResp, 0);
                    self.mshr.clear_data(addr);
                    self.clean_up_after_request(&ev, in_mshr);
                } else {
                    status = if in_mshr {
                        MemEventStatus::Ok
                    } else {
                        self.allocate_mshr(&ev, false, None)
                    };
                    if status == MemEventStatus::Ok {
                        self.entry_mut(addr).set_state(IM);
                        self.issue_memory_request(&ev, true);
                    }
                }
            }
            S => {
                // Upgrade with no other sharers -> respond & M
                // Upgrade with other sharers -> invalidate others & S_Inv
                // Not a sharer -> invalidate sharers, fetch data, SM_Inv
                if self.directory[&addr].is_sharer(&ev.src) {
                    if self.directory[&addr].sharer_count() == 1 {
                        if self.mshr.has_data(addr) {
                            self.mshr.clear_data(addr);
                        }
                        let entry = self.entry_mut(addr);
                        entry.set_state(M);
                        entry.remove_sharer(&ev.src);
                        entry.set_owner(ev.src.clone());
                        self.send_response(&ev, 0, 0);
                        self.clean_up_after_request(&ev, in_mshr);
                    } else {
                        status = if in_mshr {
                            MemEventStatus::Ok
                        } else {
                            self.allocate_mshr(&ev, false, None)
                        };
                        if status == MemEventStatus::Ok {
                            if self.mshr.has_data(addr) {
                                self.mshr.clear_data(addr);
                            }
                            self.entry_mut(addr).set_state(SInv);
                            let sharers = self.directory[&addr].sharer_list();
                            self.issue_invalidations(&ev, sharers, Command::Inv);
                        }
                    }
                } else {
                    status = if in_mshr {
                        MemEventStatus::Ok
                    } else {
                        self.allocate_mshr(&ev, false, None)
                    };
                    if status == MemEventStatus::Ok {
                        if self.mshr.has_data(addr) {
                            self.entry_mut(addr).set_state(SInv);
                        } else {
                            self.entry_mut(addr).set_state(SMInv);
                            self.issue_memory_request(&ev, true);
                        }
                        let sharers = self.directory[&addr].sharer_list();
                        self.issue_invalidations(&ev, sharers, Command::Inv);
                    }
                }
            }
            M => {
                status = if in_mshr {
                    MemEventStatus::Ok
                } else {
                    self.allocate_mshr(&ev, false, None)
                };
                if status == MemEventStatus::Ok {
                    let owner = self.directory[&addr].owner().cloned().expect("owner in M");
                    self.entry_mut(addr).set_state(MInv);
                    self.issue_fetch(&ev, owner, Command::FetchInv);
                }
            }
            _ => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, false, None);
                }
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&ev);
        }
        true
    }

    /// A Write that is not flagged noncacheable is a request to write
    /// coherently by a non-caching device.
    pub(crate) fn handle_write(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();
        let mut status = MemEventStatus::Ok;

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        match state {
            I => {
                if self.mshr.has_data(addr) {
                    if self.mshr.data_dirty(addr) {
                        self.writeback_data_from_mshr(addr);
                    }
                    self.mshr.clear_data(addr);
                }
                status = if in_mshr {
                    MemEventStatus::Ok
                } else {
                    self.allocate_mshr(&ev, false, None)
                };
                if status == MemEventStatus::Ok {
                    self.entry_mut(addr).set_state(IM);
                    self.issue_memory_request(&ev, false);
                }
            }
            S => {
                if self.mshr.has_data(addr) {
                    if self.mshr.data_dirty(addr) {
                        self.writeback_data_from_mshr(addr);
                    }
                    self.mshr.clear_data(addr);
                }
                // Invalidate sharers, forward the Write once they ack
                status = if in_mshr {
                    MemEventStatus::Ok
                } else {
                    self.allocate_mshr(&ev, false, None)
                };
                if status == MemEventStatus::Ok {
                    self.entry_mut(addr).set_state(SInv);
                    let sharers = self.directory[&addr].sharer_list();
                    self.issue_invalidations(&ev, sharers, Command::Inv);
                }
            }
            M => {
                if self.mshr.has_data(addr) {
                    if self.mshr.data_dirty(addr) {
                        self.writeback_data_from_mshr(addr);
                    }
                    self.mshr.clear_data(addr);
                }
                status = if in_mshr {
                    MemEventStatus::Ok
                } else {
                    self.allocate_mshr(&ev, false, None)
                };
                if status == MemEventStatus::Ok {
                    let owner = self.directory[&addr].owner().cloned().expect("owner in M");
                    self.entry_mut(addr).set_state(MInv);
                    self.issue_fetch(&ev, owner, Command::FetchInv);
                }
            }
            _ => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, false, None);
                }
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&ev);
        }
        true
    }

    pub(crate) fn handle_flush_line(&mut self, mut ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();
        let mut status = MemEventStatus::Ok;

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
            status = self.allocate_mshr(&ev, false, None);
        }

        match state {
            I => {
                if status == MemEventStatus::Ok {
                    self.issue_flush(&ev);
                }
            }
            S => {
                if status == MemEventStatus::Ok {
                    self.issue_flush(&ev);
                    self.entry_mut(addr).set_state(SB);
                }
            }
            M => {
                if status == MemEventStatus::Ok {
                    if ev.evict {
                        let entry = self.entry_mut(addr);
                        entry.remove_owner();
                        entry.add_sharer(ev.src.clone());
                        self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                        ev.evict = false;
                        self.mshr.clear_evict(addr, ev.id);
                    } else if self.directory[&addr].has_owner() {
                        let owner = self.directory[&addr].owner().cloned().unwrap();
                        self.issue_fetch(&ev, owner, Command::FetchInvX);
                        self.entry_mut(addr).set_state(MInvX);
                        return true;
                    }
                    self.issue_flush(&ev);
                    self.entry_mut(addr).set_state(SB);
                }
            }
            MInv => {
                if ev.evict {
                    let entry = self.entry_mut(addr);
                    entry.remove_owner();
                    entry.add_sharer(ev.src.clone());
                    entry.set_state(SInv);
                    self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                }
            }
            MInvX => {
                if ev.evict {
                    let entry = self.entry_mut(addr);
                    entry.remove_owner();
                    entry.add_sharer(ev.src.clone());
                    entry.set_state(S);
                    self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    self.mshr.decrement_acks_needed(addr);
                    self.erase_response(addr, &ev.src);
                    self.retry_front(addr);
                }
            }
            _ => {}
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&ev);
        }
        true
    }

    pub(crate) fn handle_flush_line_inv(&mut self, mut ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();
        let mut status = MemEventStatus::Ok;

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
            status = self.allocate_mshr(&ev, false, None);
        }

        match state {
            I => {
                if status == MemEventStatus::Ok {
                    self.issue_flush(&ev);
                }
            }
            S => {
                if status == MemEventStatus::Ok {
                    if ev.evict {
                        self.entry_mut(addr).remove_sharer(&ev.src);
                        ev.evict = false;
                        self.mshr.clear_evict(addr, ev.id);
                    }
                    if self.directory[&addr].has_sharers() {
                        self.entry_mut(addr).set_state(SInv);
                        let sharers = self.directory[&addr].sharer_list();
                        self.issue_invalidations(&ev, sharers, Command::Inv);
                    } else {
                        self.entry_mut(addr).set_state(IB);
                        self.issue_flush(&ev);
                    }
                }
            }
            M => {
                if status == MemEventStatus::Ok {
                    if ev.evict {
                        self.entry_mut(addr).remove_owner();
                        self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                        ev.evict = false;
                        self.mshr.clear_evict(addr, ev.id);
                    }
                    if self.directory[&addr].has_owner() {
                        let owner = self.directory[&addr].owner().cloned().unwrap();
                        self.entry_mut(addr).set_state(MInv);
                        self.issue_fetch(&ev, owner, Command::FetchInv);
                    } else {
                        self.entry_mut(addr).set_state(IB);
                        self.issue_flush(&ev);
                    }
                }
            }
            SD => {
                if ev.evict {
                    self.entry_mut(addr).remove_sharer(&ev.src);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    if !self.directory[&addr].has_sharers() {
                        self.entry_mut(addr).set_state(IS);
                    }
                }
            }
            SB => {
                if ev.evict {
                    self.entry_mut(addr).remove_sharer(&ev.src);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    if !self.directory[&addr].has_sharers() {
                        self.entry_mut(addr).set_state(I);
                    }
                }
            }
            MInvX => {
                if ev.evict {
                    self.entry_mut(addr).remove_owner();
                    self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    self.erase_response(addr, &ev.src);
                    if self.mshr.decrement_acks_needed(addr) {
                        self.entry_mut(addr).set_state(I);
                        self.retry_front(addr);
                    }
                }
            }
            SDInv => {
                if ev.evict {
                    self.entry_mut(addr).remove_sharer(&ev.src);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    self.erase_response(addr, &ev.src);
                    if self.mshr.decrement_acks_needed(addr) {
                        let next = if self.directory[&addr].has_sharers() { SD } else { IS };
                        self.entry_mut(addr).set_state(next);
                        self.retry_front(addr);
                    }
                }
            }
            SMInv => {
                if ev.evict {
                    self.entry_mut(addr).remove_sharer(&ev.src);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    self.erase_response(addr, &ev.src);
                    if self.mshr.decrement_acks_needed(addr) {
                        self.entry_mut(addr).set_state(IM);
                    }
                }
            }
            SInv => {
                if ev.evict {
                    self.entry_mut(addr).remove_sharer(&ev.src);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    self.erase_response(addr, &ev.src);
                    if self.mshr.decrement_acks_needed(addr) {
                        let next = if self.directory[&addr].has_sharers() { S } else { I };
                        self.entry_mut(addr).set_state(next);
                        self.retry_front(addr);
                    }
                }
            }
            MInv => {
                if ev.evict {
                    self.entry_mut(addr).remove_sharer(&ev.src);
                    ev.evict = false;
                    self.mshr.clear_evict(addr, ev.id);
                    self.erase_response(addr, &ev.src);
                    if self.mshr.decrement_acks_needed(addr) {
                        self.entry_mut(addr).set_state(I);
                        self.retry_front(addr);
                    }
                }
            }
            _ => {}
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&ev);
        }
        true
    }

    pub(crate) fn handle_put_s(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        self.entry_mut(addr).remove_sharer(&ev.src);
        self.send_ack_put(&ev);

        // The PutS may substitute for an Inv response still in flight
        self.erase_response(addr, &ev.src);

        match state {
            S => {
                if !self.directory[&addr].has_sharers() {
                    self.entry_mut(addr).set_state(I);
                }
            }
            SB => {
                if !self.directory[&addr].has_sharers() {
                    self.entry_mut(addr).set_state(I);
                }
            }
            SD => {
                if !self.directory[&addr].has_sharers() {
                    self.entry_mut(addr).set_state(IS);
                }
            }
            SInv => {
                if self.mshr.decrement_acks_needed(addr) {
                    let next = if self.directory[&addr].has_sharers() { S } else { I };
                    self.entry_mut(addr).set_state(next);
                    if self.retry_front(addr) {
                        // Make sure we don't retry twice
                        self.mshr.set_in_progress(addr);
                    }
                }
            }
            SDInv => {
                if self.mshr.decrement_acks_needed(addr) {
                    let next = if self.directory[&addr].has_sharers() { SD } else { IS };
                    self.entry_mut(addr).set_state(next);
                }
            }
            SMInv => {
                if self.mshr.decrement_acks_needed(addr) {
                    self.entry_mut(addr).set_state(IM);
                }
            }
            other => panic!(
                "{}: directory received PutS but state is {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        self.clean_up_after_request(&ev, in_mshr);
        true
    }

    pub(crate) fn handle_put_x(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        {
            let entry = self.entry_mut(addr);
            entry.remove_owner();
            entry.add_sharer(ev.src.clone());
        }
        self.send_ack_put(&ev);

        match state {
            M => {
                if ev.dirty {
                    self.writeback_data(&ev);
                }
                self.entry_mut(addr).set_state(S);
            }
            MInv => {
                self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                self.entry_mut(addr).set_state(SInv);
            }
            MInvX => {
                self.mshr.decrement_acks_needed(addr);
                self.erase_response(addr, &ev.src);
                self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                self.entry_mut(addr).set_state(S);
            }
            other => panic!(
                "{}: directory received PutX but state is {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        self.clean_up_after_request(&ev, in_mshr);
        true
    }

    pub(crate) fn handle_put_e(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        self.entry_mut(addr).remove_owner();
        self.send_ack_put(&ev);

        match state {
            M => {
                self.entry_mut(addr).set_state(I);
            }
            MInv | MInvX => {
                // The clean eviction substitutes for the outstanding fetch
                self.mshr.decrement_acks_needed(addr);
                self.erase_response(addr, &ev.src);
                self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                self.entry_mut(addr).set_state(I);
            }
            other => panic!(
                "{}: directory received PutE but state is {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        self.clean_up_after_request(&ev, in_mshr);
        true
    }

    pub(crate) fn handle_put_m(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        self.entry_mut(addr).remove_owner();
        self.send_ack_put(&ev);

        match state {
            M => {
                self.writeback_data(&ev);
                self.entry_mut(addr).set_state(I);
            }
            MInv | MInvX => {
                self.mshr.decrement_acks_needed(addr);
                self.erase_response(addr, &ev.src);
                self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);
                self.entry_mut(addr).set_state(I);
            }
            other => panic!(
                "{}: directory received PutM but state is {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        self.clean_up_after_request(&ev, in_mshr);
        true
    }

    /// Sent by a memory controller or scratchpad doing a shootdown.
    pub(crate) fn handle_fetch_inv(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();
        let mut status = MemEventStatus::Ok;

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        match state {
            I => {
                let flush_in_front = self.mshr.exists(addr)
                    && self.mshr.front_event(addr).map_or(false, |e| {
                        e.cmd == Command::FlushLineInv
                    });
                if !(self.mshr.pending_writeback(addr) || flush_in_front) {
                    if self.mshr.has_data(addr) && self.mshr.data_dirty(addr) {
                        self.send_fetch_response(&ev);
                    } else {
                        self.send_ack_inv(&ev);
                    }
                } else {
                    self.send_ack_inv(&ev);
                }
                self.clean_up_after_request(&ev, in_mshr);
            }
            S => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, None);
                }
                if status == MemEventStatus::Ok {
                    let sharers = self.directory[&addr].sharer_list();
                    self.issue_invalidations(&ev, sharers, Command::Inv);
                    self.entry_mut(addr).set_state(SInv);
                }
            }
            M => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, None);
                }
                if status == MemEventStatus::Ok {
                    let owner = self.directory[&addr].owner().cloned().expect("owner in M");
                    self.issue_fetch(&ev, owner, Command::FetchInv);
                    self.entry_mut(addr).set_state(MInv);
                }
            }
            IS | IM => {
                if !self.mshr.pending_writeback(addr) {
                    self.send_ack_inv(&ev);
                }
                self.clean_up_after_request(&ev, in_mshr);
            }
            IB => {
                self.send_ack_inv(&ev);
                self.entry_mut(addr).set_state(I);
                self.clean_up_after_request(&ev, in_mshr);
            }
            SB => {
                if !in_mshr {
                    // Put in front of the flush
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
                if status == MemEventStatus::Ok {
                    let sharers = self.directory[&addr].sharer_list();
                    self.issue_invalidations(&ev, sharers, Command::Inv);
                    self.entry_mut(addr).set_state(SBInv);
                }
            }
            SD => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
                if status == MemEventStatus::Ok {
                    let sharers = self.directory[&addr].sharer_list();
                    self.issue_invalidations(&ev, sharers, Command::Inv);
                    self.entry_mut(addr).set_state(SDInv);
                }
            }
            SInv => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(1));
                }
            }
            SMInv => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
            }
            MInv | MInvX => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(1));
                }
            }
            other => panic!(
                "{}: directory received FetchInv but state is {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&ev);
        }
        true
    }

    /// Shootdown that does not need the data back.
    pub(crate) fn handle_force_inv(&mut self, ev: MemEvent, in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        self.get_dir_entry(addr);
        let state = self.entry_state(addr).unwrap();
        let cached = self.directory[&addr].is_cached();
        let mut status = MemEventStatus::Ok;

        if !cached {
            return self.retrieve_dir_entry(addr, &ev, in_mshr);
        }

        if !in_mshr {
            self.stats.cache_hits += 1;
        }

        match state {
            I => {
                self.send_ack_inv(&ev);
                self.clean_up_after_request(&ev, in_mshr);
            }
            S => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
                if status == MemEventStatus::Ok {
                    let sharers = self.directory[&addr].sharer_list();
                    self.issue_invalidations(&ev, sharers, Command::ForceInv);
                    self.entry_mut(addr).set_state(SInv);
                }
            }
            M => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
                if status == MemEventStatus::Ok {
                    let owner = self.directory[&addr].owner().cloned().expect("owner in M");
                    self.issue_invalidation(owner, Some(&ev), addr, Command::ForceInv);
                    self.entry_mut(addr).set_state(MInv);
                }
            }
            IS | IM | IB => {
                if !self.mshr.pending_writeback(addr) {
                    self.send_ack_inv(&ev);
                }
                self.clean_up_after_request(&ev, in_mshr);
            }
            SB => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
                if status == MemEventStatus::Ok {
                    let sharers = self.directory[&addr].sharer_list();
                    self.issue_invalidations(&ev, sharers, Command::ForceInv);
                    self.entry_mut(addr).set_state(SBInv);
                }
            }
            SD => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
                if status == MemEventStatus::Ok {
                    let sharers = self.directory[&addr].sharer_list();
                    self.issue_invalidations(&ev, sharers, Command::ForceInv);
                    self.entry_mut(addr).set_state(SDInv);
                }
            }
            SInv => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(1));
                }
            }
            SMInv => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(0));
                }
            }
            MInv | MInvX => {
                if !in_mshr {
                    status = self.allocate_mshr(&ev, true, Some(1));
                }
            }
            other => panic!(
                "{}: directory received ForceInv but state is {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&ev);
        }
        true
    }

    pub(crate) fn handle_get_s_resp(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        let state = self.entry_state(addr).unwrap_or_else(|| {
            panic!("{}: received GetSResp with no directory entry", self.name)
        });

        // Entry must be cached since non-stable entries cannot be evicted
        let req = self
            .mshr
            .front_event(addr)
            .unwrap_or_else(|| panic!("{}: GetSResp with no blocked request", self.name))
            .clone();

        if state != IS && state != SD {
            panic!(
                "{}: received GetSResp in unhandled state {} ({})",
                self.name,
                state.name(),
                ev.brief()
            );
        }

        if !self.incoherent_src.contains(&req.src) {
            let entry = self.entry_mut(addr);
            entry.set_state(S);
            entry.add_sharer(req.src.clone());
        } else if state == IS {
            self.entry_mut(addr).set_state(I);
        } else {
            self.entry_mut(addr).set_state(S);
        }

        self.send_data_response(&req, ev.payload.clone(), Command::GetSResp, 0);
        // Save data for a subsequent GetS
        self.mshr.set_data(addr, ev.payload.clone(), false);
        self.clean_up_after_response(&ev);
        true
    }

    pub(crate) fn handle_get_x_resp(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        let state = self.entry_state(addr).unwrap_or_else(|| {
            panic!("{}: received GetXResp with no directory entry", self.name)
        });

        let req = self
            .mshr
            .front_event(addr)
            .unwrap_or_else(|| panic!("{}: GetXResp with no blocked request", self.name))
            .clone();
        let incoherent = self.incoherent_src.contains(&req.src);

        match state {
            IS if incoherent => {
                self.entry_mut(addr).set_state(I);
                self.send_data_response(&req, ev.payload.clone(), Command::GetSResp, 0);
            }
            IS if self.protocol == CoherenceProtocol::Mesi => {
                // Exclusive grant: hand the line over in M
                let entry = self.entry_mut(addr);
                entry.set_state(M);
                entry.set_owner(req.src.clone());
                self.send_data_response(&req, ev.payload.clone(), Command::GetXResp, 0);
            }
            IS | SD => {
                // MSI (or a plain shared read): downgrade to shared
                let entry = self.entry_mut(addr);
                entry.set_state(S);
                if !incoherent {
                    entry.add_sharer(req.src.clone());
                }
                self.send_data_response(&req, ev.payload.clone(), Command::GetSResp, 0);
                // So a subsequent GetS can get data
                self.mshr.set_data(addr, ev.payload.clone(), false);
            }
            IM => {
                if !incoherent {
                    let entry = self.entry_mut(addr);
                    entry.set_state(M);
                    entry.set_owner(req.src.clone());
                } else {
                    self.entry_mut(addr).set_state(I);
                }
                self.send_data_response(&req, ev.payload.clone(), Command::GetXResp, 0);
            }
            SMInv => {
                // Save data for when the invalidations finish; do not
                // respond yet
                self.entry_mut(addr).set_state(SInv);
                self.mshr.set_data(addr, ev.payload.clone(), false);
                return true;
            }
            other => panic!(
                "{}: received GetXResp in unhandled state {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        self.clean_up_after_response(&ev);
        true
    }

    pub(crate) fn handle_write_resp(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        let state = self.entry_state(addr).unwrap_or_else(|| {
            panic!("{}: received WriteResp with no directory entry", self.name)
        });

        if state != IM {
            panic!(
                "{}: received WriteResp in unhandled state {} ({})",
                self.name,
                state.name(),
                ev.brief()
            );
        }

        let req = self
            .mshr
            .front_event(addr)
            .unwrap_or_else(|| panic!("{}: WriteResp with no blocked request", self.name))
            .clone();

        self.entry_mut(addr).set_state(I);
        let resp = req.make_response();
        let ts = self.timestamp + self.mshr_latency;
        self.forward_by_destination(resp, ts, false);
        self.clean_up_after_response(&ev);
        true
    }

    pub(crate) fn handle_flush_line_resp(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        let state = self.entry_state(addr).unwrap_or_else(|| {
            panic!("{}: received FlushLineResp with no directory entry", self.name)
        });

        let req = self
            .mshr
            .front_event(addr)
            .unwrap_or_else(|| panic!("{}: FlushLineResp with no blocked request", self.name))
            .clone();
        self.mshr.clear_data(addr);

        match state {
            I => {}
            IB => self.entry_mut(addr).set_state(I),
            SB => self.entry_mut(addr).set_state(S),
            other => panic!(
                "{}: received FlushLineResp in unhandled state {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }

        self.send_response(&req, ev.flags, ev.mem_flags);
        self.clean_up_after_response(&ev);
        true
    }

    pub(crate) fn handle_ack_put(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        self.clean_up_after_response(&ev);
        true
    }

    pub(crate) fn handle_ack_inv(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        let state = self.entry_state(addr).unwrap_or_else(|| {
            panic!("{}: received AckInv with no directory entry", self.name)
        });

        {
            let entry = self.entry_mut(addr);
            if entry.is_sharer(&ev.src) {
                entry.remove_sharer(&ev.src);
            } else {
                entry.remove_owner();
            }
        }

        let done = self.mshr.decrement_acks_needed(addr);
        self.erase_response(addr, &ev.src);

        if !done {
            return true;
        }

        match state {
            MInv => {
                // ForceInv or GetX/Write
                self.entry_mut(addr).set_state(I);
                self.retry_front(addr);
            }
            SInv => {
                let next = if self.directory[&addr].has_sharers() { S } else { I };
                self.entry_mut(addr).set_state(next);
                self.retry_front(addr);
            }
            SBInv => {
                let next = if self.directory[&addr].has_sharers() { SB } else { I };
                self.entry_mut(addr).set_state(next);
                self.retry_front(addr);
            }
            SDInv => {
                let next = if self.directory[&addr].has_sharers() { SD } else { IS };
                self.entry_mut(addr).set_state(next);
                self.retry_front(addr);
            }
            SMInv => {
                self.entry_mut(addr).set_state(IM);
            }
            other => panic!(
                "{}: received AckInv in unhandled state {} ({})",
                self.name,
                other.name(),
                ev.brief()
            ),
        }
        true
    }

    pub(crate) fn handle_fetch_x_resp(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        let state = self.entry_state(addr).unwrap_or_else(|| {
            panic!("{}: received FetchXResp with no directory entry", self.name)
        });

        if state != MInvX {
            panic!(
                "{}: received FetchXResp in unhandled state {} ({})",
                self.name,
                state.name(),
                ev.brief()
            );
        }

        self.mshr.decrement_acks_needed(addr);
        self.erase_response(addr, &ev.src);

        // Save data for the retry
        self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);

        {
            let entry = self.entry_mut(addr);
            entry.remove_owner();
            entry.add_sharer(ev.src.clone());
            entry.set_state(S);
        }
        self.retry_front(addr);
        true
    }

    pub(crate) fn handle_fetch_resp(&mut self, ev: MemEvent, _in_mshr: bool) -> bool {
        let addr = ev.base_addr;
        let state = self.entry_state(addr).unwrap_or_else(|| {
            panic!("{}: received FetchResp with no directory entry", self.name)
        });

        if state != SInv && state != MInv {
            panic!(
                "{}: received FetchResp in unhandled state {} ({})",
                self.name,
                state.name(),
                ev.brief()
            );
        }

        self.mshr.decrement_acks_needed(addr);
        self.erase_response(addr, &ev.src);
        self.mshr.set_data(addr, ev.payload.clone(), ev.dirty);

        self.entry_mut(addr).set_state(I);

        self.retry_front(addr);

        if ev.dirty {
            self.writeback_data_from_mshr(addr);
        }
        true
    }

    pub(crate) fn handle_nack(&mut self, mut ev: MemEvent, _in_mshr: bool) -> bool {
        let nacked = *ev.nacked_event.take().unwrap_or_else(|| {
            panic!("{}: NACK carries no event ({})", self.name, ev.brief())
        });
        let addr = nacked.base_addr;

        match nacked.cmd {
            Command::GetS
            | Command::GetX
            | Command::GetSX
            | Command::Write
            | Command::PutM
            | Command::FlushLine
            | Command::FlushLineInv => {
                // Always retry
            }
            Command::FetchInv | Command::FetchInvX | Command::Inv | Command::ForceInv => {
                // Retry only if we still need the response; otherwise the
                // answer already arrived through another path
                if !self.response_matches(addr, &nacked.dst, nacked.id) {
                    return true;
                }
            }
            other => panic!(
                "{}: received NACK for unhandled command {:?} ({})",
                self.name,
                other,
                nacked.brief()
            ),
        }

        let ts = self.timestamp + self.mshr_latency;
        self.forward_by_destination(nacked, ts, false);
        true
    }
}
