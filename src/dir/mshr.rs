use std::collections::{HashMap, VecDeque};

use crate::event::{Addr, EventId, MemEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrEntryKind {
    Event,
    Writeback,
}

#[derive(Debug)]
enum MshrEntry {
    Event(MemEvent),
    Writeback,
}

impl MshrEntry {
    fn kind(&self) -> MshrEntryKind {
        match self {
            MshrEntry::Event(_) => MshrEntryKind::Event,
            MshrEntry::Writeback => MshrEntryKind::Writeback,
        }
    }
}

#[derive(Debug, Default)]
struct MshrRegister {
    entries: VecDeque<MshrEntry>,
    acks_needed: u32,
    in_progress: bool,
    data: Option<Vec<u8>>,
    data_dirty: bool,
}

impl MshrRegister {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.acks_needed == 0 && self.data.is_none()
    }
}

/// Miss-status holding register: a per-address ordered queue of blocked
/// events and writeback markers, with the per-line ack counters and the
/// opportunistic data buffer attached.
#[derive(Debug)]
pub struct Mshr {
    /// Negative means unbounded.
    max_size: i64,
    size: usize,
    registers: HashMap<Addr, MshrRegister>,
}

impl Mshr {
    pub fn new(max_size: i64) -> Self {
        assert!(max_size != 0, "mshr_num_entries must be at least 1 or negative for unlimited");
        Mshr { max_size, size: 0, registers: HashMap::new() }
    }

    /// Total entries across all addresses, for occupancy statistics.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn exists(&self, addr: Addr) -> bool {
        self.registers.get(&addr).map_or(false, |r| !r.entries.is_empty())
    }

    /// Insert an event. `pos` 0 queues at the front, 1 right behind the
    /// front, `None` appends. Forward-path inserts (`forward`) bypass the
    /// capacity bound to avoid deadlock. Returns the final index, or -1
    /// when full.
    pub fn insert_event(
        &mut self,
        addr: Addr,
        ev: MemEvent,
        pos: Option<usize>,
        forward: bool,
    ) -> i64 {
        if !forward && self.max_size >= 0 && self.size >= self.max_size as usize {
            return -1;
        }
        let reg = self.registers.entry(addr).or_default();
        let idx = match pos {
            Some(p) => p.min(reg.entries.len()),
            None => reg.entries.len(),
        };
        reg.entries.insert(idx, MshrEntry::Event(ev));
        self.size += 1;
        idx as i64
    }

    /// Insert a writeback marker at the front; the line does not progress
    /// until the corresponding ack removes it.
    pub fn insert_writeback(&mut self, addr: Addr) {
        let reg = self.registers.entry(addr).or_default();
        reg.entries.push_front(MshrEntry::Writeback);
        self.size += 1;
    }

    pub fn pending_writeback(&self, addr: Addr) -> bool {
        self.registers
            .get(&addr)
            .map_or(false, |r| matches!(r.entries.front(), Some(MshrEntry::Writeback)))
    }

    pub fn front_type(&self, addr: Addr) -> Option<MshrEntryKind> {
        self.registers.get(&addr)?.entries.front().map(|e| e.kind())
    }

    pub fn front_event(&self, addr: Addr) -> Option<&MemEvent> {
        match self.registers.get(&addr)?.entries.front() {
            Some(MshrEntry::Event(ev)) => Some(ev),
            _ => None,
        }
    }

    /// Remove the front entry; clears the in-progress flag for the line.
    pub fn remove_front(&mut self, addr: Addr) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            if reg.entries.pop_front().is_some() {
                self.size -= 1;
            }
            reg.in_progress = false;
            if reg.is_empty() {
                self.registers.remove(&addr);
            }
        }
    }

    /// Remove the entry at `index` (used to skip a writeback marker
    /// sitting in front of the request being retired).
    pub fn remove_entry(&mut self, addr: Addr, index: usize) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            if index < reg.entries.len() {
                reg.entries.remove(index);
                self.size -= 1;
            }
            if index == 0 {
                reg.in_progress = false;
            }
            if reg.is_empty() {
                self.registers.remove(&addr);
            }
        }
    }

    pub fn set_in_progress(&mut self, addr: Addr) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            reg.in_progress = true;
        }
    }

    pub fn in_progress(&self, addr: Addr) -> bool {
        self.registers.get(&addr).map_or(false, |r| r.in_progress)
    }

    pub fn increment_acks_needed(&mut self, addr: Addr) {
        let reg = self.registers.entry(addr).or_default();
        reg.acks_needed += 1;
    }

    /// Returns true when the count reaches zero with this decrement.
    pub fn decrement_acks_needed(&mut self, addr: Addr) -> bool {
        let reg = self.registers.entry(addr).or_default();
        assert!(reg.acks_needed > 0, "ack underflow at 0x{:x}", addr);
        reg.acks_needed -= 1;
        let done = reg.acks_needed == 0;
        if reg.is_empty() {
            self.registers.remove(&addr);
        }
        done
    }

    pub fn acks_needed(&self, addr: Addr) -> u32 {
        self.registers.get(&addr).map_or(0, |r| r.acks_needed)
    }

    pub fn set_data(&mut self, addr: Addr, data: Vec<u8>, dirty: bool) {
        let reg = self.registers.entry(addr).or_default();
        reg.data = Some(data);
        reg.data_dirty = dirty;
    }

    pub fn set_data_dirty(&mut self, addr: Addr, dirty: bool) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            reg.data_dirty = dirty;
        }
    }

    pub fn has_data(&self, addr: Addr) -> bool {
        self.registers.get(&addr).map_or(false, |r| r.data.is_some())
    }

    pub fn data(&self, addr: Addr) -> Option<&Vec<u8>> {
        self.registers.get(&addr)?.data.as_ref()
    }

    pub fn data_dirty(&self, addr: Addr) -> bool {
        self.registers.get(&addr).map_or(false, |r| r.data_dirty)
    }

    pub fn clear_data(&mut self, addr: Addr) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            reg.data = None;
            reg.data_dirty = false;
            if reg.is_empty() {
                self.registers.remove(&addr);
            }
        }
    }

    /// Clear the evict flag on a queued copy of `id` after its payload
    /// has been banked, so a later replay does not re-apply it.
    pub fn clear_evict(&mut self, addr: Addr, id: EventId) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            for entry in reg.entries.iter_mut() {
                if let MshrEntry::Event(ev) = entry {
                    if ev.id == id {
                        ev.evict = false;
                    }
                }
            }
        }
    }

    pub fn status_string(&self) -> String {
        let mut lines = Vec::new();
        let mut addrs: Vec<Addr> = self.registers.keys().copied().collect();
        addrs.sort_unstable();
        for addr in addrs {
            let reg = &self.registers[&addr];
            lines.push(format!(
                "  0x{:x}: {} entries, acks={}, in_progress={}, data={}",
                addr,
                reg.entries.len(),
                reg.acks_needed,
                reg.in_progress,
                reg.data.is_some()
            ));
        }
        lines.join("\n")
    }
}
