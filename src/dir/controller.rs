use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::{debug, warn};

use crate::dir::entry::{CoherenceState, DirEntry};
use crate::dir::entry_cache::EntryCache;
use crate::dir::mshr::{Mshr, MshrEntryKind};
use crate::dir::stats::DirectoryStats;
use crate::event::{
    Addr, Command, Cycle, EventId, EventType, MemEvent, NodeId, F_NONCACHEABLE, F_NORESPONSE,
};
use crate::link::{EndpointKind, InitEvent, MemLink};
use crate::region::Region;
use crate::sim::config::{parse_bytes, parse_freq, DirectoryParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoherenceProtocol {
    Msi,
    Mesi,
}

/// Outcome of trying to admit an event into the MSHR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemEventStatus {
    Ok,
    Stall,
    Reject,
}

#[derive(Debug)]
struct MemMsg {
    event: MemEvent,
    /// Directory-entry storage traffic, counted separately.
    dir_access: bool,
}

/// The directory controller: tracks sharers and owners for every line in
/// its region, serializes conflicting accesses through the MSHR, and
/// drives the MSI/MESI protocol over two link endpoints.
pub struct DirectoryController {
    pub(crate) name: NodeId,
    pub(crate) line_size: u32,
    pub(crate) entry_size: u32,
    pub(crate) entry_cache_max_size: u64,
    pub(crate) protocol: CoherenceProtocol,
    pub(crate) access_latency: Cycle,
    pub(crate) mshr_latency: Cycle,
    pub(crate) max_requests_per_cycle: u64,
    pub(crate) region: Region,
    pub(crate) clock_hz: u64,
    pub(crate) min_packet_size: u64,
    /// Controls how much summary detail status and report dumps carry.
    pub(crate) verbose: u64,
    debug_addr: HashSet<Addr>,

    pub(crate) timestamp: Cycle,
    clock_on: bool,
    last_active_cycle: Cycle,
    pub(crate) wait_wb_ack: bool,
    pub(crate) send_wb_ack: bool,

    pub(crate) directory: HashMap<Addr, DirEntry>,
    pub(crate) entry_cache: EntryCache,
    pub(crate) mshr: Mshr,

    pub(crate) event_buffer: VecDeque<MemEvent>,
    pub(crate) retry_buffer: VecDeque<MemEvent>,
    addrs_this_cycle: HashSet<Addr>,

    /// Outstanding invalidations/fetches: addr -> dst -> event id. The
    /// NACK path consults this to decide whether a retry is still needed.
    pub(crate) responses: HashMap<Addr, HashMap<NodeId, EventId>>,
    /// Directory-entry reads in flight: read id -> line address.
    pub(crate) dir_mem_accesses: HashMap<EventId, Addr>,
    /// Pending non-cacheable pass-through responses: request id -> source.
    pub(crate) noncache_mem_reqs: HashMap<EventId, NodeId>,
    start_times: HashMap<EventId, Cycle>,
    pub(crate) incoherent_src: HashSet<NodeId>,

    cpu_msg_queue: BTreeMap<Cycle, VecDeque<MemEvent>>,
    mem_msg_queue: BTreeMap<Cycle, VecDeque<MemMsg>>,

    pub cpu_link: MemLink,
    /// None when the controller sits on a shared network and both sides
    /// route through `cpu_link`.
    pub mem_link: Option<MemLink>,

    pub stats: DirectoryStats,
}

impl DirectoryController {
    pub fn new(
        name: impl Into<NodeId>,
        params: &DirectoryParams,
        cpu_link: MemLink,
        mem_link: Option<MemLink>,
    ) -> Self {
        let name = name.into();

        if !params.net_memory_name.is_empty() {
            panic!(
                "{}: parameter 'net_memory_name' is no longer supported; declare address \
                 regions on the memory and directory components instead",
                name
            );
        }
        if params.network_num_vc.is_some() {
            warn!(
                "{}: found deprecated parameter: network_num_vc; it is unused and should be \
                 removed from the input deck",
                name
            );
        }

        let line_size = params.cache_line_size;
        assert!(line_size > 0, "{}: cache_line_size must be non-zero", name);

        let il_size = parse_bytes(&params.interleave_size).unwrap_or_else(|e| {
            panic!("{}: invalid interleave_size: {}", name, e)
        });
        let il_step = parse_bytes(&params.interleave_step).unwrap_or_else(|e| {
            panic!("{}: invalid interleave_step: {}", name, e)
        });
        if il_size % line_size as u64 != 0 {
            panic!(
                "{}: interleave_size must be a multiple of cache_line_size, got {}",
                name, params.interleave_size
            );
        }
        if il_step % line_size as u64 != 0 {
            panic!(
                "{}: interleave_step must be a multiple of cache_line_size, got {}",
                name, params.interleave_step
            );
        }

        let min_packet_size = parse_bytes(&params.min_packet_size).unwrap_or_else(|e| {
            panic!("{}: invalid min_packet_size: {}", name, e)
        });
        let clock_hz = parse_freq(&params.clock)
            .unwrap_or_else(|e| panic!("{}: invalid clock: {}", name, e));

        let protocol = match params.coherence_protocol.as_str() {
            "MESI" | "mesi" => CoherenceProtocol::Mesi,
            "MSI" | "msi" => CoherenceProtocol::Msi,
            other => panic!(
                "{}: coherence_protocol must be 'MESI' or 'MSI', got '{}'",
                name, other
            ),
        };

        if params.mshr_num_entries == 0 {
            panic!(
                "{}: mshr_num_entries must be at least 1, or negative for an unlimited MSHR",
                name
            );
        }

        let end = if params.addr_range_end == 0 { u64::MAX } else { params.addr_range_end };
        let region = Region {
            start: params.addr_range_start,
            end,
            interleave_size: il_size,
            interleave_step: il_step,
        };

        DirectoryController {
            name,
            line_size,
            entry_size: 4,
            entry_cache_max_size: params.entry_cache_size,
            protocol,
            access_latency: params.access_latency_cycles,
            mshr_latency: params.mshr_latency_cycles,
            max_requests_per_cycle: params.max_requests_per_cycle,
            region,
            clock_hz,
            min_packet_size,
            verbose: params.verbose,
            debug_addr: params.debug_addr.iter().copied().collect(),
            timestamp: 0,
            clock_on: true,
            last_active_cycle: 0,
            wait_wb_ack: false,
            send_wb_ack: true,
            directory: HashMap::new(),
            entry_cache: EntryCache::new(),
            mshr: Mshr::new(params.mshr_num_entries),
            event_buffer: VecDeque::new(),
            retry_buffer: VecDeque::new(),
            addrs_this_cycle: HashSet::new(),
            responses: HashMap::new(),
            dir_mem_accesses: HashMap::new(),
            noncache_mem_reqs: HashMap::new(),
            start_times: HashMap::new(),
            incoherent_src: HashSet::new(),
            cpu_msg_queue: BTreeMap::new(),
            mem_msg_queue: BTreeMap::new(),
            cpu_link,
            mem_link,
            stats: DirectoryStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock_is_on(&self) -> bool {
        self.clock_on
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn entry(&self, addr: Addr) -> Option<&DirEntry> {
        self.directory.get(&addr)
    }

    pub fn entry_state(&self, addr: Addr) -> Option<CoherenceState> {
        self.directory.get(&addr).map(|e| e.state())
    }

    fn mem_link_ref(&self) -> &MemLink {
        self.mem_link.as_ref().unwrap_or(&self.cpu_link)
    }

    fn mem_link_mut(&mut self) -> &mut MemLink {
        self.mem_link.as_mut().unwrap_or(&mut self.cpu_link)
    }

    pub(crate) fn is_debug_addr(&self, addr: Addr) -> bool {
        self.debug_addr.is_empty() || self.debug_addr.contains(&addr)
    }

    /*
     * Init handshake
     */

    pub fn init(&mut self, phase: u32) {
        if phase == 0 {
            let advert = InitEvent::Coherence {
                src: self.name.clone(),
                endpoint: EndpointKind::Directory,
                tracks_presence: true,
                sends_wb_ack: self.send_wb_ack,
                line_size: self.line_size,
            };
            if self.mem_link.is_some() {
                self.cpu_link.send_untimed(advert.clone());
            }
            self.mem_link_mut().send_untimed(advert);
        }

        // cpu side: discover incoherent sources, forward init data to memory
        while let Some(ev) = self.cpu_link.recv_untimed() {
            match ev {
                InitEvent::Coherence { src, endpoint, tracks_presence, .. } => {
                    if endpoint == EndpointKind::Scratchpad {
                        self.wait_wb_ack = true;
                    }
                    if !tracks_presence && self.cpu_link.is_source(&src) {
                        debug!("{}: marking {} as incoherent", self.name, src);
                        self.incoherent_src.insert(src);
                    }
                }
                InitEvent::Endpoint { endpoint, .. } => {
                    let fwd = InitEvent::Endpoint { src: self.name.clone(), endpoint };
                    self.mem_link_mut().send_untimed(fwd);
                }
                InitEvent::Data { src, addr, payload } => {
                    if self.is_request_address_valid(addr) {
                        self.mem_link_mut().send_untimed(InitEvent::Data { src, addr, payload });
                    }
                }
            }
        }

        // memory side: learn writeback-ack behavior, forward endpoints up
        if self.mem_link.is_some() {
            while let Some(ev) = self.mem_link.as_mut().unwrap().recv_untimed() {
                match ev {
                    InitEvent::Coherence { sends_wb_ack, .. } => {
                        if sends_wb_ack {
                            self.wait_wb_ack = true;
                        }
                    }
                    InitEvent::Endpoint { endpoint, .. } => {
                        let fwd = InitEvent::Endpoint { src: self.name.clone(), endpoint };
                        self.cpu_link.send_untimed(fwd);
                    }
                    InitEvent::Data { .. } => {}
                }
            }
        }
    }

    /*
     * Packet ingress
     */

    pub fn handle_packet(&mut self, mut ev: MemEvent, now: Cycle) {
        ev.delivery_time = now;
        if !self.clock_on {
            self.turn_clock_on(now);
        }

        // Events outside the coherence state machine short-cut the buffers
        if ev.cmd.event_type() != EventType::Cache || ev.query_flag(F_NONCACHEABLE) {
            debug!("{}: noncacheable ingress ({})", self.name, ev.brief());
            if ev.cmd.is_request() {
                self.handle_noncacheable_request(ev);
            } else {
                self.handle_noncacheable_response(ev);
            }
            return;
        }

        if ev.cmd.is_request() {
            self.record_start_latency(&ev);
        }
        self.event_buffer.push_back(ev);
    }

    fn handle_noncacheable_request(&mut self, mut ev: MemEvent) {
        if !ev.query_flag(F_NORESPONSE) {
            self.noncache_mem_reqs.insert(ev.id, ev.src.clone());
        }
        self.stats.record_noncache_recv(ev.cmd);
        ev.src = self.name.clone();
        let ts = self.timestamp + 1;
        self.forward_by_address(ev, ts, false);
    }

    fn handle_noncacheable_response(&mut self, mut ev: MemEvent) {
        let rid = ev.response_to.unwrap_or_else(|| {
            panic!("{}: noncacheable response carries no request id ({})", self.name, ev.brief())
        });
        let dst = self.noncache_mem_reqs.remove(&rid).unwrap_or_else(|| {
            panic!(
                "{}: received a noncacheable response that does not match a pending request ({})",
                self.name,
                ev.brief()
            )
        });
        self.stats.record_noncache_recv(ev.cmd);
        ev.dst = dst;
        ev.src = self.name.clone();
        let ts = self.timestamp + 1;
        self.forward_by_destination(ev, ts, false);
    }

    fn record_start_latency(&mut self, ev: &MemEvent) {
        self.start_times.insert(ev.id, self.timestamp);
    }

    /*
     * Clock driver
     */

    pub fn turn_clock_on(&mut self, now: Cycle) {
        self.clock_on = true;
        // Back-fill occupancy samples for the cycles the clock was off.
        let inactive = now.saturating_sub(self.last_active_cycle + 1);
        for _ in 0..inactive {
            self.stats.mshr_occupancy.sample(self.mshr.size());
        }
        self.timestamp = now;
    }

    /// Called once per cycle. Returns true when the controller went idle
    /// and turned its clock off; `handle_packet` turns it back on.
    pub fn clock(&mut self, cycle: Cycle) -> bool {
        if !self.clock_on {
            return true;
        }
        self.timestamp = cycle;
        self.stats.mshr_occupancy.sample(self.mshr.size());

        self.send_outgoing_events();

        let mut idle = self.cpu_link.clock();
        if let Some(mem) = self.mem_link.as_mut() {
            idle &= mem.clock();
        }

        self.addrs_this_cycle.clear();
        let mut requests_this_cycle: u64 = 0;

        let mut i = 0;
        while i < self.retry_buffer.len() {
            if self.max_requests_per_cycle != 0
                && requests_this_cycle == self.max_requests_per_cycle
            {
                break;
            }
            let ev = self.retry_buffer[i].clone();
            if self.is_debug_addr(ev.base_addr) {
                debug!("{}: retry ({})", self.name, ev.brief());
            }
            if self.process_packet(ev, true) {
                requests_this_cycle += 1;
                self.retry_buffer.remove(i);
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.event_buffer.len() {
            if self.max_requests_per_cycle != 0
                && requests_this_cycle == self.max_requests_per_cycle
            {
                break;
            }
            let ev = self.event_buffer[i].clone();
            if self.is_debug_addr(ev.base_addr) {
                debug!("{}: event ({})", self.name, ev.brief());
            }
            if self.process_packet(ev, false) {
                requests_this_cycle += 1;
                self.event_buffer.remove(i);
            } else {
                i += 1;
            }
        }

        idle &= self.event_buffer.is_empty() && self.retry_buffer.is_empty();
        idle &= self.cpu_msg_queue.is_empty() && self.mem_msg_queue.is_empty();

        if idle {
            self.clock_on = false;
            self.last_active_cycle = self.timestamp;
            return true;
        }
        false
    }

    /*
     * State machine dispatch
     */

    pub(crate) fn process_packet(&mut self, ev: MemEvent, replay: bool) -> bool {
        if ev.addr_global && !self.is_request_address_valid(ev.addr) {
            panic!(
                "{}: request address is not valid ({}); region is {}",
                self.name,
                ev.brief(),
                self.region.to_string()
            );
        }

        let addr = ev.base_addr;

        // One access per line per cycle
        if !self.arbitrate_access(addr) {
            if self.is_debug_addr(addr) {
                debug!("{}: stall (line conflict) ({})", self.name, ev.brief());
            }
            return false;
        }

        let cmd = ev.cmd;
        if !replay {
            self.stats.record_recv(cmd);
        }

        // Internal directory-entry storage responses take a private path
        if !ev.addr_global {
            self.handle_dir_entry_response(ev);
            return true;
        }

        let retval = match cmd {
            Command::GetS => self.handle_get_s(ev, replay),
            Command::GetSX => self.handle_get_sx(ev, replay),
            Command::GetX => self.handle_get_x(ev, replay),
            Command::Write => self.handle_write(ev, replay),
            Command::PutS => self.handle_put_s(ev, replay),
            Command::PutE => self.handle_put_e(ev, replay),
            Command::PutX => self.handle_put_x(ev, replay),
            Command::PutM => self.handle_put_m(ev, replay),
            Command::FlushLineInv => self.handle_flush_line_inv(ev, replay),
            Command::FlushLine => self.handle_flush_line(ev, replay),
            Command::FetchInv => self.handle_fetch_inv(ev, replay),
            Command::ForceInv => self.handle_force_inv(ev, replay),
            Command::GetXResp => self.handle_get_x_resp(ev, replay),
            Command::GetSResp => self.handle_get_s_resp(ev, replay),
            Command::WriteResp => self.handle_write_resp(ev, replay),
            Command::FlushLineResp => self.handle_flush_line_resp(ev, replay),
            Command::AckInv => self.handle_ack_inv(ev, replay),
            Command::AckPut => self.handle_ack_put(ev, replay),
            Command::FetchResp => self.handle_fetch_resp(ev, replay),
            Command::FetchXResp => self.handle_fetch_x_resp(ev, replay),
            Command::Nack => self.handle_nack(ev, replay),
            other => panic!("{}: received unrecognized request: {:?}", self.name, other),
        };

        if retval {
            self.addrs_this_cycle.insert(addr);
        }
        retval
    }

    fn arbitrate_access(&self, addr: Addr) -> bool {
        !self.addrs_this_cycle.contains(&addr)
    }

    pub fn is_request_address_valid(&self, addr: Addr) -> bool {
        self.region.contains(addr)
    }

    /*
     * Directory entry table and entry cache
     */

    pub(crate) fn get_dir_entry(&mut self, addr: Addr) -> &mut DirEntry {
        self.directory.entry(addr).or_insert_with(|| DirEntry::new(addr))
    }

    pub(crate) fn entry_mut(&mut self, addr: Addr) -> &mut DirEntry {
        self.directory
            .get_mut(&addr)
            .unwrap_or_else(|| panic!("no directory entry for 0x{:x}", addr))
    }

    /// Fetch a spilled directory entry from memory before the line can
    /// advance. The triggering event is parked in the MSHR; followers
    /// queue behind it.
    pub(crate) fn retrieve_dir_entry(&mut self, addr: Addr, ev: &MemEvent, in_mshr: bool) -> bool {
        let status = if in_mshr {
            MemEventStatus::Ok
        } else {
            self.allocate_mshr(ev, false, None)
        };
        match status {
            MemEventStatus::Reject => return false,
            MemEventStatus::Stall => return true,
            MemEventStatus::Ok => {}
        }

        let state = self.entry_mut(addr).state();
        match state.dir_fetch_of() {
            Some(fetch_state) => self.entry_mut(addr).set_state(fetch_state),
            None => match state {
                CoherenceState::Id | CoherenceState::Sd | CoherenceState::Md => return true,
                other => panic!(
                    "{}: attempting to retrieve a directory entry from memory in state {}",
                    self.name,
                    other.name()
                ),
            },
        }

        let mut read = MemEvent::new(self.name.clone(), 0, 0, Command::GetS, self.line_size);
        read.addr_global = false;
        read.size = self.entry_size;
        self.dir_mem_accesses.insert(read.id, addr);

        let ts = self.timestamp + self.access_latency;
        // Directory-entry storage traffic bypasses destination lookup
        self.mem_msg_queue
            .entry(ts)
            .or_default()
            .push_back(MemMsg { event: read, dir_access: true });
        true
    }

    pub(crate) fn handle_dir_entry_response(&mut self, ev: MemEvent) {
        let rid = ev.response_to.unwrap_or_else(|| {
            panic!("{}: directory-entry response carries no request id", self.name)
        });
        let addr = self.dir_mem_accesses.remove(&rid).unwrap_or_else(|| {
            panic!("{}: directory-entry response matches no outstanding read", self.name)
        });

        let state = self.entry_mut(addr).state();
        let restored = match state {
            CoherenceState::Id => CoherenceState::I,
            CoherenceState::Sd => CoherenceState::S,
            CoherenceState::Md => CoherenceState::M,
            other => panic!(
                "{}: received directory-entry response in unhandled state {}",
                self.name,
                other.name()
            ),
        };
        let entry = self.entry_mut(addr);
        entry.set_state(restored);
        entry.set_cached(true);

        let front = self
            .mshr
            .front_event(addr)
            .unwrap_or_else(|| panic!("no blocked event behind directory fetch of 0x{:x}", addr))
            .clone();
        self.retry_buffer.push_back(front);
    }

    /// LRU maintenance after a completed request: most-recently-used
    /// entries move to the front, idle entries are deleted outright, and
    /// overflow spills cold entries to memory.
    pub(crate) fn update_cache(&mut self, addr: Addr) {
        let state = match self.directory.get(&addr) {
            Some(entry) => entry.state(),
            None => return,
        };

        if self.entry_cache_max_size == 0 {
            self.send_entry_to_memory(addr);
            return;
        }

        if state == CoherenceState::I {
            // Idle entries are only deletable once nothing is in flight
            // for the line
            self.entry_cache.remove(addr);
            if !self.mshr.exists(addr) {
                self.directory.remove(&addr);
            }
            return;
        }

        self.entry_cache.touch(addr);

        while self.entry_cache.len() as u64 > self.entry_cache_max_size {
            // Evict from the back, skipping lines with MSHR activity or a
            // transition in flight.
            let victim = self.entry_cache.coldest().find(|&a| {
                !self.mshr.exists(a)
                    && self.directory.get(&a).map_or(false, |e| e.state().is_stable())
            });
            let Some(victim) = victim else { break };
            self.entry_cache.evict(victim);
            self.entry_mut(victim).set_cached(false);
            self.send_entry_to_memory(victim);
        }
    }

    /// Write a directory entry back to its backing store as a PutE that
    /// expects no response.
    pub(crate) fn send_entry_to_memory(&mut self, _addr: Addr) {
        let mut wb = MemEvent::new(self.name.clone(), 0, 0, Command::PutE, self.line_size);
        wb.size = self.entry_size;
        wb.set_flag(F_NORESPONSE);
        wb.addr_global = false;
        if let Some(dst) = self.mem_link_ref().find_target_destination(0) {
            wb.dst = dst;
        }
        let ts = self.timestamp + self.access_latency;
        self.mem_msg_queue
            .entry(ts)
            .or_default()
            .push_back(MemMsg { event: wb, dir_access: true });
    }

    /*
     * MSHR admission and cleanup
     */

    pub(crate) fn allocate_mshr(
        &mut self,
        ev: &MemEvent,
        forward: bool,
        pos: Option<usize>,
    ) -> MemEventStatus {
        let idx = self.mshr.insert_event(ev.base_addr, ev.clone(), pos, forward);
        if idx == -1 {
            debug!("{}: reject, MSHR full ({})", self.name, ev.brief());
            MemEventStatus::Reject
        } else if idx != 0 {
            self.stats.mshr_hits += 1;
            debug!("{}: stall, MSHR conflict ({})", self.name, ev.brief());
            MemEventStatus::Stall
        } else {
            MemEventStatus::Ok
        }
    }

    pub(crate) fn clean_up_after_request(&mut self, ev: &MemEvent, in_mshr: bool) {
        let addr = ev.base_addr;

        if in_mshr {
            if self.mshr.front_type(addr) == Some(MshrEntryKind::Event) {
                self.mshr.remove_front(addr);
            } else {
                // A writeback was inserted in response to this request;
                // skip it to remove the request behind it.
                self.mshr.remove_entry(addr, 1);
            }
        }

        self.wake_next(addr);
        self.update_cache(addr);
    }

    pub(crate) fn clean_up_after_response(&mut self, ev: &MemEvent) {
        let addr = ev.base_addr;
        // The front entry is the request that triggered this response
        // (or a writeback marker); retire it.
        self.mshr.remove_front(addr);
        self.wake_next(addr);
        self.update_cache(addr);
    }

    /// Schedule the front MSHR event for replay. When a writeback marker
    /// sits in front, the wakeup happens once its ack retires it instead.
    pub(crate) fn retry_front(&mut self, addr: Addr) -> bool {
        if let Some(front) = self.mshr.front_event(addr) {
            let front = front.clone();
            self.retry_buffer.push_back(front);
            true
        } else {
            false
        }
    }

    fn wake_next(&mut self, addr: Addr) {
        if self.mshr.front_type(addr) == Some(MshrEntryKind::Event)
            && !self.mshr.in_progress(addr)
            && self.mshr.acks_needed(addr) == 0
        {
            let front = self.mshr.front_event(addr).unwrap().clone();
            self.retry_buffer.push_back(front);
        }
    }

    pub(crate) fn record_response(&mut self, addr: Addr, dst: NodeId, id: EventId) {
        self.responses.entry(addr).or_default().insert(dst, id);
    }

    pub(crate) fn erase_response(&mut self, addr: Addr, dst: &str) {
        if let Some(map) = self.responses.get_mut(&addr) {
            map.remove(dst);
            if map.is_empty() {
                self.responses.remove(&addr);
            }
        }
    }

    pub(crate) fn response_matches(&self, addr: Addr, dst: &str, id: EventId) -> bool {
        self.responses
            .get(&addr)
            .and_then(|m| m.get(dst))
            .map_or(false, |&pending| pending == id)
    }

    /*
     * Message issue
     */

    pub(crate) fn issue_memory_request(&mut self, ev: &MemEvent, line_granularity: bool) {
        let mut req = ev.clone();
        req.id = EventId::next();
        req.src = self.name.clone();
        if line_granularity {
            req.size = self.line_size;
        }
        let ts = self.timestamp + self.access_latency;
        self.forward_by_address(req, ts, false);
        self.mshr.set_in_progress(ev.base_addr);
    }

    pub(crate) fn issue_flush(&mut self, ev: &MemEvent) {
        let addr = ev.base_addr;
        let mut flush = ev.clone();
        flush.id = EventId::next();
        flush.src = self.name.clone();

        if self.mshr.has_data(addr) && self.mshr.data_dirty(addr) {
            // Fold the buffered dirty line into the flush
            flush.evict = true;
            flush.payload = self.mshr.data(addr).unwrap().clone();
            flush.dirty = true;
            self.mshr.clear_data(addr);
        } else {
            flush.payload = Vec::new();
        }

        self.mshr.set_in_progress(addr);
        let ts = self.timestamp + self.access_latency;
        self.forward_by_address(flush, ts, false);
    }

    pub(crate) fn issue_fetch(&mut self, ev: &MemEvent, owner: NodeId, cmd: Command) {
        let addr = ev.base_addr;
        let mut fetch = MemEvent::new(self.name.clone(), ev.addr, addr, cmd, self.line_size);
        fetch.dst = owner.clone();
        self.record_response(addr, owner, fetch.id);
        self.mshr.increment_acks_needed(addr);
        let ts = self.timestamp + self.access_latency;
        self.forward_by_destination(fetch, ts, false);
    }

    pub(crate) fn issue_invalidations(&mut self, ev: &MemEvent, sharers: Vec<NodeId>, cmd: Command) {
        for sharer in sharers {
            if sharer == ev.src {
                continue;
            }
            self.issue_invalidation(sharer, Some(ev), ev.base_addr, cmd);
        }
    }

    pub(crate) fn issue_invalidation(
        &mut self,
        dst: NodeId,
        ev: Option<&MemEvent>,
        addr: Addr,
        cmd: Command,
    ) {
        let mut inv = MemEvent::new(self.name.clone(), addr, addr, cmd, self.line_size);
        if let Some(ev) = ev {
            inv.copy_metadata(ev);
        }
        inv.dst = dst.clone();
        self.mshr.increment_acks_needed(addr);
        self.record_response(addr, dst, inv.id);
        let ts = self.timestamp + self.access_latency;
        self.forward_by_destination(inv, ts, false);
    }

    pub(crate) fn send_data_response(
        &mut self,
        ev: &MemEvent,
        data: Vec<u8>,
        cmd: Command,
        mem_flags: u32,
    ) {
        let mut resp = ev.make_response_cmd(cmd);
        resp.size = self.line_size;
        resp.payload = data;
        resp.mem_flags = mem_flags;
        let ts = self.timestamp + self.mshr_latency;
        self.forward_by_destination(resp, ts, false);
    }

    pub(crate) fn send_response(&mut self, ev: &MemEvent, flags: u32, mem_flags: u32) {
        let mut resp = ev.make_response();
        resp.size = self.line_size;
        resp.flags = flags;
        resp.mem_flags = mem_flags;
        let ts = self.timestamp + self.mshr_latency;
        self.forward_by_destination(resp, ts, false);
    }

    pub(crate) fn writeback_data(&mut self, ev: &MemEvent) {
        let addr = ev.base_addr;
        let mut wb = MemEvent::new(self.name.clone(), addr, addr, Command::PutM, self.line_size);
        wb.copy_metadata(ev);
        wb.payload = ev.payload.clone();
        wb.dirty = ev.dirty;

        if self.wait_wb_ack {
            self.mshr.insert_writeback(addr);
        }
        let ts = self.timestamp + self.access_latency;
        self.forward_by_address(wb, ts, false);
    }

    pub(crate) fn writeback_data_from_mshr(&mut self, addr: Addr) {
        let mut wb = MemEvent::new(self.name.clone(), addr, addr, Command::PutM, self.line_size);
        wb.payload = self.mshr.data(addr).cloned().unwrap_or_default();
        wb.dirty = self.mshr.data_dirty(addr);
        self.mshr.set_data_dirty(addr, false);

        if self.wait_wb_ack {
            self.mshr.insert_writeback(addr);
        }
        let ts = self.timestamp + self.mshr_latency;
        self.forward_by_address(wb, ts, false);
    }

    pub(crate) fn send_fetch_response(&mut self, ev: &MemEvent) {
        let addr = ev.base_addr;
        let mut ack = ev.make_response();
        ack.payload = self.mshr.data(addr).cloned().unwrap_or_default();
        ack.dirty = self.mshr.data_dirty(addr);
        self.mshr.clear_data(addr);
        let ts = self.timestamp + self.access_latency;
        self.forward_by_destination(ack, ts, false);
    }

    pub(crate) fn send_ack_inv(&mut self, ev: &MemEvent) {
        let addr = ev.base_addr;
        let ack = ev.make_response_cmd(Command::AckInv);
        if self.mshr.has_data(addr) {
            self.mshr.clear_data(addr);
        }
        let ts = self.timestamp + self.access_latency;
        self.forward_by_destination(ack, ts, false);
    }

    pub(crate) fn send_ack_put(&mut self, ev: &MemEvent) {
        let ack = ev.make_response_cmd(Command::AckPut);
        let ts = self.timestamp + self.access_latency;
        self.forward_by_destination(ack, ts, false);
    }

    pub(crate) fn send_nack(&mut self, ev: &MemEvent) {
        let nack = ev.make_nack_response();
        let ts = self.timestamp + self.access_latency;
        self.forward_by_destination(nack, ts, false);
    }

    /*
     * Outgoing queues and routing
     */

    fn send_outgoing_events(&mut self) {
        while let Some((&ts, _)) = self.cpu_msg_queue.iter().next() {
            if ts > self.timestamp {
                break;
            }
            let queue = self.cpu_msg_queue.get_mut(&ts).unwrap();
            let ev = queue.pop_front().unwrap();
            if queue.is_empty() {
                self.cpu_msg_queue.remove(&ts);
            }

            if let Some(rid) = ev.response_to {
                if let Some(start) = self.start_times.remove(&rid) {
                    let latency = self.timestamp - start;
                    if ev.cmd.is_data_response() {
                        self.stats.get_request_latency.record(latency);
                    } else {
                        self.stats.replacement_request_latency.record(latency);
                    }
                }
            }
            self.stats.record_sent(ev.cmd);
            if self.is_debug_addr(ev.base_addr) {
                debug!("{}: send cpu ({})", self.name, ev.brief());
            }
            self.cpu_link.send(ev);
        }

        while let Some((&ts, _)) = self.mem_msg_queue.iter().next() {
            if ts > self.timestamp {
                break;
            }
            let queue = self.mem_msg_queue.get_mut(&ts).unwrap();
            let msg = queue.pop_front().unwrap();
            if queue.is_empty() {
                self.mem_msg_queue.remove(&ts);
            }

            if msg.dir_access {
                if msg.event.cmd == Command::GetS {
                    self.stats.dir_entry_reads += 1;
                } else {
                    self.stats.dir_entry_writes += 1;
                }
            } else {
                self.stats.record_sent(msg.event.cmd);
            }
            if self.is_debug_addr(msg.event.base_addr) {
                debug!("{}: send mem ({})", self.name, msg.event.brief());
            }
            self.mem_link_mut().send(msg.event);
        }
    }

    /// Route by address: memory side first, then the cpu side.
    pub(crate) fn forward_by_address(&mut self, mut ev: MemEvent, ts: Cycle, dir_access: bool) {
        if let Some(dst) = self.mem_link_ref().find_target_destination(ev.addr) {
            ev.dst = dst;
            self.mem_msg_queue.entry(ts).or_default().push_back(MemMsg { event: ev, dir_access });
        } else if let Some(dst) = self.cpu_link.find_target_destination(ev.addr) {
            ev.dst = dst;
            self.cpu_msg_queue.entry(ts).or_default().push_back(ev);
        } else {
            panic!(
                "{}: unable to find destination for address 0x{:x} ({}); known destinations: \
                 cpulink: {}; memlink: {}",
                self.name,
                ev.addr,
                ev.brief(),
                self.cpu_link.available_destinations(),
                self.mem_link_ref().available_destinations()
            );
        }
    }

    /// Route by explicit destination name.
    pub(crate) fn forward_by_destination(&mut self, ev: MemEvent, ts: Cycle, dir_access: bool) {
        if self.cpu_link.is_reachable(&ev.dst) {
            self.cpu_msg_queue.entry(ts).or_default().push_back(ev);
        } else if self.mem_link_ref().is_reachable(&ev.dst) {
            self.mem_msg_queue.entry(ts).or_default().push_back(MemMsg { event: ev, dir_access });
        } else {
            panic!(
                "{}: destination {} appears unreachable on both links ({})",
                self.name,
                ev.dst,
                ev.brief()
            );
        }
    }

    /*
     * Debug
     */

    pub fn status_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("DirectoryController {}\n", self.name));
        out.push_str(&format!("  Cached entries: {}\n", self.entry_cache.len()));
        out.push_str(&format!(
            "  Requests waiting to be handled: {}\n",
            self.event_buffer.len()
        ));
        if self.verbose == 0 {
            return out;
        }
        out.push_str("  MSHR status:\n");
        out.push_str(&self.mshr.status_string());
        out.push_str("\n  Directory entries:\n");
        let mut addrs: Vec<Addr> = self.directory.keys().copied().collect();
        addrs.sort_unstable();
        for addr in addrs {
            out.push_str(&format!("    0x{:x} {}\n", addr, self.directory[&addr].describe()));
        }
        out
    }
}
