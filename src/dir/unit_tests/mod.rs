mod entry_cache_tests;
mod flush_tests;
mod mshr_tests;

use crate::dir::controller::DirectoryController;
use crate::dir::entry::CoherenceState;
use crate::event::{Addr, Command, Cycle, MemEvent};
use crate::link::{EndpointKind, InitEvent, MemLink, Peer};
use crate::region::{line_base, Region};
use crate::sim::config::DirectoryParams;

pub(crate) const MAX_CYCLES: u64 = 50;
pub(crate) const LINE: u32 = 64;

/// A directory with three caches on the cpu side and one memory on the
/// mem side; tests drive the links by hand.
pub(crate) struct Bench {
    pub dir: DirectoryController,
    pub cycle: Cycle,
}

impl Bench {
    pub(crate) fn new(protocol: &str) -> Self {
        Self::build(protocol, |_| {})
    }

    pub(crate) fn build(protocol: &str, tweak: impl FnOnce(&mut DirectoryParams)) -> Self {
        let mut params = DirectoryParams::default();
        params.coherence_protocol = protocol.to_string();
        params.addr_range_end = 0x10000;
        tweak(&mut params);

        let mut cpu = MemLink::new("dir0");
        for cache in ["cacheA", "cacheB", "cacheC"] {
            cpu.add_peer(Peer { name: cache.to_string(), region: None, source: true });
        }
        let mut mem = MemLink::new("dir0");
        mem.add_peer(Peer {
            name: "mem0".to_string(),
            region: Some(Region { start: 0, end: 0x10000, ..Region::default() }),
            source: false,
        });

        let dir = DirectoryController::new("dir0", &params, cpu, Some(mem));
        Bench { dir, cycle: 0 }
    }

    /// Teach the directory that `src` issues requests but does not cache.
    pub(crate) fn mark_incoherent(&mut self, src: &str) {
        self.dir.cpu_link.deliver_untimed(InitEvent::Coherence {
            src: src.to_string(),
            endpoint: EndpointKind::Cpu,
            tracks_presence: false,
            sends_wb_ack: false,
            line_size: LINE,
        });
        self.dir.init(1);
    }

    pub(crate) fn deliver(&mut self, ev: MemEvent) {
        let now = self.cycle;
        self.dir.handle_packet(ev, now);
    }

    /// One clock; returns what went out on (cpu, mem) this cycle.
    pub(crate) fn tick(&mut self) -> (Vec<MemEvent>, Vec<MemEvent>) {
        let now = self.cycle;
        self.dir.clock(now);
        self.cycle += 1;
        (
            self.dir.cpu_link.drain_sent(),
            self.dir.mem_link.as_mut().unwrap().drain_sent(),
        )
    }

    pub(crate) fn run_until_cpu(&mut self, mut pred: impl FnMut(&MemEvent) -> bool) -> MemEvent {
        for _ in 0..MAX_CYCLES {
            let (cpu, _mem) = self.tick();
            if let Some(ev) = cpu.into_iter().find(&mut pred) {
                return ev;
            }
        }
        panic!("expected cpu-side event within {MAX_CYCLES} cycles");
    }

    pub(crate) fn run_until_mem(&mut self, mut pred: impl FnMut(&MemEvent) -> bool) -> MemEvent {
        for _ in 0..MAX_CYCLES {
            let (_cpu, mem) = self.tick();
            if let Some(ev) = mem.into_iter().find(&mut pred) {
                return ev;
            }
        }
        panic!("expected mem-side event within {MAX_CYCLES} cycles");
    }

    /// Tick `cycles` times, asserting nothing matches on either side.
    pub(crate) fn assert_quiet(&mut self, cycles: u64, mut pred: impl FnMut(&MemEvent) -> bool) {
        for _ in 0..cycles {
            let (cpu, mem) = self.tick();
            assert!(
                !cpu.iter().chain(mem.iter()).any(&mut pred),
                "unexpected event emitted"
            );
        }
    }
}

pub(crate) fn req(src: &str, cmd: Command, addr: Addr) -> MemEvent {
    let mut ev = MemEvent::new(src, addr, line_base(addr, LINE), cmd, LINE);
    ev.dst = "dir0".to_string();
    ev
}

/// Shootdown arriving from the memory side.
pub(crate) fn from_mem(cmd: Command, addr: Addr) -> MemEvent {
    let mut ev = MemEvent::new("mem0", addr, line_base(addr, LINE), cmd, LINE);
    ev.dst = "dir0".to_string();
    ev
}

pub(crate) fn data_resp(request: &MemEvent, cmd: Command, payload: Vec<u8>) -> MemEvent {
    let mut resp = request.make_response_cmd(cmd);
    resp.payload = payload;
    resp
}

/// Establish M with `owner` via a MESI read miss.
pub(crate) fn seed_m(bench: &mut Bench, owner: &str, addr: Addr) {
    bench.deliver(req(owner, Command::GetS, addr));
    let mem_req = bench.run_until_mem(|e| e.cmd == Command::GetS && e.addr_global);
    bench.deliver(data_resp(&mem_req, Command::GetXResp, vec![0xAA; LINE as usize]));
    let owner_name = owner.to_string();
    let resp = bench.run_until_cpu(|e| e.cmd == Command::GetXResp && e.dst == owner_name);
    assert_eq!(resp.dst, owner);
    assert_eq!(bench.dir.entry_state(addr), Some(CoherenceState::M));
}

/// Establish S with the given sharers via MSI read misses.
pub(crate) fn seed_s(bench: &mut Bench, sharers: &[&str], addr: Addr) {
    for (i, sharer) in sharers.iter().enumerate() {
        bench.deliver(req(sharer, Command::GetS, addr));
        if i == 0 {
            let mem_req = bench.run_until_mem(|e| e.cmd == Command::GetS && e.addr_global);
            bench.deliver(data_resp(&mem_req, Command::GetXResp, vec![0xBB; LINE as usize]));
        }
        let name = sharer.to_string();
        bench.run_until_cpu(|e| e.cmd == Command::GetSResp && e.dst == name);
    }
    assert_eq!(bench.dir.entry_state(addr), Some(CoherenceState::S));
    for sharer in sharers {
        assert!(bench.dir.entry(addr).unwrap().is_sharer(sharer));
    }
}

/// The per-line invariants that must hold after every transition.
pub(crate) fn assert_invariants(dir: &DirectoryController) {
    use crate::dir::entry::CoherenceState::*;
    let addrs: Vec<Addr> = dir.directory.keys().copied().collect();
    for addr in addrs {
        let entry = dir.entry(addr).unwrap();
        let state = entry.state();
        if entry.has_owner() {
            assert!(
                matches!(state, M | MInv | MInvX),
                "owner present in state {} at 0x{:x}",
                state.name(),
                addr
            );
        }
        if entry.has_sharers() {
            assert!(
                matches!(state, S | SD | SB | SInv | SMInv | SDInv | SBInv),
                "sharers present in state {} at 0x{:x}",
                state.name(),
                addr
            );
        }
        assert!(
            !(entry.has_owner() && entry.has_sharers()),
            "owner and sharers both present at 0x{:x}",
            addr
        );
        let outstanding = dir.responses.get(&addr).map_or(0, |m| m.len());
        assert_eq!(
            dir.mshr.acks_needed(addr) as usize,
            outstanding,
            "ack counter out of sync at 0x{:x}",
            addr
        );
        if !entry.is_cached() {
            assert!(
                matches!(state, I | S | M | Id | Sd | Md),
                "uncached entry in transient state {} at 0x{:x}",
                state.name(),
                addr
            );
        }
    }
}
