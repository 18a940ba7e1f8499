//! Node-level execution harness: cores with task deques that turn memory
//! stalls into request events on the scratchpad, DRAM, or remote links.

pub mod core;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use log::debug;

use crate::event::{Addr, Command, Cycle, EventId, MemEvent, NodeId};
use crate::link::{EndpointKind, InitEvent, MemLink};
use crate::region::line_base;
use crate::sim::config::NodeParams;
use crate::sim::mem_model::SparseMem;

pub use self::core::{Core, CoreState, MemAddr, Task, TaskCtx, TaskStep};

/// Which link a request went out on, so a NACKed retry can follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestLink {
    Spm,
    Dram,
    Remote,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    core_id: usize,
    link: RequestLink,
}

/// A node: `num_cores` core contexts, three link endpoints, and a local
/// scratchpad it services peer requests against.
pub struct Node {
    pub name: NodeId,
    pub pxn_id: i64,
    pub cores: Vec<Core>,
    /// Outstanding memory requests: request id -> issuing core and link.
    pending: HashMap<EventId, PendingRequest>,
    pub spm_link: MemLink,
    pub dram_link: MemLink,
    pub remote_link: MemLink,
    pub local_spm: SparseMem,
    line_size: u32,
}

impl Node {
    pub fn new(name: impl Into<NodeId>, params: &NodeParams, line_size: u32) -> Self {
        let name = name.into();
        let cores = (0..params.num_cores).map(Core::new).collect();
        Node {
            pxn_id: params.pxn_id,
            cores,
            pending: HashMap::new(),
            spm_link: MemLink::new(name.clone()),
            dram_link: MemLink::new(name.clone()),
            remote_link: MemLink::new(name.clone()),
            local_spm: SparseMem::default(),
            line_size,
            name,
        }
    }

    /// Phase-0 advertisement: the node issues requests but does not
    /// cache, so it does not track presence.
    pub fn init_advert(&self) -> InitEvent {
        InitEvent::Coherence {
            src: self.name.clone(),
            endpoint: EndpointKind::Cpu,
            tracks_presence: false,
            sends_wb_ack: false,
            line_size: self.line_size,
        }
    }

    pub fn push_task(&mut self, core_id: usize, task: Task) {
        self.check_core_id(core_id);
        self.cores[core_id].push_task(task);
    }

    fn check_core_id(&self, core_id: usize) {
        if core_id >= self.cores.len() {
            panic!(
                "{}: bad core id = {}, num_cores = {}",
                self.name,
                core_id,
                self.cores.len()
            );
        }
    }

    /// Per-tick pump: step every runnable core; a core that stalls on
    /// memory gets its request synthesized onto the right link.
    pub fn tick(&mut self, _now: Cycle) {
        for core_id in 0..self.cores.len() {
            if !self.cores[core_id].runnable() {
                continue;
            }
            if let Some(step) = self.cores[core_id].execute() {
                self.send_memory_request(core_id, step);
            }
        }
    }

    fn send_memory_request(&mut self, core_id: usize, step: TaskStep) {
        let (addr, req) = match step {
            TaskStep::ReadMem { addr, size } => {
                let ev = self.build_request(Command::GetS, addr.offset, size, Vec::new());
                debug!("{}: core {} read request 0x{:x}", self.name, core_id, addr.offset);
                (addr, ev)
            }
            TaskStep::WriteMem { addr, data } => {
                let size = data.len() as u32;
                let ev = self.build_request(Command::Write, addr.offset, size, data);
                debug!("{}: core {} write request 0x{:x}", self.name, core_id, addr.offset);
                (addr, ev)
            }
            _ => return,
        };

        let link = if addr.pxn != self.pxn_id {
            RequestLink::Remote
        } else if addr.dram_not_spm {
            RequestLink::Dram
        } else {
            RequestLink::Spm
        };
        self.pending.insert(req.id, PendingRequest { core_id, link });
        self.send_on(link, req);
    }

    fn send_on(&mut self, link: RequestLink, req: MemEvent) {
        match link {
            RequestLink::Spm => self.spm_link.send(req),
            RequestLink::Dram => self.dram_link.send(req),
            RequestLink::Remote => self.remote_link.send(req),
        }
    }

    fn build_request(&self, cmd: Command, offset: Addr, size: u32, payload: Vec<u8>) -> MemEvent {
        let mut ev = MemEvent::new(
            self.name.clone(),
            offset,
            line_base(offset, self.line_size),
            cmd,
            size,
        );
        ev.payload = payload;
        ev
    }

    /// A response to one of this node's requests: map it back to the
    /// issuing core and unblock it.
    pub fn handle_response(&mut self, mut ev: MemEvent) {
        if ev.cmd == Command::Nack {
            // The receiver was full; retry the rejected request on the
            // link it originally went out on
            let nacked = *ev.nacked_event.take().expect("NACK carries the rejected event");
            let pending = *self.pending.get(&nacked.id).unwrap_or_else(|| {
                panic!("{}: NACK matches no pending request", self.name)
            });
            debug!("{}: core {} retrying nacked request", self.name, pending.core_id);
            self.send_on(pending.link, nacked);
            return;
        }

        let rid = ev
            .response_to
            .unwrap_or_else(|| panic!("{}: response carries no request id", self.name));
        let core_id = self
            .pending
            .remove(&rid)
            .unwrap_or_else(|| panic!("{}: response matches no pending request", self.name))
            .core_id;
        self.check_core_id(core_id);

        match ev.cmd {
            Command::GetSResp | Command::GetXResp => {
                self.cores[core_id].deposit_read(ev.payload);
            }
            _ => {
                self.cores[core_id].complete_write();
            }
        }
    }

    /// A request from a peer node: perform the operation in place against
    /// local memory and return the response.
    pub fn handle_request(&mut self, ev: MemEvent) -> MemEvent {
        match ev.cmd {
            Command::GetS => {
                let payload = self.local_spm.read(ev.addr, ev.size);
                let mut resp = ev.make_response_cmd(Command::GetSResp);
                resp.payload = payload;
                resp
            }
            Command::Write => {
                self.local_spm.write(ev.addr, &ev.payload);
                ev.make_response_cmd(Command::WriteResp)
            }
            other => panic!("{}: bad request type {:?}", self.name, other),
        }
    }

    pub fn all_idle(&self) -> bool {
        self.pending.is_empty() && self.cores.iter().all(|c| c.state == CoreState::Idle)
    }
}
