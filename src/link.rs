use std::collections::VecDeque;

use crate::event::{Addr, MemEvent, NodeId};
use crate::region::Region;

/// Endpoint categories advertised during the untimed init handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Cpu,
    Cache,
    Directory,
    Memory,
    Scratchpad,
}

/// Untimed messages exchanged before cycle 0.
#[derive(Debug, Clone)]
pub enum InitEvent {
    /// Coherence capability advertisement.
    Coherence {
        src: NodeId,
        endpoint: EndpointKind,
        tracks_presence: bool,
        sends_wb_ack: bool,
        line_size: u32,
    },
    /// Endpoint declaration to be forwarded across the controller so both
    /// sides see the full topology.
    Endpoint { src: NodeId, endpoint: EndpointKind },
    /// Preloaded memory contents.
    Data { src: NodeId, addr: Addr, payload: Vec<u8> },
}

/// A peer visible on a link: reachable by name, and optionally owning an
/// address range for routing by address.
#[derive(Debug, Clone)]
pub struct Peer {
    pub name: NodeId,
    pub region: Option<Region>,
    /// Whether this peer issues requests to us (a cache/CPU-side source).
    pub source: bool,
}

/// One link endpoint. The enclosing harness drains `outbox` and delivers
/// each event to its destination; the link itself only knows who is
/// reachable. This is the whole interface the directory consumes from the
/// simulator fabric.
#[derive(Debug, Default)]
pub struct MemLink {
    pub name: NodeId,
    peers: Vec<Peer>,
    outbox: VecDeque<MemEvent>,
    init_in: VecDeque<InitEvent>,
    init_out: VecDeque<InitEvent>,
}

impl MemLink {
    pub fn new(name: impl Into<NodeId>) -> Self {
        MemLink { name: name.into(), ..Default::default() }
    }

    pub fn add_peer(&mut self, peer: Peer) {
        self.peers.push(peer);
    }

    pub fn send(&mut self, ev: MemEvent) {
        self.outbox.push_back(ev);
    }

    pub fn pop_sent(&mut self) -> Option<MemEvent> {
        self.outbox.pop_front()
    }

    pub fn drain_sent(&mut self) -> Vec<MemEvent> {
        self.outbox.drain(..).collect()
    }

    /// Route by address: the first peer whose region owns `addr`.
    pub fn find_target_destination(&self, addr: Addr) -> Option<NodeId> {
        self.peers
            .iter()
            .find(|p| p.region.map_or(false, |r| r.contains(addr)))
            .map(|p| p.name.clone())
    }

    pub fn is_reachable(&self, dst: &str) -> bool {
        self.peers.iter().any(|p| p.name == dst)
    }

    pub fn is_source(&self, src: &str) -> bool {
        self.peers.iter().any(|p| p.name == src && p.source)
    }

    pub fn available_destinations(&self) -> String {
        let names: Vec<&str> = self.peers.iter().map(|p| p.name.as_str()).collect();
        names.join(", ")
    }

    /// Links in this repo are passive queues; a clock tick never leaves
    /// work pending inside the link itself.
    pub fn clock(&mut self) -> bool {
        true
    }

    pub fn send_untimed(&mut self, ev: InitEvent) {
        self.init_out.push_back(ev);
    }

    pub fn deliver_untimed(&mut self, ev: InitEvent) {
        self.init_in.push_back(ev);
    }

    pub fn recv_untimed(&mut self) -> Option<InitEvent> {
        self.init_in.pop_front()
    }

    pub fn drain_untimed_sent(&mut self) -> Vec<InitEvent> {
        self.init_out.drain(..).collect()
    }
}
