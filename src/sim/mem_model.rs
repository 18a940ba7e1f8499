use std::collections::HashMap;

use crate::event::{Addr, Command, MemEvent, NodeId, F_NONCACHEABLE, F_NORESPONSE};
use crate::link::{EndpointKind, InitEvent};
use crate::region::{line_base, Region};

/// Sparse byte store that zero-fills anything read.
#[derive(Debug, Default)]
pub struct SparseMem {
    mem: HashMap<Addr, u8>,
}

impl SparseMem {
    pub fn read(&self, addr: Addr, size: u32) -> Vec<u8> {
        (0..size as u64)
            .map(|i| self.mem.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    pub fn write(&mut self, addr: Addr, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.mem.insert(addr + i as u64, *byte);
        }
    }

    pub fn reset(&mut self) {
        self.mem.clear();
    }
}

/// Protocol-speaking memory (or scratchpad) stand-in used by the harness
/// and tests. Reads are granted as exclusive data; writebacks and writes
/// land in the sparse store. Directory-entry storage traffic arrives on
/// the same port with non-global addresses and is answered in kind.
pub struct MemEndpoint {
    pub name: NodeId,
    pub region: Region,
    pub mem: SparseMem,
    wb_ack: bool,
    line_size: u32,
}

impl MemEndpoint {
    pub fn new(name: impl Into<NodeId>, region: Region, wb_ack: bool, line_size: u32) -> Self {
        MemEndpoint {
            name: name.into(),
            region,
            mem: SparseMem::default(),
            wb_ack,
            line_size,
        }
    }

    pub fn init_advert(&self) -> InitEvent {
        InitEvent::Coherence {
            src: self.name.clone(),
            endpoint: EndpointKind::Memory,
            tracks_presence: false,
            sends_wb_ack: self.wb_ack,
            line_size: self.line_size,
        }
    }

    /// Line-granularity accesses read/write the whole line; everything
    /// else lands at the exact request address.
    fn data_addr(&self, ev: &MemEvent) -> Addr {
        if ev.query_flag(F_NONCACHEABLE) || ev.size != self.line_size {
            ev.addr
        } else {
            line_base(ev.addr, self.line_size)
        }
    }

    /// Service one request, returning the response to deliver back (if
    /// the request wants one).
    pub fn handle(&mut self, ev: MemEvent) -> Option<MemEvent> {
        match ev.cmd {
            Command::GetS | Command::GetSX => {
                let addr = self.data_addr(&ev);
                let payload = self.mem.read(addr, ev.size);
                // Directory-entry reads are answered as plain shared
                // data; line reads hand the line over exclusively and
                // let the directory downgrade.
                let cmd = if ev.addr_global && !ev.query_flag(F_NONCACHEABLE) {
                    Command::GetXResp
                } else {
                    Command::GetSResp
                };
                let mut resp = ev.make_response_cmd(cmd);
                resp.payload = payload;
                Some(resp)
            }
            Command::GetX => {
                let addr = self.data_addr(&ev);
                let payload = self.mem.read(addr, ev.size);
                let mut resp = ev.make_response_cmd(Command::GetXResp);
                resp.payload = payload;
                Some(resp)
            }
            Command::Write => {
                let addr = self.data_addr(&ev);
                self.mem.write(addr, &ev.payload);
                if ev.query_flag(F_NORESPONSE) {
                    None
                } else {
                    Some(ev.make_response_cmd(Command::WriteResp))
                }
            }
            Command::PutM | Command::PutX => {
                if ev.dirty || !ev.payload.is_empty() {
                    let addr = self.data_addr(&ev);
                    self.mem.write(addr, &ev.payload);
                }
                if ev.query_flag(F_NORESPONSE) || !self.wb_ack {
                    None
                } else {
                    Some(ev.make_response_cmd(Command::AckPut))
                }
            }
            Command::PutE => {
                // Clean eviction (or a spilled directory entry); nothing
                // to write unless a payload came along
                if !ev.payload.is_empty() {
                    let addr = self.data_addr(&ev);
                    self.mem.write(addr, &ev.payload);
                }
                if ev.query_flag(F_NORESPONSE) || !self.wb_ack {
                    None
                } else {
                    Some(ev.make_response_cmd(Command::AckPut))
                }
            }
            Command::FlushLine | Command::FlushLineInv => {
                if ev.evict && ev.dirty {
                    let addr = self.data_addr(&ev);
                    self.mem.write(addr, &ev.payload);
                }
                Some(ev.make_response_cmd(Command::FlushLineResp))
            }
            other => panic!("{}: memory endpoint cannot handle {:?}", self.name, other),
        }
    }
}
