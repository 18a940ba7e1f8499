use std::sync::atomic::{AtomicU64, Ordering};

use num_derive::{FromPrimitive, ToPrimitive};

pub type Addr = u64;
pub type Cycle = u64;

/// Endpoint name as carried in event frames.
pub type NodeId = String;

/// Globally unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

impl EventId {
    pub fn next() -> Self {
        EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Coherence commands exchanged over the cpu and memory links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum Command {
    GetS,
    GetX,
    GetSX,
    Write,
    PutS,
    PutM,
    PutE,
    PutX,
    FlushLine,
    FlushLineInv,
    FetchInv,
    FetchInvX,
    ForceInv,
    Inv,
    GetSResp,
    GetXResp,
    WriteResp,
    FlushLineResp,
    AckInv,
    AckPut,
    FetchResp,
    FetchXResp,
    Nack,
    NullCmd,
}

pub const NUM_COMMANDS: usize = Command::NullCmd as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Cache,
    Data,
    Control,
}

impl Command {
    pub fn command_class(self) -> CommandClass {
        use Command::*;
        match self {
            GetS | GetX | GetSX | Write | PutS | PutM | PutE | PutX | FlushLine
            | FlushLineInv | FetchInv | FetchInvX | ForceInv | Inv => CommandClass::Request,
            GetSResp | GetXResp | WriteResp | FlushLineResp | AckInv | AckPut | FetchResp
            | FetchXResp | Nack => CommandClass::Response,
            NullCmd => CommandClass::Request,
        }
    }

    pub fn is_request(self) -> bool {
        self.command_class() == CommandClass::Request
    }

    /// Coherence traffic (requests and responses alike) is Cache-class
    /// and flows through the state machine; only control messages and
    /// raw payload moves sit outside it.
    pub fn event_type(self) -> EventType {
        use Command::*;
        match self {
            NullCmd => EventType::Control,
            _ => EventType::Cache,
        }
    }

    /// Whether this command participates in the coherence state machine.
    pub fn is_cacheable_class(self) -> bool {
        self != Command::NullCmd
    }

    /// Data-class responses answer Get* requests; the latency statistics
    /// split on this.
    pub fn is_data_response(self) -> bool {
        matches!(self, Command::GetSResp | Command::GetXResp)
    }

    /// Canonical response command for a request.
    pub fn response_command(self) -> Command {
        use Command::*;
        match self {
            GetS => GetSResp,
            GetX | GetSX => GetXResp,
            Write => WriteResp,
            FlushLine | FlushLineInv => FlushLineResp,
            FetchInv => FetchResp,
            FetchInvX => FetchXResp,
            Inv | ForceInv => AckInv,
            PutS | PutM | PutE | PutX => AckPut,
            _ => panic!("no canonical response for {:?}", self),
        }
    }

    pub fn name(self) -> &'static str {
        use Command::*;
        match self {
            GetS => "GetS",
            GetX => "GetX",
            GetSX => "GetSX",
            Write => "Write",
            PutS => "PutS",
            PutM => "PutM",
            PutE => "PutE",
            PutX => "PutX",
            FlushLine => "FlushLine",
            FlushLineInv => "FlushLineInv",
            FetchInv => "FetchInv",
            FetchInvX => "FetchInvX",
            ForceInv => "ForceInv",
            Inv => "Inv",
            GetSResp => "GetSResp",
            GetXResp => "GetXResp",
            WriteResp => "WriteResp",
            FlushLineResp => "FlushLineResp",
            AckInv => "AckInv",
            AckPut => "AckPut",
            FetchResp => "FetchResp",
            FetchXResp => "FetchXResp",
            Nack => "NACK",
            NullCmd => "NULLCMD",
        }
    }
}

pub const F_NONCACHEABLE: u32 = 1 << 0;
pub const F_NORESPONSE: u32 = 1 << 1;

/// Message frame exchanged between caches, the directory and memory.
#[derive(Debug, Clone)]
pub struct MemEvent {
    pub id: EventId,
    pub response_to: Option<EventId>,
    pub cmd: Command,
    /// Routing address (the untruncated request address).
    pub addr: Addr,
    /// Line base address.
    pub base_addr: Addr,
    pub src: NodeId,
    pub dst: NodeId,
    /// Original requestor, preserved across forwards.
    pub rqstr: NodeId,
    pub size: u32,
    pub payload: Vec<u8>,
    pub dirty: bool,
    pub evict: bool,
    pub flags: u32,
    pub mem_flags: u32,
    /// False for internal directory-entry storage accesses.
    pub addr_global: bool,
    /// Ingress timestamp, stamped by the receiving component.
    pub delivery_time: Cycle,
    /// Carried by a NACK: the rejected event, for the sender to retry.
    pub nacked_event: Option<Box<MemEvent>>,
}

impl MemEvent {
    pub fn new(src: impl Into<NodeId>, addr: Addr, base_addr: Addr, cmd: Command, size: u32) -> Self {
        let src = src.into();
        MemEvent {
            id: EventId::next(),
            response_to: None,
            cmd,
            addr,
            base_addr,
            src: src.clone(),
            dst: NodeId::new(),
            rqstr: src,
            size,
            payload: Vec::new(),
            dirty: false,
            evict: false,
            flags: 0,
            mem_flags: 0,
            addr_global: true,
            delivery_time: 0,
            nacked_event: None,
        }
    }

    pub fn query_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    /// Copy requestor/flags metadata from another event, as done when a
    /// forwarded message acts on behalf of an original request.
    pub fn copy_metadata(&mut self, other: &MemEvent) {
        self.rqstr = other.rqstr.clone();
        self.flags = other.flags;
        self.mem_flags = other.mem_flags;
    }

    /// Build the canonical response for this request.
    pub fn make_response(&self) -> MemEvent {
        self.make_response_cmd(self.cmd.response_command())
    }

    /// Build a response with an explicit command.
    pub fn make_response_cmd(&self, cmd: Command) -> MemEvent {
        let mut resp = MemEvent::new(self.dst.clone(), self.addr, self.base_addr, cmd, self.size);
        resp.dst = self.src.clone();
        resp.rqstr = self.rqstr.clone();
        resp.response_to = Some(self.id);
        resp.flags = self.flags;
        resp.mem_flags = self.mem_flags;
        resp.addr_global = self.addr_global;
        resp
    }

    /// Build a NACK carrying this event back to its sender for retry.
    pub fn make_nack_response(&self) -> MemEvent {
        let mut nack = self.make_response_cmd(Command::Nack);
        nack.payload.clear();
        nack.size = 0;
        nack.nacked_event = Some(Box::new(self.clone()));
        nack
    }

    pub fn brief(&self) -> String {
        format!(
            "{} 0x{:x} {}->{} id={}",
            self.cmd.name(),
            self.base_addr,
            self.src,
            self.dst,
            self.id.0
        )
    }
}
