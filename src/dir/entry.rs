use std::collections::BTreeSet;

use crate::event::{Addr, NodeId};

/// Per-line coherence state. Stable states are I/S/M; the transient
/// states encode what the line is waiting for; the `*_D` trio marks a
/// directory-entry fetch from memory in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoherenceState {
    I,
    S,
    M,
    /// I, memory read issued for a GetS.
    IS,
    /// I, memory access issued for a GetX/Write.
    IM,
    /// S, memory read issued for a GetS.
    SD,
    /// S, flush to memory in flight.
    SB,
    /// I, flush to memory in flight.
    IB,
    /// M, FetchInv to owner in flight.
    MInv,
    /// M, FetchInvX (downgrade) to owner in flight.
    MInvX,
    /// S, invalidations to sharers in flight.
    SInv,
    /// S, invalidations and a memory read both in flight.
    SMInv,
    /// S_D with invalidations in flight.
    SDInv,
    /// S_B with invalidations in flight.
    SBInv,
    /// Directory entry being fetched; line was I.
    Id,
    /// Directory entry being fetched; line was S.
    Sd,
    /// Directory entry being fetched; line was M.
    Md,
    /// Never allocated.
    NP,
}

impl CoherenceState {
    pub fn name(self) -> &'static str {
        use CoherenceState::*;
        match self {
            I => "I",
            S => "S",
            M => "M",
            IS => "IS",
            IM => "IM",
            SD => "S_D",
            SB => "S_B",
            IB => "I_B",
            MInv => "M_Inv",
            MInvX => "M_InvX",
            SInv => "S_Inv",
            SMInv => "SM_Inv",
            SDInv => "SD_Inv",
            SBInv => "SB_Inv",
            Id => "I_d",
            Sd => "S_d",
            Md => "M_d",
            NP => "NP",
        }
    }

    pub fn is_stable(self) -> bool {
        matches!(self, CoherenceState::I | CoherenceState::S | CoherenceState::M)
    }

    /// The directory-fetch state corresponding to a stable state.
    pub fn dir_fetch_of(self) -> Option<CoherenceState> {
        match self {
            CoherenceState::I => Some(CoherenceState::Id),
            CoherenceState::S => Some(CoherenceState::Sd),
            CoherenceState::M => Some(CoherenceState::Md),
            _ => None,
        }
    }
}

/// Directory metadata for one cache line.
#[derive(Debug, Clone)]
pub struct DirEntry {
    base_addr: Addr,
    state: CoherenceState,
    owner: Option<NodeId>,
    sharers: BTreeSet<NodeId>,
    cached: bool,
}

impl DirEntry {
    pub fn new(base_addr: Addr) -> Self {
        DirEntry {
            base_addr,
            state: CoherenceState::I,
            owner: None,
            sharers: BTreeSet::new(),
            cached: true,
        }
    }

    pub fn base_addr(&self) -> Addr {
        self.base_addr
    }

    pub fn state(&self) -> CoherenceState {
        self.state
    }

    pub fn set_state(&mut self, state: CoherenceState) {
        self.state = state;
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner(&self) -> Option<&NodeId> {
        self.owner.as_ref()
    }

    pub fn set_owner(&mut self, owner: impl Into<NodeId>) {
        self.owner = Some(owner.into());
    }

    pub fn remove_owner(&mut self) {
        self.owner = None;
    }

    pub fn has_sharers(&self) -> bool {
        !self.sharers.is_empty()
    }

    pub fn sharer_count(&self) -> usize {
        self.sharers.len()
    }

    pub fn is_sharer(&self, node: &str) -> bool {
        self.sharers.contains(node)
    }

    pub fn add_sharer(&mut self, node: impl Into<NodeId>) {
        self.sharers.insert(node.into());
    }

    pub fn remove_sharer(&mut self, node: &str) {
        self.sharers.remove(node);
    }

    pub fn sharers(&self) -> impl Iterator<Item = &NodeId> {
        self.sharers.iter()
    }

    pub fn sharer_list(&self) -> Vec<NodeId> {
        self.sharers.iter().cloned().collect()
    }

    pub fn describe(&self) -> String {
        let sharers: Vec<&str> = self.sharers.iter().map(|s| s.as_str()).collect();
        format!(
            "state={} owner={} sharers=[{}] cached={}",
            self.state.name(),
            self.owner.as_deref().unwrap_or("-"),
            sharers.join(","),
            self.cached
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_is_idle_and_cached() {
        let e = DirEntry::new(0x100);
        assert_eq!(e.state(), CoherenceState::I);
        assert!(e.is_cached());
        assert!(!e.has_owner());
        assert!(!e.has_sharers());
    }

    #[test]
    fn sharer_bookkeeping() {
        let mut e = DirEntry::new(0);
        e.add_sharer("cache0");
        e.add_sharer("cache1");
        e.add_sharer("cache0");
        assert_eq!(e.sharer_count(), 2);
        assert!(e.is_sharer("cache1"));
        e.remove_sharer("cache0");
        assert_eq!(e.sharer_count(), 1);
        assert!(!e.is_sharer("cache0"));
    }

    #[test]
    fn dir_fetch_states_map_from_stable() {
        assert_eq!(CoherenceState::I.dir_fetch_of(), Some(CoherenceState::Id));
        assert_eq!(CoherenceState::S.dir_fetch_of(), Some(CoherenceState::Sd));
        assert_eq!(CoherenceState::M.dir_fetch_of(), Some(CoherenceState::Md));
        assert_eq!(CoherenceState::IS.dir_fetch_of(), None);
    }
}
