use std::path::Path;

use log::info;
use toml::Value;

use crate::dir::DirectoryController;
use crate::event::{Command, Cycle, MemEvent};
use crate::link::{MemLink, Peer};
use crate::node::{MemAddr, Node, TaskStep};
use crate::region::Region;
use crate::sim::config::{Config, DirectoryParams, MemParams, NodeParams, SimConfig};
use crate::sim::mem_model::MemEndpoint;

#[derive(Debug, Clone, Default)]
pub struct TopConfig {
    pub sim: SimConfig,
    pub directory: DirectoryParams,
    pub node: NodeParams,
    pub memory: MemParams,
}

impl TopConfig {
    pub fn from_toml_str(text: &str) -> Self {
        let doc: Value = text.parse().expect("cannot parse config");
        TopConfig {
            sim: SimConfig::from_section(doc.get("sim")),
            directory: DirectoryParams::from_section(doc.get("directory")),
            node: NodeParams::from_section(doc.get("node")),
            memory: MemParams::from_section(doc.get("memory")),
        }
    }

    pub fn load(path: &Path) -> Self {
        let text = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("cannot read config {}: {}", path.display(), e));
        Self::from_toml_str(&text)
    }
}

/// Top-level wiring: one node driving one directory backed by one memory
/// endpoint, with a scratchpad on the side. Each tick drains every
/// outbox into its consumer.
pub struct SimTop {
    pub node: Node,
    pub dir: DirectoryController,
    pub mem: MemEndpoint,
    pub spm: MemEndpoint,
    pub cycle: Cycle,
}

impl SimTop {
    pub fn new(config: &TopConfig) -> Self {
        let dir_region = Region {
            start: config.directory.addr_range_start,
            end: if config.directory.addr_range_end == 0 {
                u64::MAX
            } else {
                config.directory.addr_range_end
            },
            ..Region::default()
        };
        let line_size = config.directory.cache_line_size;

        let mut cpu_link = MemLink::new("dir0");
        cpu_link.add_peer(Peer { name: "node0".into(), region: None, source: true });
        let mut mem_link = MemLink::new("dir0");
        mem_link.add_peer(Peer { name: "mem0".into(), region: Some(dir_region), source: false });

        let dir = DirectoryController::new("dir0", &config.directory, cpu_link, Some(mem_link));

        let mut node = Node::new("node0", &config.node, line_size);
        node.dram_link.add_peer(Peer {
            name: "dir0".into(),
            region: Some(dir_region),
            source: false,
        });

        let mem = MemEndpoint::new("mem0", dir_region, config.memory.wb_ack, line_size);
        let spm_region = Region { start: 0, end: 1 << 20, ..Region::default() };
        let spm = MemEndpoint::new("spm0", spm_region, false, line_size);

        let mut top = SimTop { node, dir, mem, spm, cycle: 0 };
        top.init();
        top.seed_tasks(config);
        top
    }

    /// Untimed handshake before cycle 0: everyone advertises, the
    /// directory learns who caches and who acks writebacks.
    fn init(&mut self) {
        let node_advert = self.node.init_advert();
        let mem_advert = self.mem.init_advert();
        self.dir.cpu_link.deliver_untimed(node_advert);
        self.dir.mem_link.as_mut().unwrap().deliver_untimed(mem_advert);
        self.dir.init(0);
        self.dir.init(1);
    }

    /// Build one strided read/write task per core, deterministic across
    /// runs.
    fn seed_tasks(&mut self, config: &TopConfig) {
        let rounds = config.node.instr_per_task;
        let pxn = config.node.pxn_id;
        let line = config.directory.cache_line_size as u64;
        let footprint_lines = 64u64;

        for core_id in 0..self.node.cores.len() {
            let salt = hash_u64(core_id as u64 + 1);
            let mut round: u32 = 0;
            let task = Box::new(move |_ctx: &mut crate::node::TaskCtx| {
                if round >= rounds {
                    return TaskStep::Done;
                }
                let pick = hash_u64(salt ^ round as u64);
                let offset = (pick % footprint_lines) * line;
                // Mostly DRAM traffic, with some scratchpad sprinkled in
                let addr = MemAddr { pxn, dram_not_spm: pick % 8 != 7, offset };
                round += 1;
                if pick % 2 == 0 {
                    TaskStep::ReadMem { addr, size: 8 }
                } else {
                    TaskStep::WriteMem { addr, data: pick.to_le_bytes().to_vec() }
                }
            });
            self.node.push_task(core_id, task);
        }
    }

    pub fn tick_one(&mut self) {
        let now = self.cycle;

        self.node.tick(now);
        for ev in self.node.dram_link.drain_sent() {
            self.dir.handle_packet(ev, now);
        }
        for ev in self.node.spm_link.drain_sent() {
            if let Some(resp) = self.spm.handle(ev) {
                self.node.handle_response(resp);
            }
        }
        for ev in self.node.remote_link.drain_sent() {
            // Single-node topology: a remote request comes straight back
            let resp = self.node.handle_request(ev);
            self.node.handle_response(resp);
        }

        self.dir.clock(now);

        for ev in self.dir.cpu_link.drain_sent() {
            self.node.handle_response(ev);
        }
        let mem_out: Vec<MemEvent> = self.dir.mem_link.as_mut().unwrap().drain_sent();
        for ev in mem_out {
            if let Some(resp) = self.mem.handle(ev) {
                self.dir.handle_packet(resp, now);
            }
        }

        self.cycle += 1;
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.tick_one();
            if self.node.all_idle() && !self.dir.clock_is_on() {
                info!("simulation drained at cycle {}", self.cycle);
                break;
            }
        }
    }

    pub fn stats_report(&self) -> String {
        let mut out = String::new();
        // Per-command rows are summary detail; verbose=0 keeps totals only
        if self.dir.verbose > 0 {
            for (name, value) in self.dir.stats.report() {
                out.push_str(&format!("{} = {}\n", name, value));
            }
        }
        out.push_str(&format!(
            "get_request_latency_mean = {:.2}\n",
            self.dir.stats.get_request_latency.mean()
        ));
        out.push_str(&format!(
            "replacement_request_latency_mean = {:.2}\n",
            self.dir.stats.replacement_request_latency.mean()
        ));
        out.push_str(&format!(
            "MSHR_occupancy_max = {}\n",
            self.dir.stats.mshr_occupancy.max()
        ));
        out
    }
}

pub(crate) fn hash_u64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_u64(42), hash_u64(42));
        assert_ne!(hash_u64(1), hash_u64(2));
    }

    #[test]
    fn top_drains_simple_run() {
        let mut config = TopConfig::default();
        config.directory.addr_range_end = 1 << 20;
        config.node.num_cores = 2;
        config.node.instr_per_task = 10;
        let mut top = SimTop::new(&config);
        top.run(10_000);
        assert!(top.node.all_idle(), "cores should drain");
        assert!(top.dir.stats.recv(Command::GetS) > 0 || top.dir.stats.recv(Command::Write) > 0);
    }

    #[test]
    fn quiet_report_keeps_totals_only() {
        let mut config = TopConfig::default();
        config.directory.addr_range_end = 1 << 20;
        config.directory.verbose = 0;
        config.node.instr_per_task = 4;
        let mut top = SimTop::new(&config);
        top.run(10_000);
        let report = top.stats_report();
        assert!(!report.contains("_recv"));
        assert!(!report.contains("eventSent_"));
        assert!(report.contains("get_request_latency_mean"));
        assert!(report.contains("MSHR_occupancy_max"));
    }

    #[test]
    fn top_runs_under_msi() {
        let mut config = TopConfig::default();
        config.directory.addr_range_end = 1 << 20;
        config.directory.coherence_protocol = "MSI".to_string();
        config.node.instr_per_task = 8;
        let mut top = SimTop::new(&config);
        top.run(10_000);
        assert!(top.node.all_idle());
    }
}
