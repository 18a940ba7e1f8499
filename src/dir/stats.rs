use num_traits::FromPrimitive;
use serde::Serialize;

use crate::event::{Command, Cycle, NUM_COMMANDS};

/// Accumulated latency samples for one statistic.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyStat {
    samples: u64,
    total: u64,
    max: u64,
}

impl LatencyStat {
    pub fn record(&mut self, latency: Cycle) {
        self.samples = self.samples.saturating_add(1);
        self.total = self.total.saturating_add(latency);
        self.max = self.max.max(latency);
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total as f64 / self.samples as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OccupancyStat {
    samples: u64,
    total: u64,
    max: u64,
}

impl OccupancyStat {
    pub fn sample(&mut self, occupancy: usize) {
        self.samples = self.samples.saturating_add(1);
        self.total = self.total.saturating_add(occupancy as u64);
        self.max = self.max.max(occupancy as u64);
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total as f64 / self.samples as f64
        }
    }
}

/// The directory's statistic block: per-command receive/send counters,
/// the non-cacheable subset, hit counters, directory-entry storage
/// traffic and the latency accumulators.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    event_recv: Vec<u64>,
    noncache_recv: Vec<u64>,
    event_sent: Vec<u64>,
    pub cache_hits: u64,
    pub mshr_hits: u64,
    pub dir_entry_reads: u64,
    pub dir_entry_writes: u64,
    pub get_request_latency: LatencyStat,
    pub replacement_request_latency: LatencyStat,
    pub mshr_occupancy: OccupancyStat,
}

impl Default for DirectoryStats {
    fn default() -> Self {
        DirectoryStats {
            event_recv: vec![0; NUM_COMMANDS],
            noncache_recv: vec![0; NUM_COMMANDS],
            event_sent: vec![0; NUM_COMMANDS],
            cache_hits: 0,
            mshr_hits: 0,
            dir_entry_reads: 0,
            dir_entry_writes: 0,
            get_request_latency: LatencyStat::default(),
            replacement_request_latency: LatencyStat::default(),
            mshr_occupancy: OccupancyStat::default(),
        }
    }
}

impl DirectoryStats {
    pub fn record_recv(&mut self, cmd: Command) {
        self.event_recv[cmd as usize] += 1;
    }

    pub fn record_noncache_recv(&mut self, cmd: Command) {
        self.noncache_recv[cmd as usize] += 1;
    }

    pub fn record_sent(&mut self, cmd: Command) {
        self.event_sent[cmd as usize] += 1;
    }

    pub fn recv(&self, cmd: Command) -> u64 {
        self.event_recv[cmd as usize]
    }

    pub fn noncache_recv(&self, cmd: Command) -> u64 {
        self.noncache_recv[cmd as usize]
    }

    pub fn sent(&self, cmd: Command) -> u64 {
        self.event_sent[cmd as usize]
    }

    /// Named counter rows in the exported statistic naming scheme, zero
    /// rows omitted.
    pub fn report(&self) -> Vec<(String, u64)> {
        let mut rows = Vec::new();
        for i in 0..NUM_COMMANDS {
            let cmd = Command::from_usize(i).expect("command index in range");
            if self.event_recv[i] > 0 {
                rows.push((format!("{}_recv", cmd.name()), self.event_recv[i]));
            }
            if self.noncache_recv[i] > 0 {
                rows.push((format!("{}_uncache_recv", cmd.name()), self.noncache_recv[i]));
            }
            if self.event_sent[i] > 0 {
                rows.push((format!("eventSent_{}", cmd.name()), self.event_sent[i]));
            }
        }
        rows.push(("directory_cache_hits".to_string(), self.cache_hits));
        rows.push(("mshr_hits".to_string(), self.mshr_hits));
        rows.push(("eventSent_read_directory_entry".to_string(), self.dir_entry_reads));
        rows.push(("eventSent_write_directory_entry".to_string(), self.dir_entry_writes));
        rows
    }
}
