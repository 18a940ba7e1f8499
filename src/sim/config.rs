use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub cycles: u64,
    pub log_level: String,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self { cycles: 10000, log_level: "warn".to_string() }
    }
}

/// Parameters of the directory controller. Unit-carrying fields keep
/// their SI string form here; the controller parses and validates them
/// at construction.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DirectoryParams {
    pub cache_line_size: u32,
    pub entry_cache_size: u64,
    pub coherence_protocol: String,
    pub mshr_num_entries: i64,
    pub access_latency_cycles: u64,
    pub mshr_latency_cycles: u64,
    pub max_requests_per_cycle: u64,
    pub addr_range_start: u64,
    pub addr_range_end: u64,
    pub interleave_size: String,
    pub interleave_step: String,
    pub clock: String,
    pub min_packet_size: String,
    pub debug_addr: Vec<u64>,
    pub verbose: u64,
    /// No longer supported; setting it is fatal.
    pub net_memory_name: String,
    /// Deprecated; detected and warned about.
    pub network_num_vc: Option<u64>,
}

impl Config for DirectoryParams {}

impl Default for DirectoryParams {
    fn default() -> Self {
        Self {
            cache_line_size: 64,
            entry_cache_size: 32768,
            coherence_protocol: "MESI".to_string(),
            mshr_num_entries: -1,
            access_latency_cycles: 0,
            mshr_latency_cycles: 0,
            max_requests_per_cycle: 0,
            addr_range_start: 0,
            addr_range_end: u64::MAX,
            interleave_size: "0B".to_string(),
            interleave_step: "0B".to_string(),
            clock: "1GHz".to_string(),
            min_packet_size: "8B".to_string(),
            debug_addr: Vec::new(),
            verbose: 1,
            net_memory_name: String::new(),
            network_num_vc: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeParams {
    pub num_cores: usize,
    pub instr_per_task: u32,
    pub pxn_id: i64,
}

impl Config for NodeParams {}

impl Default for NodeParams {
    fn default() -> Self {
        Self { num_cores: 1, instr_per_task: 100, pxn_id: 0 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MemParams {
    pub wb_ack: bool,
}

impl Config for MemParams {}

impl Default for MemParams {
    fn default() -> Self {
        Self { wb_ack: true }
    }
}

/// Parse an SI byte quantity like "0B", "64B", "1KiB", "4KB". Units are
/// required; both binary and decimal prefixes are accepted.
pub fn parse_bytes(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit());
    let (num, unit) = match split {
        Some(idx) if idx > 0 => s.split_at(idx),
        _ => return Err(format!("'{}' is not a byte quantity with units", s)),
    };
    let value: u64 = num.parse().map_err(|_| format!("bad numeric part in '{}'", s))?;
    let mult: u64 = match unit.trim() {
        "B" => 1,
        "KB" => 1000,
        "KiB" => 1 << 10,
        "MB" => 1_000_000,
        "MiB" => 1 << 20,
        "GB" => 1_000_000_000,
        "GiB" => 1 << 30,
        other => return Err(format!("unknown byte unit '{}'", other)),
    };
    Ok(value * mult)
}

/// Parse a clock frequency like "1GHz", "500MHz". Returns Hz.
pub fn parse_freq(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit());
    let (num, unit) = match split {
        Some(idx) if idx > 0 => s.split_at(idx),
        _ => return Err(format!("'{}' is not a frequency with units", s)),
    };
    let value: u64 = num.parse().map_err(|_| format!("bad numeric part in '{}'", s))?;
    let mult: u64 = match unit.trim() {
        "Hz" => 1,
        "kHz" | "KHz" => 1_000,
        "MHz" => 1_000_000,
        "GHz" => 1_000_000_000,
        other => return Err(format!("unknown frequency unit '{}'", other)),
    };
    Ok(value * mult)
}
