use std::path::PathBuf;

use clap::Parser;
use gluon::sim::top::{SimTop, TopConfig};

#[derive(Parser)]
#[command(version, about)]
struct GluonArgs {
    /// toml configuration file; defaults apply when omitted
    config_path: Option<PathBuf>,

    #[arg(long)]
    cycles: Option<u64>,
    #[arg(long)]
    num_cores: Option<usize>,
    #[arg(long)]
    instr_per_task: Option<u32>,
}

pub fn main() {
    env_logger::init();
    let argv = GluonArgs::parse();

    let mut config = match &argv.config_path {
        Some(path) => TopConfig::load(path),
        None => {
            let mut c = TopConfig::default();
            c.directory.addr_range_end = 1 << 24;
            c
        }
    };

    config.sim.cycles = argv.cycles.unwrap_or(config.sim.cycles);
    config.node.num_cores = argv.num_cores.unwrap_or(config.node.num_cores);
    config.node.instr_per_task = argv.instr_per_task.unwrap_or(config.node.instr_per_task);

    let mut top = SimTop::new(&config);
    top.run(config.sim.cycles);

    println!("# cycles simulated: {}", top.cycle);
    print!("{}", top.stats_report());
}
