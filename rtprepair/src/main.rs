mod stream;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info, info_span, warn};

use rtprepair_core::{logging, Config, LossTracker, PacketOutcome};

use stream::LossyStream;

#[derive(Parser, Debug)]
#[command(name = "rtprepair")]
#[command(about = "Replay a lossy RTP sequence stream through the gap tracker", long_about = None)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, env = "RTPREPAIR_CONFIG")]
    config: Option<String>,

    /// Packets to generate
    #[arg(long)]
    packets: Option<u64>,

    /// Probability that a packet is lost
    #[arg(long)]
    loss_rate: Option<f64>,

    /// Probability that a lost packet is retransmitted
    #[arg(long)]
    repair_rate: Option<f64>,

    /// Random seed for the generated stream
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the outstanding gaps before draining them
    #[arg(long)]
    dump: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(packets) = self.packets {
            config.simulation.packets = packets;
        }
        if let Some(loss_rate) = self.loss_rate {
            config.simulation.loss_rate = loss_rate;
        }
        if let Some(repair_rate) = self.repair_rate {
            config.simulation.repair_rate = repair_rate;
        }
        if let Some(seed) = self.seed {
            config.simulation.seed = seed;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(
        packets = config.simulation.packets,
        loss_rate = config.simulation.loss_rate,
        seed = config.simulation.seed,
        pool_capacity = config.gaps.pool_capacity,
        "rtprepair replay starting"
    );

    // 3. Replay the stream
    let mut tracker = LossTracker::new(&config.gaps, config.tracker)?;
    let mut stream = LossyStream::new(&config.simulation);

    {
        let _replay = info_span!("replay", seed = config.simulation.seed).entered();
        for seq in stream.by_ref() {
            match tracker.on_packet(seq) {
                Ok(PacketOutcome::Loss { missing }) => debug!(seq, missing, "loss detected"),
                Ok(PacketOutcome::Restarted) => warn!(seq, "tracking restarted"),
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(seq, error = %e, "gap tracking failed");
                    return Err(e.into());
                }
                Err(e) => warn!(seq, error = %e, "packet not recorded"),
            }
        }
    }

    let stats = tracker.stats();
    info!(
        dropped = stream.lost(),
        repaired = stats.repaired,
        outstanding = stats.outstanding_seqs,
        "replay finished"
    );

    if args.dump {
        tracker.print_gaps(|line| println!("{line}"));
    }

    // 4. Drain what is still missing into repair requests
    let _drain = info_span!("drain", batch = config.simulation.drain_batch).entered();
    let mut requests = 0usize;
    loop {
        let batch = tracker.drain(config.simulation.drain_batch);
        if batch.is_empty() {
            break;
        }
        requests += 1;
        let ranges: Vec<String> = batch.iter().map(ToString::to_string).collect();
        info!(request = requests, gaps = batch.len(), ranges = %ranges.join(" "), "repair request");
    }
    info!(requests, "gap set drained");

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
