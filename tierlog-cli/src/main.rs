//! CLI for the tierlog event-log storage engine.
//!
//! Provides commands for simulating workloads against a tier chain and
//! benchmarking the log path.

use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use tierlog::{
    ChainSpec, EventChain, EventSchema, Importance, LogOptions, RecordSource, SliceReader,
    TierSpec,
};

/// tierlog — Embedded priority-tiered event-log storage engine CLI.
#[derive(Parser)]
#[command(name = "tierlog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a mixed-importance workload and display per-tier usage.
    Simulate {
        /// Number of events to log.
        #[arg(long, default_value = "10000")]
        events: u64,

        /// Capacity in bytes of each tier (entry tier first).
        #[arg(long, value_delimiter = ',', default_value = "4096,2048,1024")]
        capacities: Vec<usize>,

        /// Payload size in bytes.
        #[arg(long, default_value = "32")]
        payload: usize,

        /// Log one Info event every N events.
        #[arg(long, default_value = "10")]
        info_every: u64,

        /// Log one Critical event every N events.
        #[arg(long, default_value = "100")]
        critical_every: u64,

        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Run a log-path microbenchmark.
    Bench {
        /// Number of events to log.
        #[arg(long, default_value = "10000000")]
        events: u64,

        /// Payload size in bytes.
        #[arg(long, default_value = "32")]
        payload: usize,

        /// Capacity in bytes of the single tier.
        #[arg(long, default_value = "65536")]
        capacity: usize,
    },
}

/// Output format for simulation results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable table.
    Table,
    /// JSON object.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            events,
            capacities,
            payload,
            info_every,
            critical_every,
            format,
        } => cmd_simulate(events, &capacities, payload, info_every, critical_every, &format),
        Commands::Bench { events, payload, capacity } => cmd_bench(events, payload, capacity),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Builds a chain whose ceilings ascend Debug → Info → Critical across
/// however many capacities were given.
fn build_chain(capacities: &[usize]) -> Result<EventChain, Box<dyn std::error::Error>> {
    let ceilings = match capacities.len() {
        1 => vec![Importance::Critical],
        2 => vec![Importance::Debug, Importance::Critical],
        3 => vec![Importance::Debug, Importance::Info, Importance::Critical],
        n => return Err(format!("expected 1 to 3 tier capacities, got {n}").into()),
    };
    let tiers = capacities
        .iter()
        .zip(ceilings)
        .map(|(&capacity, ceiling)| TierSpec { capacity, ceiling })
        .collect();
    Ok(EventChain::new(ChainSpec::new(tiers, Importance::Debug)?)?)
}

/// Implements `tierlog simulate`.
fn cmd_simulate(
    events: u64,
    capacities: &[usize],
    payload_len: usize,
    info_every: u64,
    critical_every: u64,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut chain = build_chain(capacities)?;
    let payload = vec![0x5Au8; payload_len];

    let base_time = 1_700_000_000_000u64;
    for i in 0..events {
        let importance = if critical_every > 0 && i % critical_every == 0 {
            Importance::Critical
        } else if info_every > 0 && i % info_every == 0 {
            Importance::Info
        } else {
            Importance::Debug
        };
        let schema = EventSchema { source_id: 1, event_kind: 1, importance };
        chain.log_event(
            &schema,
            |w| w.write_all(&payload),
            &LogOptions { timestamp: Some(base_time + i * 10) },
        )?;
    }

    tracing::info!(events, overflow_drops = chain.overflow_drops(), "workload complete");

    // Drain each band fully to count what actually survived.
    let mut retained = Vec::new();
    for importance in [Importance::Debug, Importance::Info, Importance::Critical] {
        let mut cursor = 0;
        let mut out = Vec::new();
        let copied = chain.fetch_events_since(importance, &mut cursor, &mut out)?;
        retained.push((importance, copied, verify_batch(&out)?));
    }

    match format {
        OutputFormat::Table => {
            println!("Logged {events} events ({payload_len}B payloads)");
            println!();
            println!("Tiers:");
            for (i, stats) in chain.stats().iter().enumerate() {
                println!(
                    "  Tier {i}: ceiling={}, used={}/{} bytes, sequences {}..={}, dropped={}",
                    stats.ceiling,
                    stats.used,
                    stats.capacity,
                    stats.first_sequence,
                    stats.last_sequence,
                    stats.dropped,
                );
            }
            println!();
            println!("Retained per band:");
            for (importance, copied, bytes) in &retained {
                println!("  {importance}: {copied} events ({bytes} bytes fetched)");
            }
            println!();
            println!("Bytes written: {}", chain.bytes_written());
        }
        OutputFormat::Json => {
            let bands: Vec<serde_json::Value> = retained
                .iter()
                .map(|(importance, copied, bytes)| {
                    serde_json::json!({
                        "importance": importance.to_string(),
                        "retained": copied,
                        "fetched_bytes": bytes,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "events": events,
                "payload_len": payload_len,
                "tiers": chain.stats(),
                "bands": bands,
                "bytes_written": chain.bytes_written(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `tierlog bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(
    events: u64,
    payload_len: usize,
    capacity: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("tierlog log-path benchmark");
    println!("  Events: {events}");
    println!("  Payload: {payload_len} bytes");
    println!("  Tier capacity: {capacity} bytes");
    println!();

    let mut chain = build_chain(&[capacity])?;
    let schema = EventSchema { source_id: 1, event_kind: 1, importance: Importance::Critical };
    let payload = vec![0xA5u8; payload_len];

    println!("Logging {events} events...");

    let base_time = 1_700_000_000_000u64;
    let start = Instant::now();
    for i in 0..events {
        chain.log_event(
            &schema,
            |w| w.write_all(&payload),
            &LogOptions { timestamp: Some(base_time + i) },
        )?;
    }
    let elapsed = start.elapsed();

    let ns_per_event = elapsed.as_nanos() as f64 / events as f64;
    let events_per_sec = events as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_event:.1} ns/event");
    println!("  Throughput: {events_per_sec:.0} events/sec");
    println!("  Bytes written: {}", chain.bytes_written());
    println!("  Dropped (aged out): {}", chain.dropped_events(Importance::Critical));

    Ok(())
}

/// Decodes a fetched batch end to end, returning its byte length.
///
/// This doubles as a consistency check: a batch the engine produced must
/// always decode cleanly.
fn verify_batch(bytes: &[u8]) -> Result<usize, Box<dyn std::error::Error>> {
    let mut reader = SliceReader::new(bytes);
    while reader.remaining() > 0 {
        let env = tierlog::read_envelope(&mut reader)?;
        reader.skip(env.payload_len + 1)?;
    }
    Ok(bytes.len())
}
