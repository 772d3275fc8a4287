//! Demonstration of cross-tier promotion in tierlog.
//!
//! This example logs one critical event and then floods the chain with
//! debug noise far beyond the entry tier's capacity, showing that the
//! critical event is promoted tier by tier instead of aging out.
//!
//! Run with: `cargo run -p tierlog --example promotion_demo`

#![allow(missing_docs)]

use tierlog::{
    ChainSpec, EventChain, EventSchema, Importance, LogOptions, RecordSource, SliceReader,
    TierSpec,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut chain = EventChain::new(ChainSpec::new(
        vec![
            TierSpec { capacity: 512, ceiling: Importance::Debug },
            TierSpec { capacity: 512, ceiling: Importance::Info },
            TierSpec { capacity: 512, ceiling: Importance::Critical },
        ],
        Importance::Debug,
    )?)?;

    println!("=== tierlog promotion demo ===");
    println!();

    // One event we absolutely want to keep.
    let critical = EventSchema { source_id: 7, event_kind: 1, importance: Importance::Critical };
    let seq = chain.log_event(
        &critical,
        |w| w.write_all(b"power rail brownout"),
        &LogOptions { timestamp: Some(1_000) },
    )?;
    println!("logged critical event, sequence {seq}");

    // Then drown it in diagnostics: ~40x the entry tier's capacity.
    let debug = EventSchema { source_id: 7, event_kind: 2, importance: Importance::Debug };
    let mut ts = 1_001;
    for i in 0..1_000u32 {
        chain.log_event(
            &debug,
            |w| w.write_all(&i.to_le_bytes()),
            &LogOptions { timestamp: Some(ts) },
        )?;
        ts += 1;
    }
    println!(
        "logged 1000 debug events; {} aged out of the entry tier",
        chain.dropped_events(Importance::Debug)
    );
    println!();

    println!("tier usage:");
    for (i, stats) in chain.stats().iter().enumerate() {
        println!(
            "  tier {i}: ceiling={}, used={}/{} bytes, dropped={}",
            stats.ceiling, stats.used, stats.capacity, stats.dropped
        );
    }
    println!();

    // The critical event is still fetchable, with its original timestamp.
    let mut cursor = 0;
    let mut out = Vec::new();
    let copied = chain.fetch_events_since(Importance::Critical, &mut cursor, &mut out)?;
    println!("fetched {copied} critical event(s):");

    let mut reader = SliceReader::new(&out);
    while reader.remaining() > 0 {
        let env = tierlog::read_envelope(&mut reader)?;
        let mut payload = vec![0u8; env.payload_len];
        reader.read_exact(&mut payload)?;
        reader.skip(1)?;
        println!(
            "  seq={:?} source={} kind={} ts={} payload={:?}",
            env.sequence,
            env.source_id,
            env.event_kind,
            env.absolute_timestamp(0),
            String::from_utf8_lossy(&payload),
        );
    }

    assert_eq!(copied, 1);
    assert_eq!(chain.dropped_events(Importance::Critical), 0);
    println!();
    println!("the critical event survived the flood.");

    Ok(())
}
