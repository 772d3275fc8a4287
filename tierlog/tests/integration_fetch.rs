//! Integration tests for fetching and paged delivery.
//!
//! These tests exercise `fetch_events_since` against fixed-size
//! destinations: pagination, cursor resumption, idempotence, and external
//! decoding of the self-contained output stream.

use tierlog::{
    ChainSpec, EventChain, EventSchema, Importance, LogOptions, RecordSource, SliceReader,
    SliceSink, TierSpec,
};

fn three_tier_spec() -> ChainSpec {
    ChainSpec {
        tiers: vec![
            TierSpec { capacity: 256, ceiling: Importance::Debug },
            TierSpec { capacity: 256, ceiling: Importance::Info },
            TierSpec { capacity: 256, ceiling: Importance::Critical },
        ],
        retention: Importance::Debug,
    }
}

/// Logs five Info events with 4-byte payloads at 100ms intervals.
fn chain_with_five_info_events() -> EventChain {
    let mut chain = EventChain::new(three_tier_spec()).unwrap();
    let schema = EventSchema { source_id: 3, event_kind: 9, importance: Importance::Info };
    for i in 0..5u64 {
        let seq = chain
            .log_event(
                &schema,
                |w| w.write_all(&u32::try_from(i).unwrap().to_le_bytes()),
                &LogOptions { timestamp: Some(1_000 + i * 100) },
            )
            .unwrap();
        assert_eq!(seq, i + 1);
    }
    chain
}

/// Decodes a fetched batch into (sequence, absolute timestamp) pairs.
fn decode_batch(bytes: &[u8]) -> Vec<(Option<u64>, u64)> {
    let mut reader = SliceReader::new(bytes);
    let mut decoded = Vec::new();
    let mut prev_ts = 0;
    while reader.remaining() > 0 {
        let env = tierlog::read_envelope(&mut reader).unwrap();
        reader.skip(env.payload_len + 1).unwrap();
        let ts = env.absolute_timestamp(prev_ts);
        decoded.push((env.sequence, ts));
        prev_ts = ts;
    }
    decoded
}

#[test]
fn test_small_destination_paginates() {
    // A destination holding 2 of the 5 available records: each call
    // returns exactly what fits and the cursor resumes at the next record.
    let chain = chain_with_five_info_events();
    let mut cursor = 0;
    let mut buf = [0u8; 48];

    let mut sink = SliceSink::new(&mut buf);
    let copied = chain
        .fetch_events_since(Importance::Info, &mut cursor, &mut sink)
        .unwrap();
    assert_eq!(copied, 2);
    assert_eq!(cursor, 3);
    assert_eq!(
        decode_batch(sink.bytes()),
        vec![(Some(1), 1_000), (None, 1_100)]
    );

    let mut sink = SliceSink::new(&mut buf);
    let copied = chain
        .fetch_events_since(Importance::Info, &mut cursor, &mut sink)
        .unwrap();
    assert_eq!(copied, 2);
    assert_eq!(cursor, 5);
    // The resumed page restarts its own delta chain.
    assert_eq!(
        decode_batch(sink.bytes()),
        vec![(Some(3), 1_200), (None, 1_300)]
    );

    let mut sink = SliceSink::new(&mut buf);
    let copied = chain
        .fetch_events_since(Importance::Info, &mut cursor, &mut sink)
        .unwrap();
    assert_eq!(copied, 1);
    assert_eq!(cursor, 6);
    assert_eq!(decode_batch(sink.bytes()), vec![(Some(5), 1_400)]);

    // Nothing left: the cursor stays put.
    let mut sink = SliceSink::new(&mut buf);
    let copied = chain
        .fetch_events_since(Importance::Info, &mut cursor, &mut sink)
        .unwrap();
    assert_eq!(copied, 0);
    assert_eq!(cursor, 6);
    assert_eq!(sink.written(), 0);
}

#[test]
fn test_fetch_is_idempotent() {
    let chain = chain_with_five_info_events();

    let mut first = Vec::new();
    let mut cursor_a = 0;
    chain
        .fetch_events_since(Importance::Info, &mut cursor_a, &mut first)
        .unwrap();

    let mut second = Vec::new();
    let mut cursor_b = 0;
    chain
        .fetch_events_since(Importance::Info, &mut cursor_b, &mut second)
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(cursor_a, cursor_b);
}

#[test]
fn test_fetch_from_middle_restamps_first_record() {
    // Starting mid-stream, the first copied record must be absolute and
    // carry its own sequence so the page is self-contained.
    let chain = chain_with_five_info_events();
    let mut cursor = 4;
    let mut out = Vec::new();
    let copied = chain
        .fetch_events_since(Importance::Info, &mut cursor, &mut out)
        .unwrap();
    assert_eq!(copied, 2);
    assert_eq!(cursor, 6);
    assert_eq!(
        decode_batch(&out),
        vec![(Some(4), 1_300), (None, 1_400)]
    );
}

#[test]
fn test_fetch_filters_other_bands() {
    // Debug and Critical traffic interleaved with the Info stream must
    // not appear in an Info fetch, nor consume Info sequence numbers.
    let mut chain = EventChain::new(three_tier_spec()).unwrap();
    for i in 0..4u64 {
        for importance in [Importance::Debug, Importance::Info, Importance::Critical] {
            let schema = EventSchema { source_id: 1, event_kind: 1, importance };
            chain
                .log_event(
                    &schema,
                    |w| w.write_all(b"pl"),
                    &LogOptions { timestamp: Some(100 + i) },
                )
                .unwrap();
        }
    }

    let mut cursor = 0;
    let mut out = Vec::new();
    let copied = chain
        .fetch_events_since(Importance::Info, &mut cursor, &mut out)
        .unwrap();
    assert_eq!(copied, 4);
    assert_eq!(cursor, 5);
    for (i, (seq, _)) in decode_batch(&out).iter().enumerate() {
        // Only the first record is stamped; the rest follow implicitly.
        assert_eq!(*seq, if i == 0 { Some(1) } else { None });
    }
}

#[test]
fn test_fetch_sees_promoted_and_resident_records_in_order() {
    // Push enough Critical events that some get promoted out of the entry
    // tier while newer ones still sit in it: a fetch must return all of
    // them, globally oldest first.
    let mut chain = EventChain::new(three_tier_spec()).unwrap();
    let critical = EventSchema { source_id: 2, event_kind: 5, importance: Importance::Critical };
    let debug = EventSchema { source_id: 2, event_kind: 6, importance: Importance::Debug };

    let mut ts = 0;
    for _ in 0..6u64 {
        chain
            .log_event(&critical, |w| w.write_all(b"crit"), &LogOptions { timestamp: Some(ts) })
            .unwrap();
        ts += 1;
        for _ in 0..10 {
            chain
                .log_event(&debug, |w| w.write_all(b"dbg"), &LogOptions { timestamp: Some(ts) })
                .unwrap();
            ts += 1;
        }
    }

    let mut cursor = 0;
    let mut out = Vec::new();
    let copied = chain
        .fetch_events_since(Importance::Critical, &mut cursor, &mut out)
        .unwrap();
    assert_eq!(copied, 6);
    assert_eq!(cursor, 7);

    let decoded = decode_batch(&out);
    assert_eq!(decoded[0].0, Some(1));
    let timestamps: Vec<u64> = decoded.iter().map(|(_, ts)| *ts).collect();
    let mut sorted = timestamps.clone();
    sorted.sort_unstable();
    assert_eq!(timestamps, sorted);
}

#[test]
fn test_empty_chain_fetch_is_zero() {
    let chain = EventChain::new(three_tier_spec()).unwrap();
    let mut cursor = 0;
    let mut out = Vec::new();
    assert_eq!(
        chain.fetch_events_since(Importance::Debug, &mut cursor, &mut out).unwrap(),
        0
    );
    assert_eq!(cursor, 0);
    assert!(out.is_empty());
}
