use parla_core::DirectoryRecord;
use parla_search::{MatchIndex, SearchOptions};

fn gen(n: usize) -> Vec<DirectoryRecord> {
    (0..n)
        .map(|i| {
            let name = format!("cliente {:02}-{i}", i % 19);
            DirectoryRecord::new(format!("u-{i}"), name)
                .with_tokens([format!("+55 11 9{:04}-{:04}", i % 10_000, (i * 3) % 10_000)])
                .with_channel_live(i % 4 == 0)
        })
        .collect()
}

fn ids(records: &[DirectoryRecord]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

#[test]
fn concatenated_pages_reproduce_the_full_list() {
    let recs = gen(57);
    let idx = MatchIndex::new();
    let full = idx.search(
        &recs,
        "cliente",
        &SearchOptions { limit: Some(1_000), ..Default::default() },
    );
    assert_eq!(full.total_count, 57);
    assert!(!full.has_more);

    for page in [1usize, 3, 10, 57, 64] {
        let mut collected: Vec<String> = Vec::new();
        let mut offset = 0usize;
        loop {
            let out = idx.search(
                &recs,
                "cliente",
                &SearchOptions { offset, limit: Some(page), ..Default::default() },
            );
            collected.extend(ids(&out.records));
            if !out.has_more {
                break;
            }
            offset += page;
        }
        assert_eq!(collected, ids(&full.records), "page size {page}");
    }
}

#[test]
fn next_offset_chain_walks_every_record_once() {
    let recs = gen(23);
    let idx = MatchIndex::new();
    let limit = 5usize;

    let mut seen: Vec<String> = Vec::new();
    let mut offset = Some(0usize);
    let mut hops = 0;
    while let Some(at) = offset {
        let out = idx.search(
            &recs,
            "cliente",
            &SearchOptions { offset: at, limit: Some(limit), ..Default::default() },
        );
        seen.extend(ids(&out.records));
        offset = out.next_offset;
        hops += 1;
        assert!(hops <= 6, "chain must terminate");
    }
    assert_eq!(hops, 5);
    assert_eq!(seen.len(), 23);
    let mut dedup = seen.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(dedup.len(), 23, "no duplicates across pages");
}

#[test]
fn exclusion_applies_before_the_offset_bookkeeping() {
    let recs = gen(12);
    let idx = MatchIndex::new();
    let excluded = "u-3";

    let mut collected: Vec<String> = Vec::new();
    let mut offset = 0usize;
    loop {
        let out = idx.search(
            &recs,
            "cliente",
            &SearchOptions {
                offset,
                limit: Some(4),
                exclude_id: Some(excluded.to_string()),
                ..Default::default()
            },
        );
        assert!(out.records.iter().all(|r| r.id != excluded));
        collected.extend(ids(&out.records));
        if !out.has_more {
            break;
        }
        offset += 4;
    }
    assert_eq!(collected.len(), 11);
}
