use parla_core::DirectoryRecord;
use parla_search::{MatchIndex, SearchOptions};
use std::time::Instant;

fn gen_record(i: usize) -> DirectoryRecord {
    let name = format!("cliente {i:06}");
    let phone = format!("+55 11 9{:04}-{:04}", i % 10_000, (i * 7) % 10_000);
    let jid = format!("5511{:09}@s.whatsapp.net", i);
    DirectoryRecord::new(format!("u-{i}"), name)
        .with_tokens([format!("u-{i}"), phone, jid])
        .with_channel_live(i % 3 == 0)
}

fn gen_collection(n: usize) -> Vec<DirectoryRecord> {
    (0..n).map(gen_record).collect()
}

fn percentile_us(xs: &mut [u128], p: f64) -> u128 {
    xs.sort_unstable();
    let idx = ((xs.len() as f64 - 1.0) * p).round() as usize;
    xs[idx]
}

fn main() {
    let n: usize = std::env::var("PARLA_BENCH_DOCS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);
    let limit: usize = std::env::var("PARLA_BENCH_LIMIT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);

    eprintln!("building collection: {} records", n);
    let t0 = Instant::now();
    let records = gen_collection(n);
    let build_coll_ms = t0.elapsed().as_secs_f64() * 1_000.0;

    eprintln!("building sorted view...");
    let index = MatchIndex::new();
    let t1 = Instant::now();
    let _ = index.sorted(&records);
    let build_view_ms = t1.elapsed().as_secs_f64() * 1_000.0;

    // Warm queries against the cached view
    let mut name_queries: Vec<String> = Vec::new();
    for step in (0..n).step_by(n.saturating_div(200).max(1)) {
        name_queries.push(format!("cliente {:04}", step % 10_000));
    }
    let mut digit_queries: Vec<String> = Vec::new();
    for v in 0..200 {
        digit_queries.push(format!("11 9{:04}", (v * 37) % 10_000));
    }
    let empty_queries = vec![String::new(); 50];

    let opts = SearchOptions { max_results: limit, ..Default::default() };

    let mut run = |label: &str, qs: &[String]| {
        let mut times: Vec<u128> = Vec::with_capacity(qs.len());
        for q in qs {
            let t = Instant::now();
            let _ = index.search(&records, q, &opts);
            times.push(t.elapsed().as_micros());
        }
        let p50 = percentile_us(&mut times.clone(), 0.50) as f64 / 1000.0;
        let p99 = percentile_us(&mut times, 0.99) as f64 / 1000.0;
        println!(
            "{}: p50={:.3}ms p99={:.3}ms ({} queries, limit={})",
            label,
            p50,
            p99,
            qs.len(),
            limit
        );
    };

    println!(
        "view_build: collection={:.1}ms view={:.1}ms docs={}",
        build_coll_ms, build_view_ms, n
    );
    run("name", &name_queries);
    run("digits", &digit_queries);
    run("default_list", &empty_queries);
}
