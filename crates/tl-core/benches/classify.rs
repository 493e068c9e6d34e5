//! Benchmarks for request classification.
//!
//! The synthetic rule set is shaped like a production tracker list: a few
//! thousand host patterns, a smaller host+path table and short path and
//! regex lists that are only reached when the tries miss.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::{json, Map, Value};
use tl_core::RuleDatabase;

const HOSTS: u32 = 5_000;

fn build_document() -> Vec<u8> {
    let mut apps = Map::new();
    let mut bugs = Map::new();
    let mut com = Map::new();
    let mut net = Map::new();

    for i in 0..HOSTS {
        apps.insert(i.to_string(), json!({ "name": format!("Vendor {i}"), "cat": "advertising" }));
        bugs.insert(i.to_string(), json!({ "aid": i }));
        let tld = if i % 2 == 0 { &mut com } else { &mut net };
        tld.insert(format!("tracker{i}"), json!({ "$": i }));
    }

    let mut paths = Map::new();
    for i in 0..50 {
        paths.insert(format!("/beacon{i}/"), json!(i));
    }

    let mut regexes = Map::new();
    for i in 0..20 {
        regexes.insert(i.to_string(), Value::String(format!(r"collect{i}\.php")));
    }

    let doc = json!({
        "version": 1,
        "apps": apps,
        "bugs": bugs,
        "patterns": {
            "host": { "com": com, "net": net },
            "host_path": {
                "com": { "cdn": { "$": [ { "path": "ads/", "id": 1 }, { "path": "px/", "id": 2 } ] } }
            },
            "path": paths,
            "regex": regexes,
        }
    });

    serde_json::to_vec(&doc).unwrap()
}

fn bench_classify(c: &mut Criterion) {
    let data = build_document();
    let db = RuleDatabase::load(&data).unwrap();
    let matcher = db.matcher("ghostery.com");
    let page = "https://news.example.org/article/1";

    let requests = [
        "https://ads.tracker42.com/pixel.gif?uid=1",
        "https://static.tracker4243.net/lib.js",
        "https://cdn.com/ads/banner.js",
        "https://img.example.org/logo.png",
        "https://unknown.io/beacon7/hit",
        "https://unknown.io/collect19.php",
        "https://unknown.io/assets/app.css",
    ];

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(requests.len() as u64));
    group.bench_function("mixed", |b| {
        b.iter(|| {
            for url in &requests {
                black_box(matcher.classify(black_box(url), page));
            }
        })
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(matcher.classify(black_box("https://unknown.io/assets/app.css"), page)))
    });
    group.finish();

    c.bench_function("load_document", |b| {
        b.iter(|| RuleDatabase::load(black_box(&data)).unwrap())
    });
}

criterion_group!(benches, bench_classify);
criterion_main!(benches);
