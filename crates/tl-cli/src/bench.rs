use std::cmp::Ordering;
use std::time::Instant;

use tl_core::Matcher;

pub struct BenchOptions {
    pub requests: usize,
    pub iterations: usize,
    pub seed: u32,
}

struct BenchResult {
    ops: usize,
    total_ms: f64,
    avg_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    ops_per_sec: u64,
    matched_pct: f64,
}

const DEFAULT_PAGE: &str = "https://news.example.org/article/2024/05/story.html";

pub const DEFAULT_SEED: u32 = 0x7a11_5eed;

const P99_BUDGET_US: f64 = 50.0;

fn heading(rule: char, title: &str) {
    let line: String = std::iter::repeat(rule).take(60).collect();
    println!("{}\n{}\n{}", line, title, line);
}

pub fn run(matcher: &Matcher<'_>, opts: &BenchOptions) -> Result<(), String> {
    if opts.requests == 0 || opts.iterations == 0 {
        return Err("--requests and --iterations must be positive".to_string());
    }

    heading('=', "Classification Benchmark");

    let realistic = realistic_mix();
    let random = generate_requests(opts.requests, opts.seed);

    // Touch every table once before timing
    for url in &realistic {
        let _ = matcher.classify(url, DEFAULT_PAGE);
    }

    heading('-', &format!("Realistic mix: {} requests x {}", realistic.len(), opts.iterations));
    let mix = run_batch(matcher, &realistic, opts.iterations);
    println!("{}", format_result("Realistic Mix", &mix));

    heading('-', &format!("Random requests: {} requests x 10", random.len()));
    let rand = run_batch(matcher, &random, 10);
    println!("{}", format_result("Random Requests", &rand));

    heading('=', "Summary");
    let verdict = if mix.p99_us < P99_BUDGET_US { "ok" } else { "OVER BUDGET" };
    println!(
        "P99 over the realistic mix: {:.2}us (budget {:.0}us) {}",
        mix.p99_us, P99_BUDGET_US, verdict
    );

    Ok(())
}

fn run_batch(matcher: &Matcher<'_>, requests: &[String], iterations: usize) -> BenchResult {
    let mut latencies = Vec::with_capacity(requests.len() * iterations);
    let mut matched = 0usize;

    for _ in 0..iterations {
        for url in requests {
            let start = Instant::now();
            let hit = matcher.classify(url, DEFAULT_PAGE);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
            if hit.is_some() {
                matched += 1;
            }
        }
    }

    let ops = latencies.len();
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let total_us: f64 = latencies.iter().sum();
    let total_ms = total_us / 1000.0;

    BenchResult {
        ops,
        total_ms,
        avg_us: if ops == 0 { 0.0 } else { total_us / ops as f64 },
        p50_us: percentile(&latencies, 0.50),
        p95_us: percentile(&latencies, 0.95),
        p99_us: percentile(&latencies, 0.99),
        ops_per_sec: if total_ms > 0.0 { (ops as f64 / (total_ms / 1000.0)) as u64 } else { 0 },
        matched_pct: if ops > 0 { matched as f64 / ops as f64 * 100.0 } else { 0.0 },
    }
}

fn format_result(name: &str, result: &BenchResult) -> String {
    format!(
        "{}:\n  Ops: {}\n  Total: {:.2} ms\n  Avg: {:.2} us\n  P50: {:.2} us\n  P95: {:.2} us\n  P99: {:.2} us\n  Throughput: {} ops/sec\n  Matched: {:.1}%",
        name,
        result.ops,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
        result.matched_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

// =============================================================================
// Request Generation
// =============================================================================

fn realistic_mix() -> Vec<String> {
    [
        "https://www.google-analytics.com/analytics.js",
        "https://securepubads.g.doubleclick.net/tag/js/gpt.js",
        "https://connect.facebook.net/en_US/fbevents.js",
        "https://static.chartbeat.com/js/chartbeat.js",
        "https://news.example.org/assets/app.css",
        "https://cdn.jsdelivr.net/npm/jquery@3/dist/jquery.min.js",
        "https://pixel.quantserve.com/pixel/p-abc.gif?labels=news",
        "https://img.example-cdn.com/photos/2024/05/hero.jpg",
        "https://sb.scorecardresearch.com/beacon.js",
        "https://fonts.gstatic.com/s/roboto/v30/font.woff2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// xorshift32; deterministic per seed
fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed.max(1);
    move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        f64::from(state) / f64::from(u32::MAX)
    }
}

fn pick<'a>(items: &[&'a str], rand: &mut impl FnMut() -> f64) -> &'a str {
    let idx = (rand() * items.len() as f64).floor() as usize;
    items[idx.min(items.len() - 1)]
}

fn generate_requests(count: usize, seed: u32) -> Vec<String> {
    const HOSTS: &[&str] = &[
        "ads.adnet.example",
        "tracking.example.net",
        "cdn.example-static.com",
        "stats.doubleclick.net",
        "ssl.google-analytics.com",
        "api.example.org",
        "beacon.krxd.net",
        "images.example-cdn.com",
    ];
    const PATHS: &[&str] = &[
        "/",
        "/pixel.gif",
        "/collect",
        "/track/event",
        "/js/app.min.js",
        "/ads/banner.png",
        "/beacon/v2/hit",
        "/static/css/site.css",
    ];

    let mut rand = create_rng(seed);
    (0..count)
        .map(|i| {
            let host = pick(HOSTS, &mut rand);
            let path = pick(PATHS, &mut rand);
            format!("https://{}{}?r={}", host, path, i)
        })
        .collect()
}
