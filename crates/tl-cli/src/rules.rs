use std::fs;
use std::path::Path;
use std::time::Instant;

use tl_core::RuleDatabase;
use tl_loader::{DocumentCache, FileStore};

/// A parsed rule document and where it came from.
pub struct LoadedRules {
    pub db: RuleDatabase,
    pub origin: String,
    pub size: usize,
    pub parse_ms: f64,
}

/// Load rules from `input`, or from the cached document in `cache_dir` when
/// no input is given.
pub fn load_rules(input: Option<&str>, cache_dir: &Path) -> Result<LoadedRules, String> {
    let (data, origin) = match input {
        Some(path) => {
            let data = fs::read(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
            (data, path.to_string())
        }
        None => {
            let store = FileStore::new(cache_dir);
            let cached = store
                .load_cached_document()
                .map_err(|e| format!("Failed to read cache: {}", e))?
                .ok_or_else(|| {
                    format!(
                        "No cached rule document in '{}' (run `refresh` or pass --input)",
                        cache_dir.display()
                    )
                })?;
            (cached.data, format!("{} (cached v{})", cache_dir.display(), cached.version))
        }
    };

    let start = Instant::now();
    let db = RuleDatabase::load(&data).map_err(|e| format!("Invalid rule document: {}", e))?;
    let parse_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(LoadedRules {
        db,
        origin,
        size: data.len(),
        parse_ms,
    })
}

pub fn print_summary(rules: &LoadedRules, verbose: bool) {
    let stats = rules.db.stats();

    println!("Rules: {}", rules.origin);
    println!("  Version:     {}", rules.db.version());
    println!("  Size:        {} bytes ({:.1} KB)", rules.size, rules.size as f64 / 1024.0);
    println!("  Parse time:  {:.1}ms", rules.parse_ms);
    println!();
    println!("Tables:");
    println!("  Apps:        {}", stats.apps);
    println!("  Bugs:        {}", stats.bugs);
    println!("  Host:        {}", stats.host_patterns);
    println!("  Host+path:   {}", stats.host_path_patterns);
    println!("  Path:        {}", stats.path_patterns);
    println!("  Regex:       {}", stats.regex_patterns);
    println!();
    println!("Load issues:");
    println!("  Skipped:     {}", stats.skipped_count());
    println!("  Conflicts:   {}", stats.conflicts);

    if verbose {
        for skipped in &stats.skipped {
            println!("    {}", skipped);
        }
    }
}
