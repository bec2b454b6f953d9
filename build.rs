use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    page_size: Option<usize>,
    cache_ceiling: Option<usize>,
    max_span_pages: Option<usize>,
    batch_cap: Option<usize>,
    batch_floor: Option<usize>,
    transfer_multiplier: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    page_size: usize,
    page_shift: u32,
    cache_ceiling: usize,
    max_span_pages: usize,
    batch_cap: usize,
    batch_floor: usize,
    transfer_multiplier: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let page_size = cfg.page_size.unwrap_or(8192);
    assert!(
        page_size.is_power_of_two(),
        "page_size ({}) must be a power of 2",
        page_size
    );
    assert!(
        page_size >= 4096,
        "page_size ({}) must be >= 4096",
        page_size
    );

    let cache_ceiling = cfg.cache_ceiling.unwrap_or(256 * 1024);
    // The size-class brackets top out in 8 KiB steps above 64 KiB, so the
    // ceiling must land on a bracket boundary.
    assert!(
        cache_ceiling % 8192 == 0 && cache_ceiling > 65536,
        "cache_ceiling ({}) must be a multiple of 8192 and > 65536",
        cache_ceiling
    );

    let max_span_pages = cfg.max_span_pages.unwrap_or(129);
    assert!(max_span_pages >= 2, "max_span_pages must be >= 2");

    let batch_cap = cfg.batch_cap.unwrap_or(512);
    let batch_floor = cfg.batch_floor.unwrap_or(2);
    assert!(
        batch_floor >= 1 && batch_cap >= batch_floor,
        "batch clamp invalid: floor {} cap {}",
        batch_floor,
        batch_cap
    );

    // The largest span the central cache ever asks for is
    // batch_floor * cache_ceiling worth of pages; it must fit in one span.
    let worst_fetch = (batch_floor * cache_ceiling) / page_size;
    assert!(
        worst_fetch < max_span_pages,
        "max_span_pages ({}) too small for cache_ceiling {} (need > {})",
        max_span_pages,
        cache_ceiling,
        worst_fetch
    );

    let transfer_multiplier = cfg.transfer_multiplier.unwrap_or(4);
    assert!(transfer_multiplier >= 1, "transfer_multiplier must be >= 1");

    ResolvedConfig {
        page_size,
        page_shift: page_size.trailing_zeros(),
        cache_ceiling,
        max_span_pages,
        batch_cap,
        batch_floor,
        transfer_multiplier,
    }
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const MAX_BYTES: usize = {};\n\
         pub const MAX_SPAN_PAGES: usize = {};\n\
         pub const BATCH_CAP: usize = {};\n\
         pub const BATCH_FLOOR: usize = {};\n\
         pub const TRANSFER_MULTIPLIER: usize = {};\n",
        cfg.page_shift,
        cfg.page_size,
        cfg.cache_ceiling,
        cfg.max_span_pages,
        cfg.batch_cap,
        cfg.batch_floor,
        cfg.transfer_multiplier,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/hcmalloc.toml", manifest_dir)
}

fn main() {
    println!("cargo:rerun-if-env-changed=HCMALLOC_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("HCMALLOC_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");
    let resolved = resolve_config(&config.config);

    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
