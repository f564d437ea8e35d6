//! Registers Prometheus metrics for the `/metrics` surface (C9, ambient).
//!
//! `lazy_static` ensures every metric is registered exactly once for the
//! process lifetime, matching the pattern this codebase already uses for its
//! own server-wide counters.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, TextEncoder, register_counter, register_gauge};

lazy_static! {
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("minicdn_cache_hits_total", "Total number of cache hits.").unwrap();
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("minicdn_cache_misses_total", "Total number of cache misses.").unwrap();
    pub static ref ACTIVE_DOWNLOADS: Gauge =
        register_gauge!("minicdn_active_downloads", "Number of in-flight origin downloads.").unwrap();
    pub static ref PEER_COUNT: Gauge =
        register_gauge!("minicdn_peer_count", "Number of peers currently in the roster.").unwrap();
    pub static ref REQUESTS_TOTAL: Counter =
        register_counter!("minicdn_requests_total", "Total number of client GET requests handled.").unwrap();
}

/// Renders all registered metrics in Prometheus text exposition format.
pub fn gather() -> String {
    let families = prometheus::gather();
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&families).unwrap_or_default()
}
