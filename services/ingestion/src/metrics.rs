use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

static LATENCY_BUCKETS_MS: &[u64] = &[5, 10, 25, 50, 100, 200, 400, 800, 1500, 3000, 5000, 10000];

#[derive(Default, Debug, Clone)]
pub struct Histogram {
    pub buckets: Vec<u64>,
    pub counts: Vec<u64>,
    pub sum: u128,
    pub total: u64,
}

impl Histogram {
    pub fn new(buckets: &[u64]) -> Self {
        Self { buckets: buckets.to_vec(), counts: vec![0; buckets.len() + 1], sum: 0, total: 0 }
    }

    pub fn record(&mut self, v_ms: u64) {
        self.total += 1;
        self.sum += v_ms as u128;
        for (i, b) in self.buckets.iter().enumerate() {
            if v_ms <= *b {
                self.counts[i] += 1;
                return;
            }
        }
        *self.counts.last_mut().unwrap() += 1;
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "buckets": self.buckets, "counts": self.counts, "sum_ms": self.sum, "total": self.total })
    }
}

pub static LISTING_LATENCY: Lazy<Mutex<Histogram>> = Lazy::new(|| Mutex::new(Histogram::new(LATENCY_BUCKETS_MS)));
pub static IMAGE_LATENCY: Lazy<Mutex<Histogram>> = Lazy::new(|| Mutex::new(Histogram::new(LATENCY_BUCKETS_MS)));

pub static CACHE_HITS: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));
pub static CACHE_MISSES: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));
pub static LISTINGS_INGESTED: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));
pub static LISTINGS_FAILED: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));
pub static IMAGES_FAILED: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

pub fn record_listing_latency(ms: u64) {
    if let Ok(mut h) = LISTING_LATENCY.lock() {
        h.record(ms);
    }
}
pub fn record_image_latency(ms: u64) {
    if let Ok(mut h) = IMAGE_LATENCY.lock() {
        h.record(ms);
    }
}
pub fn record_cache_hit() {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cache_miss() {
    CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_listing_ingested() {
    LISTINGS_INGESTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_listing_failed() {
    LISTINGS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_image_failed() {
    IMAGES_FAILED.fetch_add(1, Ordering::Relaxed);
}

/// Exposed at `/metrics` (§A3); carries the cache cost/access accounting
/// from §3.4 as running totals alongside per-listing/per-image latency,
/// per §A4 (cache-cost counters are operational, not the out-of-scope
/// search-quality analytics sink).
pub fn export_metrics_json(cost_total: f64, cost_saved: f64) -> serde_json::Value {
    serde_json::json!({
        "listings_ingested": LISTINGS_INGESTED.load(Ordering::Relaxed),
        "listings_failed": LISTINGS_FAILED.load(Ordering::Relaxed),
        "images_failed": IMAGES_FAILED.load(Ordering::Relaxed),
        "listing_latency_ms": LISTING_LATENCY.lock().ok().map(|h| h.to_json()),
        "image_latency_ms": IMAGE_LATENCY.lock().ok().map(|h| h.to_json()),
        "embedding_cache": {
            "hits": CACHE_HITS.load(Ordering::Relaxed),
            "misses": CACHE_MISSES.load(Ordering::Relaxed),
            "cost_total": cost_total,
            "cost_saved": cost_saved,
        }
    })
}
