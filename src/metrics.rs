//! Per-source latency histograms. The registry is passed in explicitly
//! so tests and embedders get their own; nothing registers globally.

use dashmap::DashMap;
use prometheus::{HistogramOpts, HistogramVec, Registry};
use std::time::Duration;

#[derive(Default)]
struct MeanState {
    count: u64,
    sum_secs: f64,
}

pub struct SourceMetrics {
    latency: HistogramVec,
    latency_abs_diff: HistogramVec,
    per_original_megapixel: HistogramVec,
    per_resized_megapixel: HistogramVec,
    means: DashMap<String, MeanState>,
}

impl SourceMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<SourceMetrics> {
        let latency = HistogramVec::new(
            HistogramOpts::new("source_latency", "Latency of source resolutions"),
            &["source"],
        )?;
        let latency_abs_diff = HistogramVec::new(
            HistogramOpts::new(
                "source_latency_abs_diff",
                "Absolute difference from the source's running mean latency",
            ),
            &["source"],
        )?;
        let per_original_megapixel = HistogramVec::new(
            HistogramOpts::new(
                "source_per_original_megapixel_latency",
                "Decode latency per original megapixel",
            ),
            &["source"],
        )?;
        let per_resized_megapixel = HistogramVec::new(
            HistogramOpts::new(
                "source_per_resized_megapixel_latency",
                "Decode latency per resized megapixel",
            ),
            &["source"],
        )?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(latency_abs_diff.clone()))?;
        registry.register(Box::new(per_original_megapixel.clone()))?;
        registry.register(Box::new(per_resized_megapixel.clone()))?;
        Ok(SourceMetrics {
            latency,
            latency_abs_diff,
            per_original_megapixel,
            per_resized_megapixel,
            means: DashMap::new(),
        })
    }

    pub fn observe(&self, source: &str, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.latency.with_label_values(&[source]).observe(secs);

        let mut state = self.means.entry(source.to_string()).or_default();
        if state.count > 0 {
            let mean = state.sum_secs / state.count as f64;
            self.latency_abs_diff
                .with_label_values(&[source])
                .observe((secs - mean).abs());
        }
        state.count += 1;
        state.sum_secs += secs;
    }

    /// Decode observations additionally record megapixel-normalized
    /// latency for the original and the produced rendition.
    pub fn observe_decode(
        &self,
        source: &str,
        elapsed: Duration,
        original_megapixels: f64,
        resized_megapixels: f64,
    ) {
        self.observe(source, elapsed);
        let secs = elapsed.as_secs_f64();
        if original_megapixels > 0.0 {
            self.per_original_megapixel
                .with_label_values(&[source])
                .observe(secs / original_megapixels);
        }
        if resized_megapixels > 0.0 {
            self.per_resized_megapixel
                .with_label_values(&[source])
                .observe(secs / resized_megapixels);
        }
    }
}
