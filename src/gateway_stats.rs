//! Per-function request statistics: incoming rate, inter-arrival interval,
//! end-to-end latency, queueing delay, and dispatch overhead, exported as
//! Prometheus histograms/counters.
//!
//! Grounded on `original_source/src/gateway/server.h`'s `PerFuncStat` (one
//! instance per `func_id`, holding a request counter plus
//! `StatisticsCollector` fields) and the histogram-tracker idiom in the
//! teacher's `percentiles.rs`. The LRU eviction `percentiles.rs` uses for
//! open-ended label sets is dropped here since the label set — one entry
//! per configured function — is bounded and known at startup from
//! `FuncConfig`, so a plain map never grows unbounded.

use std::collections::HashMap;
use std::sync::Mutex;

use hdrhistogram::Histogram;
use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    static ref INCOMING_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "faas_gateway_incoming_requests_total",
        "Total incoming function calls received by the gateway",
        &["func_name"]
    )
    .unwrap();
    static ref END_TO_END_DELAY_SECONDS: HistogramVec = register_histogram_vec!(
        "faas_gateway_end_to_end_delay_seconds",
        "End-to-end latency from request receipt to response",
        &["func_name"]
    )
    .unwrap();
    static ref QUEUEING_DELAY_SECONDS: HistogramVec = register_histogram_vec!(
        "faas_gateway_queueing_delay_seconds",
        "Time a call spent in the pending queue before dispatch",
        &["func_name"]
    )
    .unwrap();
    static ref DISPATCH_OVERHEAD_SECONDS: HistogramVec = register_histogram_vec!(
        "faas_gateway_dispatch_overhead_seconds",
        "Time spent picking a node and sending the dispatch message",
        &["func_name"]
    )
    .unwrap();
}

/// One function's latency distribution, kept in microseconds internally
/// (matching the wire header's `processing_time_us`/`dispatch_delay_us`
/// fields) and reported to Prometheus in seconds.
struct PerFuncStat {
    last_request_timestamp_us: Option<i64>,
    request_interval: Histogram<u64>,
    end2end_delay: Histogram<u64>,
}

impl PerFuncStat {
    fn new() -> Self {
        PerFuncStat {
            last_request_timestamp_us: None,
            request_interval: Histogram::new_with_bounds(1, 60_000_000, 3).unwrap(),
            end2end_delay: Histogram::new_with_bounds(1, 60_000_000, 3).unwrap(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerFuncSnapshot {
    pub request_count: u64,
    pub mean_interval_us: f64,
    pub p99_end2end_delay_us: u64,
}

/// Tracks statistics for every function the gateway has seen a call for.
/// Registered once per process; cheap to clone the `Arc` around handler
/// tasks.
#[derive(Default)]
pub struct GatewayStats {
    by_func: Mutex<HashMap<u16, PerFuncStat>>,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly admitted call. `now_us` is the monotonic timestamp
    /// (microseconds) the gateway received it at.
    pub fn tick_new_func_call(&self, func_id: u16, func_name: &str, now_us: i64) {
        INCOMING_REQUESTS_TOTAL.with_label_values(&[func_name]).inc();
        let mut by_func = self.by_func.lock().unwrap();
        let stat = by_func.entry(func_id).or_insert_with(PerFuncStat::new);
        if let Some(last) = stat.last_request_timestamp_us {
            let interval = (now_us - last).max(0) as u64;
            let _ = stat.request_interval.record(interval.max(1));
        }
        stat.last_request_timestamp_us = Some(now_us);
    }

    /// Records queueing delay (time between admission and dispatch) and
    /// dispatch overhead (time spent in `DispatchFuncCall` itself), both in
    /// microseconds.
    pub fn record_dispatch(&self, func_name: &str, queueing_delay_us: u64, dispatch_overhead_us: u64) {
        QUEUEING_DELAY_SECONDS
            .with_label_values(&[func_name])
            .observe(queueing_delay_us as f64 / 1_000_000.0);
        DISPATCH_OVERHEAD_SECONDS
            .with_label_values(&[func_name])
            .observe(dispatch_overhead_us as f64 / 1_000_000.0);
    }

    /// Records the end-to-end delay of a completed or failed call.
    pub fn record_completion(&self, func_id: u16, func_name: &str, end2end_delay_us: u64) {
        END_TO_END_DELAY_SECONDS
            .with_label_values(&[func_name])
            .observe(end2end_delay_us as f64 / 1_000_000.0);
        let mut by_func = self.by_func.lock().unwrap();
        let stat = by_func.entry(func_id).or_insert_with(PerFuncStat::new);
        let _ = stat.end2end_delay.record(end2end_delay_us.max(1));
    }

    pub fn snapshot(&self, func_id: u16) -> Option<PerFuncSnapshot> {
        let by_func = self.by_func.lock().unwrap();
        let stat = by_func.get(&func_id)?;
        if stat.end2end_delay.is_empty() && stat.request_interval.is_empty() {
            return None;
        }
        Some(PerFuncSnapshot {
            request_count: stat.end2end_delay.len(),
            mean_interval_us: stat.request_interval.mean(),
            p99_end2end_delay_us: stat.end2end_delay.value_at_quantile(0.99),
        })
    }
}
