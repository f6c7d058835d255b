use lazy_static::lazy_static;
use prometheus::register_histogram;
use prometheus::register_int_counter;
use prometheus::register_int_gauge;
use prometheus::Histogram;
use prometheus::IntCounter;
use prometheus::IntGauge;

pub mod backend;
pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod prometheus_endpoint;
pub mod status;
pub mod timer_stats;
pub mod trap_client;

lazy_static! {
    pub static ref FLUSH_COUNTER: IntCounter = register_int_counter!(
        "circonus_flushes_total",
        "Total number of flushes accepted by the circonus trap"
    )
    .unwrap();
    pub static ref FLUSH_ERROR_COUNTER: IntCounter = register_int_counter!(
        "circonus_flush_errors_total",
        "Total number of flushes that failed to reach the circonus trap"
    )
    .unwrap();
    pub static ref STATS_EMITTED_GAUGE: IntGauge = register_int_gauge!(
        "circonus_stats_emitted",
        "Number of metrics reported in the last flush",
    )
    .unwrap();
    pub static ref CALCULATION_DURATION_HISTOGRAM: Histogram = register_histogram!(
        "circonus_flush_calculation_seconds",
        "Time spent turning a batch into the stats map",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,]
    )
    .unwrap();
}
