use crate::batch::{unix_now, MetricsBatch};
use crate::config::BackendConfig;
use crate::error::BackendResult;
use crate::status::BackendStatus;
use crate::timer_stats::{PercentileThresholds, StatsMap, TimerStatsAggregator};
use crate::trap_client::{StatsSink, TrapClient};
use crate::{
    CALCULATION_DURATION_HISTOGRAM, FLUSH_COUNTER, FLUSH_ERROR_COUNTER, STATS_EMITTED_GAUGE,
};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const NUM_STATS_KEY: &str = "statsd.numStats";
pub const CALCULATION_TIME_KEY: &str = "statsd.circonusStats.calculationTime";

/// What the daemon calls on each flush and on each status query.
pub trait FlushHandler {
    fn compute_flush_fragment(
        &mut self,
        batch: &MetricsBatch,
        thresholds: &PercentileThresholds,
    ) -> StatsMap;

    fn report_status(&self) -> BackendStatus;
}

/// Flushes statsd batches to a Circonus trap.
///
/// Counters are reported as running totals across flushes, since the daemon
/// resets its own counters every interval.
pub struct CirconusBackend {
    thresholds: PercentileThresholds,
    counters: BTreeMap<String, f64>,
    status: BackendStatus,
    sink: Option<Box<dyn StatsSink>>,
}

impl CirconusBackend {
    pub fn new(
        config: &BackendConfig,
        startup_time: u64,
    ) -> BackendResult<Self> {
        let sink = TrapClient::from_config(config)?.map(|client| {
            info!("circonus trap: {}", client.url());
            Box::new(client) as Box<dyn StatsSink>
        });
        if sink.is_none() {
            warn!("circonusHttpTrapUrl is not set, stats will be computed but not sent");
        }
        Ok(Self::with_sink(config.thresholds()?, sink, startup_time))
    }

    pub fn with_sink(
        thresholds: PercentileThresholds,
        sink: Option<Box<dyn StatsSink>>,
        startup_time: u64,
    ) -> Self {
        Self {
            thresholds,
            counters: BTreeMap::new(),
            status: BackendStatus::new(startup_time),
            sink,
        }
    }

    pub fn thresholds(&self) -> &PercentileThresholds {
        &self.thresholds
    }

    pub fn cumulative_counter(
        &self,
        name: &str,
    ) -> Option<f64> {
        self.counters.get(name).copied()
    }

    /// Forget accumulated counters and restart the status clock at `now`.
    pub fn reset(
        &mut self,
        now: u64,
    ) {
        self.counters.clear();
        self.status = BackendStatus::new(now);
    }

    /// Thresholds sent with the batch win over the configured ones, unless they are invalid.
    fn thresholds_for(
        &self,
        batch: &MetricsBatch,
    ) -> PercentileThresholds {
        match &batch.pct_threshold {
            Some(pcts) => match PercentileThresholds::from_percentiles(pcts) {
                Ok(thresholds) => thresholds,
                Err(e) => {
                    warn!("ignoring batch thresholds {:?}: {}", pcts, e);
                    self.thresholds.clone()
                }
            },
            None => self.thresholds.clone(),
        }
    }

    /// Compute the stats for `batch` and send them; the map is returned either way
    /// when no trap is configured, and only on success otherwise.
    pub async fn flush(
        &mut self,
        batch: &MetricsBatch,
    ) -> BackendResult<StatsMap> {
        let thresholds = self.thresholds_for(batch);
        let stats = self.compute_flush_fragment(batch, &thresholds);

        let Some(sink) = &self.sink else {
            debug!("no trap configured, dropping {} stats", stats.len());
            return Ok(stats);
        };

        match sink.send(&stats).await {
            Ok(()) => {
                self.status.last_flush = unix_now();
                FLUSH_COUNTER.inc();
                debug!("flushed {} stats to circonus", stats.len());
                Ok(stats)
            }
            Err(e) => {
                error!("Error sending stats to circonus: {}", e);
                self.status.last_exception = unix_now();
                FLUSH_ERROR_COUNTER.inc();
                Err(e)
            }
        }
    }
}

impl FlushHandler for CirconusBackend {
    fn compute_flush_fragment(
        &mut self,
        batch: &MetricsBatch,
        thresholds: &PercentileThresholds,
    ) -> StatsMap {
        let start = Instant::now();
        let mut stats = StatsMap::new();
        let mut num_stats: u64 = 0;

        for (name, value) in &batch.counters {
            let total = self.counters.entry(name.clone()).or_insert(0.0);
            *total += value;
            stats.insert(format!("{name}.counter"), *total);
            num_stats += 1;
        }

        let aggregator = TimerStatsAggregator::new(thresholds);
        for (name, samples) in &batch.timers {
            if aggregator.extend_fragment(name, samples, &mut stats) {
                num_stats += 1;
            }
        }

        for (name, value) in &batch.gauges {
            stats.insert(format!("{name}.gauge"), *value);
            num_stats += 1;
        }

        for (name, members) in &batch.sets {
            stats.insert(format!("{name}.set.count"), members.len() as f64);
            num_stats += 1;
        }

        let elapsed = start.elapsed();
        stats.insert(NUM_STATS_KEY.to_string(), num_stats as f64);
        stats.insert(CALCULATION_TIME_KEY.to_string(), elapsed.as_millis() as f64);

        STATS_EMITTED_GAUGE.set(num_stats as i64);
        CALCULATION_DURATION_HISTOGRAM.observe(elapsed.as_secs_f64());
        stats
    }

    fn report_status(&self) -> BackendStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<StatsMap>>>,
        fail: bool,
    }

    #[async_trait]
    impl StatsSink for RecordingSink {
        async fn send(
            &self,
            stats: &StatsMap,
        ) -> BackendResult<()> {
            if self.fail {
                return Err(BackendError::OtherError("trap down".to_string()));
            }
            self.sent.lock().unwrap().push(stats.clone());
            Ok(())
        }
    }

    fn p90() -> PercentileThresholds {
        PercentileThresholds::from_percentiles(&[90.0]).unwrap()
    }

    fn batch(json: &str) -> MetricsBatch {
        MetricsBatch::from_json(json).unwrap()
    }

    #[test]
    fn test_fragment_contains_every_metric_kind() {
        let mut backend = CirconusBackend::with_sink(p90(), None, 0);
        let thresholds = p90();
        let stats = backend.compute_flush_fragment(
            &batch(
                r#"{"counters": {"hits": 4},
                    "gauges": {"load": 0.75},
                    "timers": {"api": [1, 2, 3, 4, 5], "idle": []},
                    "sets": {"users": ["a", "b", "c"]}}"#,
            ),
            &thresholds,
        );

        assert_eq!(stats["hits.counter"], 4.0);
        assert_eq!(stats["load.gauge"], 0.75);
        assert_eq!(stats["users.set.count"], 3.0);
        assert_eq!(stats["api.timer.count"], 5.0);
        assert_eq!(stats["api.timer.mean"], 3.0);
        assert_eq!(stats["api.timer.upper.90"], 5.0);
        assert_eq!(stats["api.timer.sum.90"], 14.0);
        assert_eq!(stats["api.timer.mean.90"], 3.5);
        assert!(!stats.keys().any(|key| key.starts_with("idle.")));
        // hits, api, load, users; the empty timer is not counted
        assert_eq!(stats[NUM_STATS_KEY], 4.0);
        assert!(stats.contains_key(CALCULATION_TIME_KEY));
    }

    #[test]
    fn test_counters_accumulate_until_reset() {
        let mut backend = CirconusBackend::with_sink(p90(), None, 100);
        let thresholds = p90();

        backend.compute_flush_fragment(&batch(r#"{"counters": {"hits": 2}}"#), &thresholds);
        let stats =
            backend.compute_flush_fragment(&batch(r#"{"counters": {"hits": 3}}"#), &thresholds);
        assert_eq!(stats["hits.counter"], 5.0);
        assert_eq!(backend.cumulative_counter("hits"), Some(5.0));

        backend.reset(200);
        assert_eq!(backend.cumulative_counter("hits"), None);
        assert_eq!(backend.report_status(), BackendStatus::new(200));
        let stats =
            backend.compute_flush_fragment(&batch(r#"{"counters": {"hits": 1}}"#), &thresholds);
        assert_eq!(stats["hits.counter"], 1.0);
    }

    #[test]
    fn test_timer_fragment_is_repeatable() {
        let mut backend = CirconusBackend::with_sink(p90(), None, 0);
        let thresholds = p90();
        let input = batch(r#"{"timers": {"t": [0.5, 9.25, 3.75, 3.75, 1e-3]}}"#);

        let mut first = backend.compute_flush_fragment(&input, &thresholds);
        let mut second = backend.compute_flush_fragment(&input, &thresholds);
        first.remove(CALCULATION_TIME_KEY);
        second.remove(CALCULATION_TIME_KEY);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_flush_sends_and_records_success() {
        let sink = RecordingSink::default();
        let mut backend = CirconusBackend::with_sink(p90(), Some(Box::new(sink.clone())), 0);

        let stats = backend
            .flush(&batch(r#"{"gauges": {"g": 1}}"#))
            .await
            .unwrap();
        assert_eq!(stats["g.gauge"], 1.0);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["g.gauge"], 1.0);

        let status = backend.report_status();
        assert!(status.last_flush > 0);
        assert_eq!(status.last_exception, 0);
    }

    #[tokio::test]
    async fn test_flush_failure_records_exception() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut backend = CirconusBackend::with_sink(p90(), Some(Box::new(sink)), 0);

        assert!(backend.flush(&MetricsBatch::default()).await.is_err());
        let status = backend.report_status();
        assert_eq!(status.last_flush, 0);
        assert!(status.last_exception > 0);
    }

    #[tokio::test]
    async fn test_flush_without_trap_leaves_status_alone() {
        let mut backend = CirconusBackend::with_sink(p90(), None, 7);
        let stats = backend
            .flush(&batch(r#"{"timers": {"t": [1]}}"#))
            .await
            .unwrap();
        assert_eq!(stats["t.timer.mean.90"], 1.0);
        assert_eq!(backend.report_status(), BackendStatus::new(7));
    }

    #[tokio::test]
    async fn test_batch_thresholds_override_config() {
        let mut backend = CirconusBackend::with_sink(p90(), None, 0);

        let stats = backend
            .flush(&batch(r#"{"timers": {"t": [1, 2, 3, 4]}, "pctThreshold": [50, 99.9]}"#))
            .await
            .unwrap();
        assert_eq!(stats["t.timer.sum.50"], 7.0);
        assert_eq!(stats["t.timer.sum.99_9"], 10.0);
        assert!(!stats.contains_key("t.timer.sum.90"));

        let stats = backend
            .flush(&batch(r#"{"timers": {"t": [1, 2, 3, 4]}, "pctThreshold": [0]}"#))
            .await
            .unwrap();
        assert!(stats.contains_key("t.timer.sum.90"));
    }

    #[test]
    fn test_new_from_config_without_url() {
        let backend = CirconusBackend::new(&BackendConfig::default(), 42).unwrap();
        assert_eq!(backend.report_status(), BackendStatus::new(42));
        assert_eq!(backend.thresholds().len(), 1);
    }
}
