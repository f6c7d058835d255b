use crate::error::BackendResult;
use futures::stream::Stream;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::StreamExt;
use tracing::trace;

/// One flush worth of aggregated metrics, as handed over by the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsBatch {
    /// Unix seconds of the flush; `None` means "now".
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub counters: BTreeMap<String, f64>,
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub timers: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub sets: BTreeMap<String, BTreeSet<String>>,
    /// Overrides the configured thresholds for this flush only.
    #[serde(default)]
    pub pct_threshold: Option<Vec<f64>>,
}

impl MetricsBatch {
    pub fn from_json(json: &str) -> BackendResult<Self> {
        Ok(serde_json::from_str::<MetricsBatch>(json)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> BackendResult<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }

    pub fn timestamp_or_now(&self) -> u64 {
        self.timestamp.unwrap_or_else(unix_now)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Stream of batches, one JSON document per non-empty line.
pub fn read_batches<R>(reader: R) -> impl Stream<Item = BackendResult<MetricsBatch>>
where
    R: AsyncRead + Unpin,
{
    let reader = BufReader::new(reader);
    tokio_stream::wrappers::LinesStream::new(reader.lines()).filter_map(|res| match res {
        Ok(line) => {
            let trimmed_line = line.trim();
            if trimmed_line.is_empty() {
                None
            } else {
                trace!("batch line: {}", trimmed_line);
                Some(MetricsBatch::from_json(trimmed_line))
            }
        }
        Err(e) => Some(Err(e.into())),
    })
}

pub async fn read_batches_from_file<P>(
    filename: P
) -> BackendResult<impl Stream<Item = BackendResult<MetricsBatch>>>
where
    P: AsRef<Path>,
{
    let file = File::open(filename).await?;
    Ok(read_batches(file))
}
