//! Persistence backends for completed bars and analytics records.
//!
//! The engine only ever writes; nothing reads back through this interface.

use crate::{error::SinkError, record::AnalyticsRecord, types::Bar};
use async_trait::async_trait;
use derive_more::From;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::info;

/// Item queued for the persister task.
#[derive(Debug, Clone, PartialEq, From)]
pub enum SinkItem {
    Bar(Bar),
    Record(AnalyticsRecord),
}

/// Storage collaborator for bars and records.
#[async_trait]
pub trait AnalyticsSink: Send {
    /// Persist one completed bar, keyed by (symbol, interval, open_time)
    async fn write_bar(&mut self, bar: &Bar) -> Result<(), SinkError>;

    /// Persist one analytics record, keyed by (pair, source, timestamp)
    async fn write_record(&mut self, record: &AnalyticsRecord) -> Result<(), SinkError>;

    /// Flush pending writes to storage
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;

    async fn write(&mut self, item: &SinkItem) -> Result<(), SinkError> {
        match item {
            SinkItem::Bar(bar) => self.write_bar(bar).await,
            SinkItem::Record(record) => self.write_record(record).await,
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl AnalyticsSink for NullSink {
    async fn write_bar(&mut self, _: &Bar) -> Result<(), SinkError> {
        Ok(())
    }

    async fn write_record(&mut self, _: &AnalyticsRecord) -> Result<(), SinkError> {
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "null"
    }
}

pub const BARS_FILE: &str = "bars.jsonl";
pub const RECORDS_FILE: &str = "analytics.jsonl";

/// Appends one JSON object per line to `bars.jsonl` and `analytics.jsonl` under a
/// directory.
#[derive(Debug)]
pub struct JsonlSink {
    bars: BufWriter<File>,
    records: BufWriter<File>,
    flush_interval: Duration,
    last_flush: Instant,
}

impl JsonlSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        Ok(Self {
            bars: open_append(dir.join(BARS_FILE))?,
            records: open_append(dir.join(RECORDS_FILE))?,
            flush_interval: Duration::from_secs(5),
            last_flush: Instant::now(),
        })
    }

    /// Set how often buffered lines are flushed during normal operation.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    fn maybe_flush(&mut self) -> Result<(), SinkError> {
        if self.last_flush.elapsed() >= self.flush_interval {
            self.flush_all()?;
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), SinkError> {
        self.bars.flush()?;
        self.records.flush()?;
        self.last_flush = Instant::now();
        Ok(())
    }
}

fn open_append(path: PathBuf) -> Result<BufWriter<File>, SinkError> {
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!(path = %path.display(), "appending to jsonl");
    Ok(BufWriter::new(file))
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

#[async_trait]
impl AnalyticsSink for JsonlSink {
    async fn write_bar(&mut self, bar: &Bar) -> Result<(), SinkError> {
        let json = serde_json::to_string(bar)?;
        writeln!(self.bars, "{json}")?;
        self.maybe_flush()
    }

    async fn write_record(&mut self, record: &AnalyticsRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;
        writeln!(self.records, "{json}")?;
        self.maybe_flush()
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.flush_all()
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AnalyticsError,
        types::{AnalyticsSource, Interval, Pair, Symbol},
    };

    fn bar(open_time: i64) -> Bar {
        Bar {
            symbol: Symbol::new("ES"),
            interval: Interval::Second1,
            open_time,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: Some(3.0),
        }
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let record = AnalyticsRecord::all_absent(
            5,
            Pair::new(Symbol::new("ES"), Symbol::new("NQ")),
            AnalyticsSource::Ticks,
            AnalyticsError::insufficient(2, 0),
        );

        {
            let mut sink = JsonlSink::new(dir.path()).unwrap();
            assert_eq!(sink.backend_type(), "JSONL");
            sink.write(&SinkItem::Bar(bar(0))).await.unwrap();
            sink.write(&SinkItem::Bar(bar(1_000))).await.unwrap();
            sink.write(&SinkItem::Record(record.clone())).await.unwrap();
            sink.flush().await.unwrap();
        }

        let bars = std::fs::read_to_string(dir.path().join(BARS_FILE)).unwrap();
        let parsed: Vec<Bar> = bars
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed, vec![bar(0), bar(1_000)]);

        let records = std::fs::read_to_string(dir.path().join(RECORDS_FILE)).unwrap();
        let back: AnalyticsRecord = serde_json::from_str(records.trim()).unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn test_jsonl_sink_reopens_in_append_mode() {
        let dir = tempfile::tempdir().unwrap();

        for open_time in [0, 1_000] {
            let mut sink = JsonlSink::new(dir.path()).unwrap();
            sink.write_bar(&bar(open_time)).await.unwrap();
            sink.flush().await.unwrap();
        }

        let bars = std::fs::read_to_string(dir.path().join(BARS_FILE)).unwrap();
        assert_eq!(bars.lines().count(), 2);
    }
}
