//! # pairflow
//! Streaming analytics for a pair of instruments.
//!
//! Two tick streams are deduplicated, aligned on common timestamps and resampled into
//! fixed-width bars. Every analytics cycle recomputes a hedge ratio, the spread and its
//! z-score, a rolling correlation and an Augmented Dickey-Fuller stationarity test over
//! a fresh recent window, then evaluates alert thresholds against the resulting
//! [`AnalyticsRecord`](record::AnalyticsRecord).
//!
//! Metrics that cannot be computed for a cycle are reported as
//! [`Metric::Absent`](record::Metric::Absent) with a typed reason, never as zero.
//!
//! ## Layout
//! - Pure core: [`align`], [`resample`], [`window`], [`stats`], [`alert`], [`cycle`].
//! - Runtime: [`engine`] spawns per-symbol ingestion, the analytics task and the
//!   persister; [`query`] exposes read-only access; [`sink`] persists bars and records.
//!
//! ```no_run
//! use pairflow::{
//!     config::{EngineConfig, Trigger},
//!     engine::PairEngine,
//!     sink::NullSink,
//!     types::{Pair, Symbol, Tick},
//! };
//!
//! # async fn run() -> Result<(), pairflow::error::EngineError> {
//! let config = EngineConfig::new(Pair::new(Symbol::new("ES"), Symbol::new("NQ")))
//!     .with_trigger(Trigger::PerTick);
//! let engine = PairEngine::spawn(config, NullSink)?;
//! let mut records = engine.subscribe_records();
//!
//! engine.ingest(Tick::new("ES", 1_700_000_000_000, 5_000.25))?;
//! engine.ingest(Tick::new("NQ", 1_700_000_000_000, 17_500.50))?;
//!
//! if let Ok(record) = records.recv().await {
//!     println!("{:?}", record.z_score);
//! }
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Threshold evaluation producing [`AlertEvent`](record::AlertEvent)s.
pub mod alert;

/// Tick deduplication and timestamp alignment.
pub mod align;

/// Bounded per-symbol tick buffer.
pub mod buffer;

/// Engine configuration, defaults and environment overrides.
pub mod config;

/// The analytics cycle orchestrator.
pub mod cycle;

/// Runtime tasks and handles.
pub mod engine;

/// All [`Error`](std::error::Error)s generated in pairflow.
pub mod error;

/// Read-only access to engine state.
pub mod query;

/// Analytics records, metrics and alert events.
pub mod record;

/// Tick to bar resampling and bar history.
pub mod resample;

/// Persistence backends.
pub mod sink;

/// Hedge regression, spread, correlation and stationarity statistics.
pub mod stats;

/// Core data types.
pub mod types;

/// Recent-window sizing.
pub mod window;
