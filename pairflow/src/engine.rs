//! Concurrent runtime around the analytics core.
//!
//! Task layout:
//! - one ingestion task per symbol, the only writer of that symbol's tick buffer and
//!   bar histories
//! - one analytics task running an [`AnalyticsCycle`] per configured source whenever
//!   the [`Trigger`] fires, reading owned snapshots only
//! - one persister task draining bars and completed records into the
//!   [`AnalyticsSink`]
//!
//! Shutdown is signalled over a watch channel. The analytics task finishes its
//! in-flight cycle then exits; the persister drains what was queued and flushes once
//! every producer is gone.

use crate::{
    config::{EngineConfig, Trigger},
    cycle::{AnalyticsCycle, PairSnapshot},
    error::EngineError,
    query::{EngineState, QueryHandle},
    record::{AlertEvent, AnalyticsRecord},
    resample::Resampler,
    sink::{AnalyticsSink, SinkItem},
    types::{AnalyticsSource, Bar, Symbol, Tick},
};
use chrono::Utc;
use fnv::FnvHashMap;
use futures::{Stream, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Notify, broadcast, mpsc, watch},
    task::JoinHandle,
    time::{Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

/// Capacity of the record and alert broadcast channels.
pub const RESULT_CHANNEL_CAPACITY: usize = 1_024;

/// How often an idle ingestion task checks whether the other leg has moved far enough
/// past its open bars to close them.
const BAR_CLOCK_PERIOD: Duration = Duration::from_millis(250);

/// Entry point: validates config and spawns the engine tasks.
#[derive(Debug)]
pub struct PairEngine;

impl PairEngine {
    /// Spawn the engine onto the current tokio runtime.
    pub fn spawn<Sink>(config: EngineConfig, sink: Sink) -> Result<EngineHandle, EngineError>
    where
        Sink: AnalyticsSink + 'static,
    {
        config.validate()?;

        let state = Arc::new(EngineState::new(&config));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let (records_tx, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let (alerts_tx, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let notify = Arc::new(Notify::new());

        let mut senders = FnvHashMap::default();
        let mut workers = Vec::with_capacity(3);

        for symbol in [&config.pair.x, &config.pair.y] {
            let (tick_tx, tick_rx) = mpsc::unbounded_channel();
            senders.insert(symbol.clone(), tick_tx);

            let ingestor = SymbolIngestor {
                symbol: symbol.clone(),
                state: state.clone(),
                resamplers: config
                    .interval_set
                    .iter()
                    .map(|&interval| Resampler::new(symbol.clone(), interval))
                    .collect(),
                sink_tx: sink_tx.clone(),
                notify: matches!(config.trigger, Trigger::PerTick).then(|| notify.clone()),
                bar_close_lateness: config.bar_close_lateness(),
            };
            let bar_clock = ingestor.bar_close_lateness.map(|_| {
                let mut clock = tokio::time::interval(BAR_CLOCK_PERIOD);
                clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
                clock
            });
            workers.push(tokio::spawn(run_ingestion(
                ingestor,
                tick_rx,
                bar_clock,
                shutdown_rx.clone(),
            )));
        }

        let cycle = AnalyticsCycle::new(
            config.pair.clone(),
            config.analytics_source,
            config.analytics_params(),
            config.alert_thresholds,
        );

        let analytics = AnalyticsTask {
            state: state.clone(),
            cycles: vec![cycle],
            records_tx: records_tx.clone(),
            alerts_tx: alerts_tx.clone(),
            sink_tx,
        };
        let trigger = TriggerClock::new(config.trigger, notify);
        workers.push(tokio::spawn(analytics.run(trigger, shutdown_rx)));

        let persister = tokio::spawn(run_persister(sink, sink_rx));

        info!(
            pair = %config.pair,
            source = %config.analytics_source,
            trigger = ?config.trigger,
            "pair engine started"
        );

        Ok(EngineHandle {
            router: TickRouter {
                senders: Arc::new(senders),
            },
            query: QueryHandle::new(state),
            records_tx,
            alerts_tx,
            shutdown_tx,
            workers,
            persister,
        })
    }
}

/// Owner handle of a running engine.
#[derive(Debug)]
pub struct EngineHandle {
    router: TickRouter,
    query: QueryHandle,
    records_tx: broadcast::Sender<AnalyticsRecord>,
    alerts_tx: broadcast::Sender<AlertEvent>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    persister: JoinHandle<()>,
}

impl EngineHandle {
    /// Cloneable tick entry point routing by symbol.
    pub fn router(&self) -> TickRouter {
        self.router.clone()
    }

    pub fn ingest(&self, tick: Tick) -> Result<(), EngineError> {
        self.router.send(tick)
    }

    pub fn query(&self) -> QueryHandle {
        self.query.clone()
    }

    pub fn subscribe_records(&self) -> broadcast::Receiver<AnalyticsRecord> {
        self.records_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts_tx.subscribe()
    }

    /// Signal every task to stop and wait for them.
    ///
    /// Ticks still queued in ingestion channels are discarded. Bars and records already
    /// handed to the persister are written and flushed before this returns.
    pub async fn shutdown(self) {
        let Self {
            router,
            shutdown_tx,
            workers,
            persister,
            ..
        } = self;

        // Receivers may already be gone if every task exited on its own
        let _ = shutdown_tx.send(true);
        drop(router);

        for worker in workers {
            if let Err(error) = worker.await {
                error!(%error, "engine task panicked");
            }
        }
        if let Err(error) = persister.await {
            error!(%error, "persister task panicked");
        }

        info!("pair engine stopped");
    }
}

/// Routes ticks to the ingestion task of their symbol.
#[derive(Debug, Clone)]
pub struct TickRouter {
    senders: Arc<FnvHashMap<Symbol, mpsc::UnboundedSender<Tick>>>,
}

impl TickRouter {
    pub fn send(&self, tick: Tick) -> Result<(), EngineError> {
        let sender = self
            .senders
            .get(&tick.symbol)
            .ok_or_else(|| EngineError::UnknownSymbol(tick.symbol.clone()))?;

        sender
            .send(tick)
            .map_err(|rejected| EngineError::Stopped(rejected.0.symbol))
    }

    /// Forward every tick of `stream` until it ends or the engine stops.
    ///
    /// Ticks for symbols outside the pair are logged and skipped. Returns the number of
    /// ticks forwarded.
    pub async fn forward<S>(&self, stream: S) -> usize
    where
        S: Stream<Item = Tick>,
    {
        futures::pin_mut!(stream);
        let mut forwarded = 0;

        while let Some(tick) = stream.next().await {
            match self.send(tick) {
                Ok(()) => forwarded += 1,
                Err(EngineError::UnknownSymbol(symbol)) => {
                    debug!(%symbol, "skipping tick for symbol outside the pair");
                }
                Err(error) => {
                    warn!(%error, "tick stream forwarding stopped");
                    break;
                }
            }
        }

        forwarded
    }
}

/// Per-symbol ingestion state, owned by exactly one task.
struct SymbolIngestor {
    symbol: Symbol,
    state: Arc<EngineState>,
    resamplers: Vec<Resampler>,
    sink_tx: mpsc::UnboundedSender<SinkItem>,
    notify: Option<Arc<Notify>>,
    /// `None` leaves bars open until this leg's own next bucket starts.
    bar_close_lateness: Option<i64>,
}

impl SymbolIngestor {
    fn ingest(&mut self, tick: Tick) {
        let Ok(store) = self.state.store(&self.symbol) else {
            return;
        };

        if let Err(error) = store.ticks.write().push(tick.clone()) {
            warn!(symbol = %self.symbol, %error, "tick rejected");
            return;
        }
        self.state.advance_watermark(tick.timestamp);

        let completed: Vec<Bar> = self
            .resamplers
            .iter_mut()
            .filter_map(|resampler| resampler.update(&tick))
            .collect();
        for bar in completed {
            self.complete(bar);
        }

        if let Some(notify) = &self.notify {
            notify.notify_one();
        }
    }

    /// Close open bars whose interval ended at least the configured lateness before the
    /// newest timestamp seen on either leg.
    fn close_elapsed(&mut self) {
        let (Some(lateness), Some(watermark)) = (self.bar_close_lateness, self.state.watermark())
        else {
            return;
        };
        let horizon = watermark.saturating_sub(lateness);

        let completed: Vec<Bar> = self
            .resamplers
            .iter_mut()
            .filter_map(|resampler| resampler.close_elapsed(horizon))
            .collect();
        for bar in completed {
            self.complete(bar);
        }
    }

    fn complete(&self, bar: Bar) {
        let Ok(store) = self.state.store(&self.symbol) else {
            return;
        };
        if let Some(history) = store.bars.get(&bar.interval) {
            history.write().push(bar.clone());
        }

        debug!(
            symbol = %bar.symbol,
            interval = %bar.interval,
            open_time = bar.open_time,
            close = bar.close,
            "bar completed"
        );

        if self.sink_tx.send(bar.into()).is_err() {
            warn!(symbol = %self.symbol, "persister gone, bar not persisted");
        }
    }
}

async fn run_ingestion(
    mut ingestor: SymbolIngestor,
    mut ticks: mpsc::UnboundedReceiver<Tick>,
    mut bar_clock: Option<Interval>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            tick = ticks.recv() => match tick {
                Some(tick) => ingestor.ingest(tick),
                None => break,
            },

            _ = next_bar_clock(&mut bar_clock) => ingestor.close_elapsed(),
        }
    }

    debug!(symbol = %ingestor.symbol, "ingestion task stopped");
}

async fn next_bar_clock(clock: &mut Option<Interval>) {
    match clock {
        Some(clock) => {
            clock.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// What wakes the analytics task.
enum TriggerClock {
    Timer(Interval),
    PerTick(Arc<Notify>),
}

impl TriggerClock {
    fn new(trigger: Trigger, notify: Arc<Notify>) -> Self {
        match trigger {
            Trigger::Timer(period) => {
                let mut interval = tokio::time::interval(period);
                // Slow cycles skip beats rather than bursting to catch up
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                TriggerClock::Timer(interval)
            }
            Trigger::PerTick => TriggerClock::PerTick(notify),
        }
    }

    async fn wait(&mut self) {
        match self {
            TriggerClock::Timer(interval) => {
                interval.tick().await;
            }
            TriggerClock::PerTick(notify) => notify.notified().await,
        }
    }
}

struct AnalyticsTask {
    state: Arc<EngineState>,
    cycles: Vec<AnalyticsCycle>,
    records_tx: broadcast::Sender<AnalyticsRecord>,
    alerts_tx: broadcast::Sender<AlertEvent>,
    sink_tx: mpsc::UnboundedSender<SinkItem>,
}

impl AnalyticsTask {
    async fn run(mut self, mut trigger: TriggerClock, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                _ = trigger.wait() => self.run_cycles(),
            }
        }

        debug!("analytics task stopped");
    }

    fn run_cycles(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        let pair = &self.state.pair;

        let (Ok(x_store), Ok(y_store)) = (self.state.store(&pair.x), self.state.store(&pair.y))
        else {
            return;
        };

        for cycle in &mut self.cycles {
            let output = match cycle.source() {
                AnalyticsSource::Ticks => {
                    let snapshot = PairSnapshot::new(x_store.tick_snapshot(), y_store.tick_snapshot());
                    cycle.run(&snapshot, now_ms)
                }
                AnalyticsSource::Bars(interval) => {
                    let snapshot = PairSnapshot::new(
                        x_store.bar_snapshot(interval),
                        y_store.bar_snapshot(interval),
                    );
                    cycle.run(&snapshot, now_ms)
                }
            };

            let record = output.record;
            self.state
                .latest
                .write()
                .insert(record.source, record.clone());

            for alert in output.alerts {
                info!(kind = %alert.kind, value = alert.metric_value, "{}", alert.message);
                // No subscribers is fine
                let _ = self.alerts_tx.send(alert);
            }
            let _ = self.records_tx.send(record.clone());

            if self.sink_tx.send(SinkItem::Record(record)).is_err() {
                warn!("persister gone, record not persisted");
            }
        }
    }
}

async fn run_persister<Sink>(mut sink: Sink, mut items: mpsc::UnboundedReceiver<SinkItem>)
where
    Sink: AnalyticsSink,
{
    info!(backend = sink.backend_type(), "persister started");

    while let Some(item) = items.recv().await {
        if let Err(error) = sink.write(&item).await {
            error!(backend = sink.backend_type(), %error, "failed to persist item");
        }
    }

    if let Err(error) = sink.flush().await {
        error!(backend = sink.backend_type(), %error, "failed to flush sink");
    }

    debug!(backend = sink.backend_type(), "persister stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let result = PairEngine::spawn(EngineConfig::default().with_window_size(0), NullSink);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_router_rejects_unknown_symbol() {
        let engine = PairEngine::spawn(EngineConfig::default(), NullSink).unwrap();

        let result = engine.ingest(Tick::new("BTC", 0, 1.0));
        assert!(matches!(result, Err(EngineError::UnknownSymbol(_))));
        assert!(engine.ingest(Tick::new("ES", 0, 1.0)).is_ok());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_router_reports_stopped_engine() {
        let engine = PairEngine::spawn(EngineConfig::default(), NullSink).unwrap();
        let router = engine.router();

        engine.shutdown().await;

        assert!(matches!(
            router.send(Tick::new("NQ", 0, 1.0)),
            Err(EngineError::Stopped(_))
        ));
    }
}
