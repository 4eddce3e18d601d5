//! The supervisor value: command surface and loop ownership.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use backtest::BacktestEngine;
use event_bus::{Event, EventBus};
use exchange::ExchangeAdapter;
use ledger::Ledger;
use model::{
    BacktestParams, BacktestRecord, Bar, Position, RunCounters, StrategyDefinition, StrategyKind,
    StrategyRun, StrategyStatus, Timeframe, TradeRecord,
};
use risk::RunRiskState;
use strategies::Kernel;
use strategy_core::{ConfigDoc, ReconcileMode, StrategyContext, TradingSection};

use crate::error::SupervisorError;
use crate::runloop::{run_strategy_loop, LoopCommand, LoopState, StopRequest};
use crate::templates::{builtin_templates, StrategyTemplate};

/// Tunables with production defaults.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Bound on cooperative stop; past it the loop is canceled and the run
    /// marked errored.
    pub stop_timeout: Duration,
    /// Consecutive recoverable kernel errors before the run errors out.
    pub max_consecutive_errors: u32,
    pub snapshot_interval: Duration,
    pub snapshot_retention: chrono::Duration,
    /// Cap on bars fetched for one backtest.
    pub backtest_bar_limit: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(30),
            max_consecutive_errors: 5,
            snapshot_interval: Duration::from_secs(60),
            snapshot_retention: chrono::Duration::days(7),
            backtest_bar_limit: 1500,
        }
    }
}

/// Status answer for one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatusView {
    pub strategy: StrategyDefinition,
    pub run: Option<StrategyRun>,
    pub position: Option<Position>,
}

/// A backtest submission. Symbol and timeframe override the strategy's
/// configuration document when set.
#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub strategy_id: i64,
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub initial_balance: Decimal,
    pub fee_rate: Decimal,
}

struct StrategyHandle {
    stop_tx: watch::Sender<Option<StopRequest>>,
    cmd_tx: mpsc::Sender<LoopCommand>,
    task: JoinHandle<()>,
}

/// Owns one control loop per running strategy plus the command surface the
/// external API layer consumes.
pub struct Supervisor {
    ledger: Ledger,
    adapter: Arc<dyn ExchangeAdapter>,
    bus: Arc<EventBus>,
    settings: SupervisorSettings,
    handles: Arc<DashMap<i64, StrategyHandle>>,
    command_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl Supervisor {
    pub fn new(
        ledger: Ledger,
        adapter: Arc<dyn ExchangeAdapter>,
        bus: Arc<EventBus>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            ledger,
            adapter,
            bus,
            settings,
            handles: Arc::new(DashMap::new()),
            command_locks: DashMap::new(),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Startup recovery: strategy rows left running by a crash are reset and
    /// their dangling runs closed. Call once before serving commands.
    pub async fn recover(&self) -> Result<u32, SupervisorError> {
        let reset = self
            .ledger
            .recover_interrupted("supervisor restarted while run was open")
            .await?;
        if reset > 0 {
            warn!(reset, "recovered strategies left running by previous process");
        }
        Ok(reset)
    }

    // ------------------------------------------------------------------
    // Strategy CRUD
    // ------------------------------------------------------------------

    pub async fn create_strategy(
        &self,
        name: &str,
        description: Option<&str>,
        config_yaml: &str,
    ) -> Result<StrategyDefinition, SupervisorError> {
        // Reject documents that cannot even parse; kernel-level validation
        // happens at start.
        ConfigDoc::parse(config_yaml)?;
        Ok(self
            .ledger
            .create_strategy(name, description, StrategyKind::Config, config_yaml)
            .await?)
    }

    /// Seed a new strategy from a template.
    pub async fn create_from_template(
        &self,
        template_id: &str,
        name: &str,
    ) -> Result<StrategyDefinition, SupervisorError> {
        let template = builtin_templates()
            .iter()
            .find(|t| t.id == template_id)
            .ok_or_else(|| SupervisorError::UnknownTemplate(template_id.to_string()))?;
        Ok(self
            .ledger
            .create_strategy(
                name,
                Some(template.description),
                StrategyKind::Config,
                template.config_yaml,
            )
            .await?)
    }

    pub async fn update_strategy(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
        config_yaml: Option<&str>,
    ) -> Result<StrategyDefinition, SupervisorError> {
        if let Some(yaml) = config_yaml {
            ConfigDoc::parse(yaml)?;
        }
        Ok(self
            .ledger
            .update_strategy(id, name, description, config_yaml)
            .await?)
    }

    pub async fn delete_strategy(&self, id: i64) -> Result<(), SupervisorError> {
        if self.handles.contains_key(&id) {
            return Err(SupervisorError::AlreadyRunning(id));
        }
        Ok(self.ledger.delete_strategy(id).await?)
    }

    pub async fn list_strategies(&self) -> Result<Vec<StrategyDefinition>, SupervisorError> {
        Ok(self.ledger.list_strategies().await?)
    }

    pub fn templates(&self) -> &'static [StrategyTemplate] {
        builtin_templates()
    }

    // ------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------

    /// Start a strategy: open a run, reconcile venue positions, initialize
    /// the kernel, and spawn the control loop. Returns once the loop is
    /// running. Configuration errors surface here and leave the strategy
    /// stopped; initialize failures mark the run errored.
    pub async fn start(&self, id: i64) -> Result<(), SupervisorError> {
        let lock = self.command_lock(id);
        let _guard = lock.lock().await;

        if self.handles.contains_key(&id) {
            return Err(SupervisorError::AlreadyRunning(id));
        }
        let definition = self.ledger.get_strategy(id).await?;

        // Everything configuration-driven is resolved before any state
        // changes, so a bad document leaves the strategy stopped.
        let doc = ConfigDoc::parse(&definition.config_yaml)?;
        let mut kernel = Kernel::from_config(&doc)?;
        let policy = doc.risk_policy()?;
        let trading = doc.trading()?.clone();
        let doc = Arc::new(doc);

        let balance = self.adapter.fetch_balance().await?;
        let run_id = self.ledger.open_run(id, balance.total).await?;

        // From here on a failure errors the run.
        let started = self
            .start_inner(id, run_id, &mut kernel, &doc, &trading)
            .await;
        let position = match started {
            Ok(position) => position,
            Err(e) => {
                error!(strategy_id = id, error = %e, "initialize failed, run errored");
                let _ = self
                    .ledger
                    .close_run(run_id, balance.total, StrategyStatus::Error, Some(&e.to_string()))
                    .await;
                let _ = self
                    .ledger
                    .set_strategy_status(id, StrategyStatus::Error)
                    .await;
                self.bus.publish(Event::Error {
                    strategy_id: Some(id),
                    kind: "initialize_failed".into(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.ledger
            .set_strategy_status(id, StrategyStatus::Running)
            .await?;
        self.bus.publish(Event::StrategyStatus {
            strategy_id: id,
            status: StrategyStatus::Running,
            counters: RunCounters::default(),
        });

        let (stop_tx, stop_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let state = LoopState {
            strategy_id: id,
            run_id,
            symbol: trading.symbol.clone(),
            kernel,
            doc,
            policy,
            position,
            counters: RunCounters::default(),
            risk: RunRiskState {
                start_balance: balance.total,
                realized_pnl: Decimal::ZERO,
                addition_count: 0,
                last_trade_at_ms: None,
                now_ms: Utc::now().timestamp_millis(),
            },
            consecutive_errors: 0,
            ledger: self.ledger.clone(),
            adapter: Arc::clone(&self.adapter),
            bus: Arc::clone(&self.bus),
            settings: self.settings.clone(),
        };

        let handles = Arc::clone(&self.handles);
        let task = tokio::spawn(async move {
            run_strategy_loop(state, stop_rx, cmd_rx).await;
            // A loop that ended on its own (terminal risk, error) clears its
            // own table entry.
            handles.remove(&id);
        });

        self.handles.insert(
            id,
            StrategyHandle {
                stop_tx,
                cmd_tx,
                task,
            },
        );
        info!(strategy_id = id, run_id, "strategy started");
        Ok(())
    }

    /// Reconciliation plus kernel initialize; the fallible tail of start.
    async fn start_inner(
        &self,
        id: i64,
        run_id: i64,
        kernel: &mut Kernel,
        doc: &Arc<ConfigDoc>,
        trading: &TradingSection,
    ) -> Result<Option<Position>, SupervisorError> {
        let mut position = None;

        if let Some(venue_pos) = self.adapter.fetch_position(&trading.symbol).await? {
            match trading.reconcile_on_start {
                ReconcileMode::Adopt => {
                    info!(
                        strategy_id = id,
                        symbol = %venue_pos.symbol,
                        side = %venue_pos.side,
                        quantity = %venue_pos.quantity,
                        "adopting pre-existing venue position"
                    );
                    let pos = Position {
                        symbol: venue_pos.symbol.clone(),
                        side: venue_pos.side,
                        entry_price: venue_pos.entry_price,
                        quantity: venue_pos.quantity,
                        notional: venue_pos.entry_price * venue_pos.quantity,
                        leverage: venue_pos.leverage,
                        opened_at_ms: Utc::now().timestamp_millis(),
                        mark_price: venue_pos.mark_price,
                    };
                    self.ledger.upsert_position(run_id, id, Some(&pos)).await?;
                    self.bus.publish(Event::Error {
                        strategy_id: Some(id),
                        kind: "reconcile_adopted".into(),
                        message: format!("adopted {} {} position", venue_pos.quantity, venue_pos.symbol),
                    });
                    position = Some(pos);
                }
                ReconcileMode::Close => {
                    warn!(
                        strategy_id = id,
                        symbol = %venue_pos.symbol,
                        "closing pre-existing venue position before start"
                    );
                    self.adapter
                        .close_market(&trading.symbol, venue_pos.side)
                        .await?;
                    self.bus.publish(Event::Error {
                        strategy_id: Some(id),
                        kind: "reconcile_closed".into(),
                        message: format!("flattened pre-existing {} position", venue_pos.symbol),
                    });
                }
            }
        }

        let ticker = self.adapter.fetch_ticker(&trading.symbol).await?;
        let ctx = StrategyContext::new(
            id,
            run_id,
            Utc::now().timestamp_millis(),
            Arc::clone(doc),
            ticker,
            position.clone(),
            Arc::clone(&self.adapter),
        );
        kernel.initialize(&ctx).await?;
        Ok(position)
    }

    /// Stop a strategy. Returns only after the loop reached Stopped, or
    /// errors after the bounded timeout with the run marked errored.
    pub async fn stop(&self, id: i64, close_positions: bool) -> Result<(), SupervisorError> {
        let lock = self.command_lock(id);
        let _guard = lock.lock().await;

        let Some((_, handle)) = self.handles.remove(&id) else {
            // No live loop. Repair stale rows so stop is idempotent.
            if let Ok(definition) = self.ledger.get_strategy(id).await {
                if definition.status == StrategyStatus::Running {
                    if let Some(run) = self.ledger.open_run_for(id).await? {
                        self.ledger
                            .close_run(
                                run.id,
                                run.start_balance,
                                StrategyStatus::Stopped,
                                Some("stopped without live loop"),
                            )
                            .await?;
                    }
                    self.ledger
                        .set_strategy_status(id, StrategyStatus::Stopped)
                        .await?;
                }
            }
            return Ok(());
        };

        let _ = handle.stop_tx.send(Some(StopRequest { close_positions }));

        let mut task = handle.task;
        match timeout(self.settings.stop_timeout, &mut task).await {
            Ok(_) => {
                info!(strategy_id = id, "strategy stopped");
                Ok(())
            }
            Err(_) => {
                task.abort();
                error!(
                    strategy_id = id,
                    timeout_s = self.settings.stop_timeout.as_secs(),
                    "stop timed out; loop canceled, manual reconciliation required"
                );
                if let Some(run) = self.ledger.open_run_for(id).await? {
                    let _ = self
                        .ledger
                        .close_run(
                            run.id,
                            run.start_balance,
                            StrategyStatus::Error,
                            Some("stop timed out; loop canceled"),
                        )
                        .await;
                }
                let _ = self
                    .ledger
                    .set_strategy_status(id, StrategyStatus::Error)
                    .await;
                self.bus.publish(Event::Error {
                    strategy_id: Some(id),
                    kind: "cancellation_timeout".into(),
                    message: "stop did not complete in bound".into(),
                });
                Err(SupervisorError::StopTimeout(self.settings.stop_timeout))
            }
        }
    }

    /// Stop every running strategy (process shutdown path).
    pub async fn stop_all(&self, close_positions: bool) {
        let ids: Vec<i64> = self.handles.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Err(e) = self.stop(id, close_positions).await {
                error!(strategy_id = id, error = %e, "stop failed during shutdown");
            }
        }
    }

    /// Ask a running ML strategy to retrain. Idempotent: repeated commands
    /// collapse into one retrain.
    pub async fn force_retrain(&self, id: i64) -> Result<(), SupervisorError> {
        let handle = self
            .handles
            .get(&id)
            .ok_or(SupervisorError::NotRunning(id))?;
        let _ = handle.cmd_tx.try_send(LoopCommand::Retrain);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn status(&self, id: i64) -> Result<StrategyStatusView, SupervisorError> {
        let strategy = self.ledger.get_strategy(id).await?;
        let run = self.ledger.open_run_for(id).await?;
        let position = match &run {
            Some(run) => self.ledger.get_position(run.id).await?,
            None => None,
        };
        Ok(StrategyStatusView {
            strategy,
            run,
            position,
        })
    }

    pub async fn trade_history(
        &self,
        strategy_id: Option<i64>,
        run_id: Option<i64>,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<TradeRecord>, u64), SupervisorError> {
        Ok(self
            .ledger
            .list_trades(strategy_id, run_id, offset, limit)
            .await?)
    }

    pub async fn runs(&self, strategy_id: i64) -> Result<Vec<StrategyRun>, SupervisorError> {
        Ok(self.ledger.list_runs(strategy_id).await?)
    }

    pub async fn price_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, SupervisorError> {
        Ok(self.adapter.fetch_bars(symbol, timeframe, limit).await?)
    }

    /// Account snapshots inside the retention window.
    pub async fn account_history(
        &self,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<model::AccountSnapshot>, SupervisorError> {
        Ok(self.ledger.snapshots_since(since).await?)
    }

    // ------------------------------------------------------------------
    // Backtests
    // ------------------------------------------------------------------

    /// Submit a backtest; returns its id immediately. The replay runs on its
    /// own task, streaming progress to the bus and persisting the result.
    pub async fn submit_backtest(&self, request: BacktestRequest) -> Result<i64, SupervisorError> {
        let definition = self.ledger.get_strategy(request.strategy_id).await?;
        let doc = ConfigDoc::parse(&definition.config_yaml)?;

        let symbol = match &request.symbol {
            Some(symbol) => symbol.clone(),
            None => doc.trading()?.symbol.clone(),
        };
        let timeframe = request.timeframe.unwrap_or(Timeframe::M1);
        let params = BacktestParams {
            strategy_id: request.strategy_id,
            symbol,
            timeframe,
            start_ms: request.start_ms,
            end_ms: request.end_ms,
            initial_balance: request.initial_balance,
            fee_rate: request.fee_rate,
        };

        let backtest_id = self.ledger.create_backtest(&params).await?;

        let ledger = self.ledger.clone();
        let adapter = Arc::clone(&self.adapter);
        let bus = Arc::clone(&self.bus);
        let bar_limit = self.settings.backtest_bar_limit;
        tokio::spawn(async move {
            if let Err(e) =
                run_backtest_task(backtest_id, params, doc, ledger.clone(), adapter, bus, bar_limit)
                    .await
            {
                error!(backtest_id, error = %e, "backtest failed");
                let _ = ledger.fail_backtest(backtest_id, &e).await;
            }
        });

        Ok(backtest_id)
    }

    pub async fn get_backtest(&self, id: i64) -> Result<BacktestRecord, SupervisorError> {
        Ok(self.ledger.get_backtest(id).await?)
    }

    pub async fn list_backtests(
        &self,
        strategy_id: Option<i64>,
    ) -> Result<Vec<BacktestRecord>, SupervisorError> {
        Ok(self.ledger.list_backtests(strategy_id).await?)
    }

    pub async fn delete_backtest(&self, id: i64) -> Result<(), SupervisorError> {
        Ok(self.ledger.delete_backtest(id).await?)
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    /// Periodic account snapshots: capture balance and aggregate unrealized
    /// pnl, prune past the retention window, publish `account` events.
    pub fn spawn_snapshot_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let ledger = self.ledger.clone();
        let adapter = Arc::clone(&self.adapter);
        let bus = Arc::clone(&self.bus);
        let interval = self.settings.snapshot_interval;
        let retention = self.settings.snapshot_retention;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match adapter.fetch_balance().await {
                            Ok(balance) => {
                                let unrealized: Decimal = match ledger.open_positions().await {
                                    Ok(positions) => positions
                                        .iter()
                                        .map(|(_, p)| p.unrealized_pnl(p.mark_price))
                                        .sum(),
                                    Err(_) => Decimal::ZERO,
                                };
                                let now = Utc::now();
                                match ledger
                                    .record_snapshot(
                                        balance.total,
                                        balance.free,
                                        balance.used,
                                        unrealized,
                                        now,
                                    )
                                    .await
                                {
                                    Ok(snapshot) => bus.publish(Event::Account { snapshot }),
                                    Err(e) => warn!(error = %e, "snapshot write failed"),
                                }
                                let _ = ledger.prune_snapshots(now - retention).await;
                            }
                            Err(e) => warn!(error = %e, "balance fetch failed, snapshot skipped"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn command_lock(&self, id: i64) -> Arc<Mutex<()>> {
        self.command_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// The spawned backtest body; any error string marks the record failed.
async fn run_backtest_task(
    backtest_id: i64,
    params: BacktestParams,
    doc: ConfigDoc,
    ledger: Ledger,
    adapter: Arc<dyn ExchangeAdapter>,
    bus: Arc<EventBus>,
    bar_limit: u32,
) -> Result<(), String> {
    ledger
        .mark_backtest_running(backtest_id)
        .await
        .map_err(|e| e.to_string())?;

    let bar_ms = params.timeframe.duration().as_millis() as i64;
    let span_bars = ((params.end_ms - params.start_ms) / bar_ms.max(1) + 1).max(2) as u32;
    let bars: Vec<Bar> = adapter
        .fetch_bars(&params.symbol, params.timeframe, span_bars.min(bar_limit))
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .filter(|bar| bar.open_time_ms >= params.start_ms && bar.open_time_ms <= params.end_ms)
        .collect();

    let engine = BacktestEngine::with_bus(bus);
    let outcome = engine
        .run(backtest_id, &params, doc, bars)
        .await
        .map_err(|e| e.to_string())?;

    ledger
        .complete_backtest(
            backtest_id,
            &outcome.stats,
            outcome.final_balance,
            &outcome.equity_curve,
            &outcome.trades,
        )
        .await
        .map_err(|e| e.to_string())?;

    info!(
        backtest_id,
        trades = outcome.trades.len(),
        total_return = outcome.stats.total_return,
        "backtest completed"
    );
    Ok(())
}
