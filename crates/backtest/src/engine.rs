//! The backtest engine proper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::DateTime;
use rust_decimal::Decimal;
use tracing::{debug, info};

use event_bus::{Event, EventBus};
use exchange::ExchangeAdapter;
use model::{
    BacktestParams, BacktestStats, Bar, EquityPoint, Position, TradeKind, TradeRecord, TradeSide,
};
use risk::{evaluate, ProposedAction, RiskVerdict, RunRiskState};
use strategies::Kernel;
use strategy_core::{ConfigDoc, StrategyContext, TradeRequest};

use crate::sim::SimAdapter;
use crate::stats;
use crate::BacktestError;

/// Minimum wall-clock gap between progress publications.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Everything a completed backtest produces.
#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    pub stats: BacktestStats,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub final_balance: Decimal,
}

pub struct BacktestEngine {
    bus: Option<Arc<EventBus>>,
}

impl BacktestEngine {
    pub fn new() -> Self {
        Self { bus: None }
    }

    /// Publish `backtest_progress` events while running.
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        Self { bus: Some(bus) }
    }

    /// Replay the kernel described by `doc` over `bars`.
    ///
    /// Mirrors the live tick: refresh mark, evaluate the risk gate, call
    /// `run_once`, execute its requests through the gate. Unlike live, a
    /// kernel error here is fatal.
    pub async fn run(
        &self,
        backtest_id: i64,
        params: &BacktestParams,
        doc: ConfigDoc,
        bars: Vec<Bar>,
    ) -> Result<BacktestOutcome, BacktestError> {
        if bars.len() < 2 {
            return Err(BacktestError::NoBars);
        }
        let total = bars.len() as u64;

        let mut kernel = Kernel::from_config(&doc)?;
        let policy = doc.risk_policy()?;
        let config = Arc::new(doc);

        let sim = Arc::new(SimAdapter::new(
            bars,
            params.timeframe,
            params.initial_balance,
            params.fee_rate,
        ));
        let adapter: Arc<dyn ExchangeAdapter> = sim.clone();

        let mut state = RunState {
            position: None,
            risk: RunRiskState {
                start_balance: params.initial_balance,
                realized_pnl: Decimal::ZERO,
                addition_count: 0,
                last_trade_at_ms: None,
                now_ms: 0,
            },
            trades: Vec::new(),
            symbol: params.symbol.clone(),
            strategy_id: params.strategy_id,
        };
        let mut equity_curve = Vec::new();

        {
            let ticker = sim
                .fetch_ticker(&state.symbol)
                .await
                .map_err(|e| BacktestError::Kernel(strategy_core::KernelError::Venue(e)))?;
            let ctx = make_ctx(&state, &config, &adapter, sim.now_ms(), ticker);
            kernel.initialize(&ctx).await?;
        }

        let emit_every = (total / 100).max(1);
        let mut last_emit = Instant::now()
            .checked_sub(PROGRESS_INTERVAL)
            .unwrap_or_else(Instant::now);
        let last_index = total as usize - 1;
        let mut terminal = false;

        for index in 0..last_index {
            sim.set_index(index);
            let now_ms = sim.now_ms();
            state.risk.now_ms = now_ms;

            let ticker = sim.fetch_ticker(&state.symbol).await.map_err(|e| {
                BacktestError::Kernel(strategy_core::KernelError::Venue(e))
            })?;
            let mark = ticker.last;
            if let Some(pos) = &mut state.position {
                pos.set_mark(mark);
            }

            match evaluate(state.position.as_ref(), mark, None, &state.risk, &policy) {
                RiskVerdict::ForceClose(reason) => {
                    debug!(bar = index, %reason, "risk gate force-close");
                    state
                        .execute(&sim, &mut kernel, TradeRequest::Close { quantity: None })
                        .await?;
                    if reason == risk::CloseReason::MaxLoss {
                        terminal = true;
                    }
                }
                _ => {
                    let ctx = make_ctx(&state, &config, &adapter, now_ms, ticker.clone());
                    kernel.run_once(&ctx).await?;

                    for request in ctx.take_requests() {
                        let action = ProposedAction {
                            kind: request.kind(),
                            side: request_side(&request, state.position.as_ref()),
                        };
                        match evaluate(
                            state.position.as_ref(),
                            mark,
                            Some(&action),
                            &state.risk,
                            &policy,
                        ) {
                            RiskVerdict::Allow => {
                                state.execute(&sim, &mut kernel, request).await?;
                            }
                            RiskVerdict::Deny(reason) => {
                                debug!(bar = index, %reason, "risk gate denied request");
                            }
                            RiskVerdict::ForceClose(reason) => {
                                debug!(bar = index, %reason, "risk gate force-close on request");
                                state
                                    .execute(&sim, &mut kernel, TradeRequest::Close {
                                        quantity: None,
                                    })
                                    .await?;
                                if reason == risk::CloseReason::MaxLoss {
                                    terminal = true;
                                }
                                break;
                            }
                        }
                    }
                }
            }

            equity_curve.push(EquityPoint {
                timestamp_ms: now_ms,
                equity: sim.equity(),
            });

            if (index as u64) % emit_every == 0 && last_emit.elapsed() >= PROGRESS_INTERVAL {
                last_emit = Instant::now();
                self.publish_progress(backtest_id, index as u64 + 1, total, sim.equity());
            }

            if terminal {
                info!(bar = index, "run terminal, backtest halted early");
                break;
            }
        }

        sim.set_index(last_index);
        equity_curve.push(EquityPoint {
            timestamp_ms: sim.now_ms(),
            equity: sim.equity(),
        });
        self.publish_progress(backtest_id, total, total, sim.equity());

        {
            let ticker = sim
                .fetch_ticker(&state.symbol)
                .await
                .map_err(|e| BacktestError::Kernel(strategy_core::KernelError::Venue(e)))?;
            let ctx = make_ctx(&state, &config, &adapter, sim.now_ms(), ticker);
            kernel.shutdown(&ctx, "backtest complete").await;
        }

        let stats = stats::compute(&equity_curve, &state.trades, params.timeframe);
        let final_balance = sim.equity();

        Ok(BacktestOutcome {
            stats,
            equity_curve,
            trades: state.trades,
            final_balance,
        })
    }

    fn publish_progress(&self, backtest_id: i64, current: u64, total: u64, balance: Decimal) {
        if let Some(bus) = &self.bus {
            bus.publish(Event::BacktestProgress {
                backtest_id,
                current,
                total,
                percentage: current as f64 / total as f64 * 100.0,
                current_balance: balance,
            });
        }
    }
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable run state threaded through the replay.
struct RunState {
    position: Option<Position>,
    risk: RunRiskState,
    trades: Vec<TradeRecord>,
    symbol: String,
    strategy_id: i64,
}

impl RunState {
    /// Execute one request against the simulated venue, mirror the fill into
    /// the position replica, record the trade, and notify the kernel.
    async fn execute(
        &mut self,
        sim: &SimAdapter,
        kernel: &mut Kernel,
        request: TradeRequest,
    ) -> Result<(), BacktestError> {
        let venue_err = |e| BacktestError::Kernel(strategy_core::KernelError::Venue(e));

        let record = match request {
            TradeRequest::Open { side, notional } | TradeRequest::Add { side, notional } => {
                let kind = if self.position.is_some() {
                    TradeKind::Add
                } else {
                    TradeKind::Open
                };
                let fill = sim
                    .open_market(&self.symbol, side, notional)
                    .await
                    .map_err(venue_err)?;
                match &mut self.position {
                    Some(pos) => pos.add(&fill, notional),
                    None => {
                        self.position =
                            Some(Position::open(&self.symbol, side, &fill, notional, 1));
                    }
                }
                if kind == TradeKind::Add {
                    self.risk.addition_count += 1;
                } else {
                    self.risk.addition_count = 0;
                }
                self.make_record(kind, side, fill.price, fill.qty, notional, None, fill.timestamp_ms)
            }
            TradeRequest::Close { quantity } => {
                let Some(pos) = &mut self.position else {
                    return Ok(());
                };
                let side = pos.side;
                let fill = match quantity {
                    None => sim
                        .close_market(&self.symbol, side)
                        .await
                        .map_err(venue_err)?,
                    Some(qty) => sim
                        .reduce_market(&self.symbol, side, qty)
                        .await
                        .map_err(venue_err)?,
                };
                let pnl = pos.reduce(fill.price, fill.qty);
                if pos.is_flat() {
                    self.position = None;
                    self.risk.addition_count = 0;
                }
                self.risk.realized_pnl += pnl;
                let notional = fill.price * fill.qty;
                self.make_record(
                    TradeKind::Close,
                    side,
                    fill.price,
                    fill.qty,
                    notional,
                    Some(pnl),
                    fill.timestamp_ms,
                )
            }
        };

        self.risk.last_trade_at_ms = Some(record.executed_at.timestamp_millis());
        kernel.on_trade(&record);
        self.trades.push(record);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn make_record(
        &self,
        kind: TradeKind,
        side: TradeSide,
        price: Decimal,
        quantity: Decimal,
        notional: Decimal,
        pnl: Option<Decimal>,
        timestamp_ms: i64,
    ) -> TradeRecord {
        TradeRecord {
            id: self.trades.len() as i64 + 1,
            strategy_id: self.strategy_id,
            run_id: 0,
            kind,
            side,
            symbol: self.symbol.clone(),
            price,
            quantity,
            notional,
            pnl,
            executed_at: DateTime::from_timestamp_millis(timestamp_ms)
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC),
        }
    }
}

fn make_ctx(
    state: &RunState,
    config: &Arc<ConfigDoc>,
    adapter: &Arc<dyn ExchangeAdapter>,
    now_ms: i64,
    ticker: model::Ticker,
) -> StrategyContext {
    StrategyContext::new(
        state.strategy_id,
        0,
        now_ms,
        Arc::clone(config),
        ticker,
        state.position.clone(),
        Arc::clone(adapter),
    )
}

fn request_side(request: &TradeRequest, position: Option<&Position>) -> TradeSide {
    match request {
        TradeRequest::Open { side, .. } | TradeRequest::Add { side, .. } => *side,
        TradeRequest::Close { .. } => position.map(|p| p.side).unwrap_or(TradeSide::Long),
    }
}
